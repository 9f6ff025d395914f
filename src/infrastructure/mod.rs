//! Infrastructure layer - external adapters (backends, identity, config files).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod identity;
pub mod memory_remote;
pub mod remote;
pub mod sqlite_remote;

pub use config::{
    config_file_path, ensure_config_exists, load_config, load_config_from_file, save_config,
    save_config_to,
};
pub use identity::{
    user_id_for, DemoIdentityProvider, IdentityProvider, DEMO_EMAIL, DEMO_PASSWORD, DEMO_USER_ID,
};
pub use memory_remote::InMemoryRemote;
pub use remote::TreeRemote;
pub use sqlite_remote::SqliteRemote;
