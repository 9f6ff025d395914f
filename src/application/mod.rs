//! Application layer - stores, use cases and orchestration.
//!
//! The tree store and gift manager own all cached domain state for one
//! session; the presentation layer only reads their snapshots.

pub mod formatter;
pub mod gift_manager;
pub mod optimistic;
pub mod session;
pub mod tree_store;

pub use formatter::{
    format_categories, format_gifts_table, format_tree_json, format_tree_markdown,
    format_tree_table, OutputFormat,
};
pub use gift_manager::GiftManager;
pub use optimistic::PendingMutation;
pub use session::Session;
pub use tree_store::{FetchOutcome, StoreSnapshot, TreeStore};
