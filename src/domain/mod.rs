//! Domain layer - core types and invariants.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod clock;
pub mod config;
pub mod error;
pub mod gift;
pub mod models;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, BranchRemovalPolicy, PathConfig, RemoteConfig, TreeConfig};
pub use error::{AppError, Result};
pub use gift::{Gift, GiftContent, GiftDecision, GiftDraft, GiftKind, GiftStatus};
pub use models::{
    category, new_id, AuthSuccess, Branch, BranchChanges, Category, Fruit, FruitChanges, Location,
    MediaRef, Position, Root, RootChanges, Tree, TreePatch, User, CATEGORIES,
};
