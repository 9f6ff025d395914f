//! Alma memory tree core.
//!
//! A tree records one person's life: roots (ancestry), branches (life
//! categories) and fruits (memories). This crate holds the domain model, the
//! session-scoped tree store with optimistic mutations, and the gift
//! lifecycle that moves content between users' trees.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{FetchOutcome, GiftManager, Session, StoreSnapshot, TreeStore};
pub use domain::{AppError, Result};
pub use infrastructure::{InMemoryRemote, SqliteRemote, TreeRemote};
