//! Domain-level error types for alma-tree.
//!
//! All errors are typed with `thiserror`. The stores never surface these raw
//! to the presentation layer; they convert them with [`AppError::user_message`].

use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource absent: tree, shared tree, gift, branch, fruit or root.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Transient failure, the backend could not be reached.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid state transition or a mutation the backend rejected.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Malformed input.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Credentials rejected by the identity provider.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// A tree violates its structural invariants.
    #[error("Corrupt tree: {message}")]
    CorruptTree { message: String },

    /// Failed to open or query the local database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a not-found error for the named resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a corrupt-tree error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptTree {
            message: message.into(),
        }
    }

    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Whether a retry of the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Displayable message stored in the stores' `error` field.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { what } => format!("No {what} found"),
            Self::Network { .. } => "Could not reach the server, please try again".to_string(),
            Self::Conflict { message } => format!("Change rejected: {message}"),
            Self::Validation { message } | Self::Auth { message } => message.clone(),
            Self::CorruptTree { .. } => "Tree data was inconsistent and has been reloaded".to_string(),
            Self::Database { .. } | Self::JsonParse { .. } | Self::Config { .. } | Self::Io { .. } => {
                format!("Something went wrong: {self}")
            }
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_tree_not_found_message() {
        let err = AppError::not_found("shared tree");
        assert_eq!(err.user_message(), "No shared tree found");
    }

    #[test]
    fn test_network_message_is_distinct() {
        let network = AppError::network("timeout").user_message();
        let missing = AppError::not_found("shared tree").user_message();
        assert_ne!(network, missing);
        assert!(network.contains("try again"));
    }

    #[test]
    fn test_only_network_is_transient() {
        assert!(AppError::network("down").is_transient());
        assert!(!AppError::conflict("twice").is_transient());
        assert!(!AppError::validation("bad").is_transient());
    }
}
