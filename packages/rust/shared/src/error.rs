//! Error types for contactlink.
//!
//! Library crates use [`ContactLinkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::ContactId;

/// Top-level error type for all contactlink operations.
#[derive(Debug, thiserror::Error)]
pub enum ContactLinkError {
    /// The observation carried neither an email nor a phone number.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An update targeted a contact that does not exist or is soft-deleted.
    #[error("contact {id} not found")]
    NotFound { id: ContactId },

    /// The persistence layer is unreachable, closed, or a query failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration loading error, or a store query issued outside its contract.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContactLinkError>;

impl ContactLinkError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Map any backend error into [`ContactLinkError::StoreUnavailable`].
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
