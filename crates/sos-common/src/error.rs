//! Error types for the SOS content cache
//!
//! This module defines the common error types used throughout the system.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Common result type for content cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for content cache operations
#[derive(Debug, Error)]
pub enum Error {
    // Update execution errors
    #[error("cache update {update} failed: {cause}")]
    UpdateFailed {
        update: String,
        #[source]
        cause: Arc<Error>,
    },

    #[error("datasource error: {0}")]
    Datasource(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("timed out after {waited:?} waiting for {update}")]
    WaitTimeout { update: String, waited: Duration },

    // Persistence errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid snapshot file: {0}")]
    InvalidSnapshot(String),

    #[error("unsupported snapshot version {found}, expected {expected}")]
    UnsupportedSnapshotVersion { found: u32, expected: u32 },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a datasource error
    pub fn datasource(msg: impl Into<String>) -> Self {
        Self::Datasource(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap the failure of an update unit so it can be handed to every waiter
    pub fn update_failed(update: impl Into<String>, cause: Arc<Error>) -> Self {
        Self::UpdateFailed {
            update: update.into(),
            cause,
        }
    }

    /// Check if this error was raised by an update unit's own logic
    #[must_use]
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::UpdateFailed { .. } | Self::Datasource(_) | Self::InvalidArgument(_)
        )
    }

    /// The innermost error of a chain of `UpdateFailed` wrappers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::UpdateFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
