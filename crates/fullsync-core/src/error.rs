//! Error types for fullsync core operations.
//!
//! This module defines well-structured error types using `thiserror` for
//! library-level errors. Collaborator traits (backends, tenant directories)
//! return `anyhow` errors, which the run-state machine turns into reported
//! progress events rather than propagating.

use thiserror::Error;

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Core error types for fullsync operations.
///
/// Backend failures during a run are never surfaced through this type: they
/// become error progress events and the run continues. What remains here are
/// failures that prevent the run state from being made durable or built.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Checkpoint Errors ===
    /// The stored run state exists but could not be decoded
    #[error("checkpoint is corrupted: {reason}")]
    CheckpointCorrupted { reason: String },

    /// The stored run state was written by an incompatible format version
    #[error("checkpoint version mismatch: found {found}, expected {expected}")]
    CheckpointVersionMismatch { found: u32, expected: u32 },

    /// A checkpoint key contains characters the store cannot persist
    #[error("invalid checkpoint key: {key}")]
    InvalidKey { key: String },

    // === Queue Errors ===
    /// An indexable requested for the run is not registered
    #[error("unknown indexable: {name}")]
    UnknownIndexable { name: String },

    /// The tenant directory failed while building the queue
    #[error("tenant directory error: {reason}")]
    TenantDirectory { reason: String },

    // === Configuration Errors ===
    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Returns true if the stored checkpoint should be discarded and the run
    /// rebuilt from scratch.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            SyncError::CheckpointCorrupted { .. } | SyncError::CheckpointVersionMismatch { .. }
        )
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        SyncError::Serialization(reason.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_rebuild() {
        let err = SyncError::CheckpointCorrupted {
            reason: "truncated".to_string(),
        };
        assert!(err.requires_rebuild());

        let err = SyncError::CheckpointVersionMismatch {
            found: 9,
            expected: 1,
        };
        assert!(err.requires_rebuild());

        let err = SyncError::UnknownIndexable {
            name: "posts".to_string(),
        };
        assert!(!err.requires_rebuild());
    }

    #[test]
    fn test_display() {
        let err = SyncError::InvalidKey {
            key: "../etc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid checkpoint key: ../etc");
    }
}
