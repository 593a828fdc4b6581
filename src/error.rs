//! Error types for arbor
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown project or group, missing store)
//! - 3: Sync rejected (remote write failed; local state was reverted)
//! - 4: Operation failed (I/O, serialization, locking)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the arbor CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const SYNC_REJECTED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for arbor operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No arbor store at {0} (run `arbor init`)")]
    NotInitialized(PathBuf),

    // Sync rejections (exit code 3)
    #[error("Persistence failed for {entity}: {reason}")]
    Persistence { entity: String, reason: String },

    #[error("Transaction failed ({applied} of {total} writes applied): {reason}")]
    PartialTransaction {
        applied: usize,
        total: usize,
        reason: String,
    },

    #[error("Remote store timed out after {0} ms")]
    Timeout(u64),

    #[error("Import failed after {completed_batches} of {total_batches} batches: {reason}")]
    ImportFailed {
        completed_batches: usize,
        total_batches: usize,
        reason: String,
    },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::ProjectNotFound(_)
            | Error::GroupNotFound(_)
            | Error::TaskNotFound(_)
            | Error::NotInitialized(_) => exit_codes::USER_ERROR,

            // Sync rejections
            Error::Persistence { .. }
            | Error::PartialTransaction { .. }
            | Error::Timeout(_)
            | Error::ImportFailed { .. } => exit_codes::SYNC_REJECTED,

            // Operation failures
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// True when the error came back from the remote store rather than
    /// from the caller or the local machine.
    pub fn is_sync_failure(&self) -> bool {
        self.exit_code() == exit_codes::SYNC_REJECTED
    }

    /// Structured details for JSON error output, when the variant has any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::PartialTransaction { applied, total, .. } => Some(serde_json::json!({
                "applied": applied,
                "total": total,
            })),
            Error::ImportFailed {
                completed_batches,
                total_batches,
                ..
            } => Some(serde_json::json!({
                "completed_batches": completed_batches,
                "total_batches": total_batches,
            })),
            Error::Persistence { entity, .. } => Some(serde_json::json!({ "entity": entity })),
            _ => None,
        }
    }
}

/// Result type alias for arbor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
