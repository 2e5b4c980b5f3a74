//! Error types for the LabControl service.
//!
//! `LcError` is the single error enum shared by the store, the query engine,
//! and the server's operation handlers. Every variant corresponds to one of
//! the failure classes a client can observe: validation, not-found,
//! permission, conflict, execution, timeout and storage failures.
//!
//! All variants are caught at the operation boundary and converted into a
//! structured failure response; none propagate past the dispatcher. Timeouts
//! are a distinct variant rather than being folded into `Execution`, so a
//! caller can tell a killed-over-ceiling command from an ordinary nonzero
//! exit.

use thiserror::Error;

/// Convenience alias for results using the service error type.
pub type LcResult<T> = std::result::Result<T, LcError>;

/// Primary error type for the LabControl service.
#[derive(Error, Debug)]
pub enum LcError {
    /// A request or record failed validation.
    ///
    /// Covers missing or disallowed fields on the legacy form surface and
    /// unresolved placeholders in a command template. Validation failures are
    /// detected before anything executes or is written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An entity, resource, board or capture token does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's identity does not allow the operation.
    ///
    /// Raised by reservation operations (assign on a held board, release by a
    /// non-holder) and by gated actions issued without a recognized token.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The operation conflicts with existing state.
    ///
    /// Currently raised only by `start_capture` when a session is already
    /// running for the resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An external command exited nonzero or failed to spawn.
    ///
    /// The message embeds the captured combined output so the caller can see
    /// what the command printed before failing.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An operation exceeded its wall-clock ceiling and was terminated.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Filesystem read/write failure on an entity record or capture file.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization of an entity record failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LcError {
    /// Build a storage error from an I/O failure with path context.
    pub fn storage(context: &str, err: std::io::Error) -> Self {
        LcError::Storage(format!("{}: {}", context, err))
    }
}
