//! # Error Handling
//!
//! Error types shared by the scavenge engine, the state store and the
//! collaborator interfaces.
//!
//! ## Categories
//!
//! 1. **Control**: cooperative cancellation, surfaced as a value
//! 2. **Contention**: a chunk file was deleted under us (re-replication)
//! 3. **Invariant**: logic or data bugs, never retried
//! 4. **Dependency**: archive or state store unavailable

use thiserror::Error;

/// Result type alias for scavenge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for the scavenger
#[derive(Error, Debug)]
pub enum Error {
    // Control
    #[error("Operation cancelled")]
    Cancelled,

    // Contention
    #[error("File is being deleted: {file}")]
    FileBeingDeleted { file: String },

    // Invariants
    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    // State store
    #[error("Scavenge state error: {message}")]
    StateStore { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    #[error("WAL error: {message}")]
    WriteAheadLog { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // Collaborators
    #[error("Archive unavailable: {message}")]
    ArchiveUnavailable { message: String },

    #[error("Collaborator error: {message}")]
    Collaborator { message: String },

    // System
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation { message: message.into() }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Error::StateStore { message: message.into(), source: None }
    }

    /// Check if the error is the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if error is recoverable by retrying the run later
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::FileBeingDeleted { .. } => true,
            Error::ArchiveUnavailable { .. } => true,
            Error::InvariantViolation { .. } => false,
            Error::WriteAheadLog { .. } => false,
            Error::Io { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Cancelled => "CANCELLED",
            Error::FileBeingDeleted { .. } => "FILE_BEING_DELETED",
            Error::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Error::StateStore { .. } => "STATE_STORE_ERROR",
            Error::WriteAheadLog { .. } => "WAL_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::ArchiveUnavailable { .. } => "ARCHIVE_UNAVAILABLE",
            Error::Collaborator { .. } => "COLLABORATOR_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization { message: err.to_string() }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        // cancellation and contention must keep their identity for the caller
        self.map_err(|e| match e {
            Error::Cancelled | Error::FileBeingDeleted { .. } | Error::InvariantViolation { .. } => e,
            other => Error::Internal {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}
