//! Structured error types for beckon
//!
//! Uses thiserror for ergonomic error definitions with automatic Display
//! and Error trait implementations. Every variant maps to a process exit
//! code, so a failed invocation always terminates with a predictable status.

use thiserror::Error;

/// Successful run: delivered, listed, removed, or the user responded
pub const EXIT_SUCCESS: u8 = 0;

/// Usage errors, invalid URLs, delivery failures, close activations
pub const EXIT_FAILURE: u8 = 1;

/// No notification backend is running for this user (sysexits EX_UNAVAILABLE)
pub const EXIT_BACKEND_UNAVAILABLE: u8 = 69;

/// The wait was interrupted by SIGINT/SIGTERM (128 + SIGINT)
pub const EXIT_INTERRUPTED: u8 = 130;

/// Errors that terminate a single invocation before or instead of a session
#[derive(Error, Debug)]
pub enum BeckonError {
    /// Nothing to do, or an invalid option combination
    #[error("{0}")]
    Usage(String),

    /// The host notification service is not running
    #[error("Unable to post a notification for the current user ({user}): {reason}")]
    BackendUnavailable { user: String, reason: String },

    /// `--open` failed validation (needs a scheme and a host)
    #[error("'{0}' is not a valid URI")]
    InvalidUrl(String),

    /// Reading the piped message failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a JSON result or listing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BeckonError {
    /// Build a usage error from anything printable
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::BackendUnavailable { .. } => EXIT_BACKEND_UNAVAILABLE,
            Self::Usage(_) | Self::InvalidUrl(_) | Self::Io(_) | Self::Json(_) => EXIT_FAILURE,
        }
    }

    /// Whether the help banner should accompany the diagnostic
    pub fn wants_help(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Convenience Result type using BeckonError
pub type Result<T> = std::result::Result<T, BeckonError>;
