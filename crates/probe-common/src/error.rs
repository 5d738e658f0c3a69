use std::path::PathBuf;
use thiserror::Error;

/// Probe error types covering sampling, channel lifecycle, and configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    /// Platform counter query failed; carries no partial data.
    #[error("sample failure: {0}")]
    Sample(String),

    /// Publish channel could not be created or opened for writing.
    #[error("failed to open channel at {}: {reason}", path.display())]
    Open {
        /// Filesystem path of the channel entry.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A single publish attempt failed or would overflow the message buffer.
    #[error("write failure: {0}")]
    Write(String),

    /// Configuration value out of range or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid channel state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ProbeError {
    /// Returns true if the loop may skip this failure and continue with the next cycle.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Sample(_) | Self::Write(_))
    }
}

/// Convenience type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
