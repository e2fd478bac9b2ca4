//! Error types for pollmux
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in pollmux
#[derive(Debug, Error)]
pub enum PollmuxError {
    /// Network failure, non-success HTTP status or fetch timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A host-supplied session hook failed
    #[error("Session error [{identifier}]: {message}")]
    Session { identifier: String, message: String },

    /// A host lifecycle hook (start/stop) failed
    #[error("Hook error: {0}")]
    Hook(String),

    /// Self-identity could not be resolved at startup
    #[error("Identity error: {0}")]
    Identity(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),
}

impl PollmuxError {
    /// Wrap an error raised inside a session hook with the session identifier.
    ///
    /// Errors that are already tagged with an identifier are passed through.
    pub fn session(identifier: &str, err: PollmuxError) -> Self {
        match err {
            PollmuxError::Session { .. } => err,
            other => PollmuxError::Session {
                identifier: identifier.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether the poll loop recovers from this error with a cooldown and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PollmuxError::Transport(_) | PollmuxError::Protocol(_) | PollmuxError::Session { .. }
        )
    }
}

/// Result type alias for pollmux operations
pub type Result<T> = std::result::Result<T, PollmuxError>;
