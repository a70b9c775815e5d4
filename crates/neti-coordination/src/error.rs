//! Error types for coordination-store sessions

use thiserror::Error;

/// Errors raised by a coordination-store session
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The node already exists (create lost a race, or a prior boot won)
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node (or a parent on the way to it) does not exist
    #[error("node not found: {0}")]
    NoNode(String),

    /// The session to the ensemble is gone; in-flight work for it is lost
    #[error("session lost: {0}")]
    SessionLost(String),

    /// Any other transport- or server-side failure
    #[error("coordination transport error: {0}")]
    Transport(String),
}

impl CoordinationError {
    /// Whether this error means the session itself is unusable, as opposed
    /// to a per-operation outcome like [`CoordinationError::NodeExists`]
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            CoordinationError::SessionLost(_) | CoordinationError::Transport(_)
        )
    }
}

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;
