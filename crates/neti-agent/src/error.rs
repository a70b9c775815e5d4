//! Error types for the agent

use thiserror::Error;

use neti_coordination::CoordinationError;
use neti_core::ConfigError;
use neti_rules::RuleError;

/// Errors that can end (or restart) an agent run
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required cloud-metadata field could not be fetched; fatal at startup
    #[error("cloud metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// The overlay subnet is exhausted or the claim budget ran out; fatal
    #[error("no available overlay addresses")]
    NoAvailableAddresses,

    /// A coordination-store failure; the supervisor re-establishes sessions
    #[error("coordination failure: {0}")]
    Coordination(#[from] CoordinationError),

    /// Packet-filter precondition or synthesis failure
    #[error("packet filter: {0}")]
    Rules(#[from] RuleError),

    /// Configuration failure; fatal at startup
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
