//! Error types for packet-rule synthesis

use thiserror::Error;

/// Errors raised while synthesizing or installing a rule program
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule would reference a malformed address or CIDR
    #[error("invalid address in rule: {0}")]
    InvalidAddress(String),

    /// A rule would reference an unknown chain
    #[error("invalid chain in rule: {0}")]
    InvalidChain(String),

    /// No packet-filter binary could be located
    #[error("no packet filter binary found")]
    MissingPacketFilter,

    /// The packet-filter binary is older than the minimum supported version
    #[error("packet filter version {0} is older than the required 1.2.10")]
    InvalidPacketFilterVersion(String),

    /// Scratch-file or subprocess I/O failure
    #[error("packet filter I/O error: {0}")]
    Io(#[from] std::io::Error),
}
