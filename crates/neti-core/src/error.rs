//! Error types for Neti core

use thiserror::Error;

/// Errors raised while locating or parsing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither the well-known path nor the testing fallback exists
    #[error("no config file at {well_known} or {fallback}")]
    NotFound {
        well_known: String,
        fallback: String,
    },

    /// The config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be parsed
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while parsing a group member's identifier
#[derive(Debug, Error)]
pub enum PeerError {
    /// The entry does not conform to the `<uuid>-<public>|<private>|<overlay>|<realm>` grammar
    #[error("entry {0:?} does not match the member identifier pattern")]
    IpPatternMismatch(String),
}
