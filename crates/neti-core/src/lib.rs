//! # Neti Core
//!
//! Core types for the Neti overlay agent.
//!
//! Neti spans two network realms — a VPC realm and a legacy flat-network
//! realm — with a single overlay IPv4 address space. This crate holds the
//! types shared by every other Neti crate:
//!
//! - [`Realm`]: which of the two network environments a host lives in
//! - [`AddressTuple`]: the (public, private, overlay, realm) bundle a host
//!   publishes into the coordination store
//! - [`PeerBundle`]: a validated view of another host's published tuple
//! - [`Config`]: the agent configuration file and derived store paths

pub mod config;
pub mod error;
pub mod member;
pub mod realm;

// Re-exports
pub use config::{AgentConfig, Config, RealmConfig, RegistryPaths};
pub use error::{ConfigError, PeerError};
pub use member::{AddressTuple, InstanceId, NatTargets, PeerBundle};
pub use realm::Realm;
