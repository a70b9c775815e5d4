//! # Neti Rules
//!
//! Packet-rule synthesis for the Neti overlay agent.
//!
//! Every membership snapshot is turned into one complete, self-contained
//! rule program — a filter table whitelisting live peers and a NAT table
//! rewriting overlay-destined traffic to each peer's reachable real
//! address — and handed to the host's restore-style bulk loader as an
//! atomic replacement. The program is a pure function of (snapshot,
//! configuration, realm), so redelivered snapshots are harmless.
//!
//! - [`FilterRule`] / [`NatRule`]: validated single rules
//! - [`render_program`]: the full program for one peer snapshot
//! - [`RuleInstaller`] / [`IptablesRestore`]: the loader seam and driver
//! - [`RuleSynthesizer`]: snapshot in, installed program out

pub mod error;
pub mod loader;
pub mod program;
pub mod rule;
pub mod synthesizer;

// Re-exports
pub use error::RuleError;
pub use loader::{InstallMode, InstallStatus, IptablesRestore, RecordingInstaller, RuleInstaller};
pub use program::{FilterPolicy, PRIMARY_INTERFACE, render_program};
pub use rule::{FilterRule, NatRule};
pub use synthesizer::{RuleSynthesizer, Synthesis};
