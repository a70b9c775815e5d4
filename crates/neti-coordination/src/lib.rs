//! # Neti Coordination
//!
//! Coordination-store abstraction for the Neti overlay agent.
//!
//! The agent keeps two independent sessions, one to the ensemble serving
//! its own realm and one to the other realm's ensemble. Everything the
//! agent needs from a session is captured by the small [`Coordinator`]
//! trait so the allocation and membership logic can be driven against an
//! in-process fake in tests:
//!
//! - [`Coordinator`]: create / get / set / ensure-path / children /
//!   children-watch / ephemeral group join
//! - [`ZkCoordinator`]: the ZooKeeper-backed production client
//! - [`MemoryEnsemble`] / [`MemoryCoordinator`]: in-process store honoring
//!   ordering, durability and ephemerality
//! - [`CoordinatorPair`]: the local/remote pair selected by realm

pub mod coordinator;
pub mod error;
pub mod memory;
pub mod zk;

// Re-exports
pub use coordinator::{Connector, Coordinator, CoordinatorPair, Durability, Snapshots};
pub use error::{CoordinationError, CoordinationResult};
pub use memory::{MemoryConnector, MemoryCoordinator, MemoryEnsemble};
pub use zk::{ZkConnector, ZkCoordinator};
