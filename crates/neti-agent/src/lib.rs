//! # Neti Agent
//!
//! The Neti overlay agent ties the pipeline together: discover who this
//! host is from cloud metadata, lease a unique overlay address against
//! the local-realm ensemble, publish the address tuple into both
//! ensembles, and rebuild the host's packet rules on every membership
//! change.
//!
//! - [`HostIdentity`]: instance id, addresses and realm from metadata
//! - [`Allocator`]: the durable forward-lease protocol
//! - [`Membership`]: ephemeral group joins and the local watch
//! - [`Supervisor`]: lifecycle, including restart on session loss

pub mod allocator;
pub mod error;
pub mod identity;
pub mod membership;
pub mod supervisor;
pub mod tagger;

// Re-exports
pub use allocator::{Allocator, MAX_IP_TRIES};
pub use error::{AgentError, AgentResult};
pub use identity::{HostIdentity, METADATA_URL};
pub use membership::Membership;
pub use supervisor::Supervisor;
pub use tagger::{InstanceTagger, LogOnlyTagger};
