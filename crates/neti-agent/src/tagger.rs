//! Instance tagging seam
//!
//! After registration the overlay address is labelled onto the cloud
//! instance so operators can see it from the cloud console. The tagging
//! API call itself is an external collaborator; deployments wire in an
//! implementation holding the configured credentials, and the agent
//! treats every failure as best-effort.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::info;

use neti_core::InstanceId;

/// Labels a cloud instance with its registered overlay address
#[async_trait]
pub trait InstanceTagger: Send + Sync {
    /// Attach the `overlay_ip` label. Errors are logged by the caller,
    /// never fatal.
    async fn tag_overlay_ip(&self, instance: &InstanceId, overlay: Ipv4Addr) -> Result<(), String>;
}

/// Default tagger: records the intent in the log and nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyTagger;

#[async_trait]
impl InstanceTagger for LogOnlyTagger {
    async fn tag_overlay_ip(&self, instance: &InstanceId, overlay: Ipv4Addr) -> Result<(), String> {
        info!(%instance, %overlay, "overlay_ip tag recorded (no cloud tagger wired in)");
        Ok(())
    }
}
