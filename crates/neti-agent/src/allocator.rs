//! Overlay address allocation
//!
//! The forward lease (`id_to_ip/<instance>`) is the one-writer-per-
//! instance record and wins under contention; the reverse map
//! (`ip_to_id/<address>`) only exists so enumeration can see taken
//! addresses cheaply and is refreshed unconditionally on every
//! registration. Leases are durable by design: a host that restarts
//! within seconds comes back with the same overlay address.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use rand::seq::IndexedRandom;
use tracing::{error, info, instrument, warn};

use neti_coordination::{CoordinationError, Coordinator, Durability};
use neti_core::{InstanceId, RegistryPaths};

use crate::error::{AgentError, AgentResult};
use crate::tagger::InstanceTagger;

/// Bound on candidate claim attempts within a single registration call.
/// Session-level retries are unbounded and live in the supervisor.
pub const MAX_IP_TRIES: u32 = 5;

/// Leases a unique overlay address for this instance against the
/// local-realm ensemble
pub struct Allocator {
    coordinator: Arc<dyn Coordinator>,
    paths: RegistryPaths,
    subnet: Ipv4Net,
    instance_id: InstanceId,
    tagger: Arc<dyn InstanceTagger>,
}

impl Allocator {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        paths: RegistryPaths,
        subnet: Ipv4Net,
        instance_id: InstanceId,
        tagger: Arc<dyn InstanceTagger>,
    ) -> Self {
        Self {
            coordinator,
            paths,
            subnet,
            instance_id,
            tagger,
        }
    }

    /// Register this instance: re-use the existing lease if one is there,
    /// otherwise claim a fresh address, then refresh the reverse map and
    /// (best effort) tag the cloud instance.
    #[instrument(skip(self), fields(instance = %self.instance_id, subnet = %self.subnet))]
    pub async fn register(&self) -> AgentResult<Ipv4Addr> {
        let lease_path = self.paths.forward_lease(&self.instance_id);
        let overlay = match self.coordinator.get(&lease_path).await {
            Ok(existing) => {
                let overlay = parse_lease(&lease_path, &existing)?;
                info!(%overlay, "existing lease found");
                overlay
            }
            Err(CoordinationError::NoNode(_)) => self.claim_new_address(&lease_path).await?,
            Err(err) => return Err(err.into()),
        };

        self.refresh_reverse_map(overlay).await?;

        if let Err(err) = self.tagger.tag_overlay_ip(&self.instance_id, overlay).await {
            error!(error = %err, "could not tag instance");
        }

        Ok(overlay)
    }

    /// Claim loop: enumerate the taken set, pick a random free host
    /// address, try to create the forward lease, and confirm what ended
    /// up stored. Bounded by [`MAX_IP_TRIES`] candidate attempts.
    async fn claim_new_address(&self, lease_path: &str) -> AgentResult<Ipv4Addr> {
        for attempt in 1..=MAX_IP_TRIES {
            let candidate = self.choose_candidate().await?;
            info!(%candidate, attempt, "claiming overlay address");

            match self
                .coordinator
                .create(lease_path, &candidate.to_string(), Durability::Durable)
                .await
            {
                Ok(()) => {
                    // Confirmation read guards against a lost create
                    // acknowledgment; under read-your-writes it is
                    // redundant but harmless.
                    match self.coordinator.get(lease_path).await {
                        Ok(stored) if stored == candidate.to_string() => {
                            info!(overlay = %candidate, "overlay address leased");
                            return Ok(candidate);
                        }
                        Ok(stored) => {
                            warn!(%stored, "lease confirmation disagreed; retrying");
                            continue;
                        }
                        Err(CoordinationError::NoNode(_)) => {
                            warn!("lease vanished after create; retrying");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(CoordinationError::NoNode(_)) => {
                    warn!(path = self.paths.id_to_ip_root(), "lease parent missing; creating");
                    self.coordinator
                        .ensure_path(self.paths.id_to_ip_root())
                        .await?;
                    continue;
                }
                Err(CoordinationError::NodeExists(_)) => {
                    // Another agent won a race with the same instance id,
                    // or a prior boot already owns a lease.
                    match self.coordinator.get(lease_path).await {
                        Ok(stored) => {
                            let overlay = parse_lease(lease_path, &stored)?;
                            warn!(%overlay, "lease already held for this instance; using it");
                            return Ok(overlay);
                        }
                        Err(CoordinationError::NoNode(_)) => {
                            warn!("racing lease vanished; retrying");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        error!("no overlay address claimed after {MAX_IP_TRIES} attempts");
        Err(AgentError::NoAvailableAddresses)
    }

    /// The free host addresses of the realm's subnet, minus the taken
    /// set; a uniformly random pick from what is left
    async fn choose_candidate(&self) -> AgentResult<Ipv4Addr> {
        let taken: HashSet<Ipv4Addr> = match self
            .coordinator
            .children(self.paths.ip_to_id_root())
            .await
        {
            Ok(names) => names
                .iter()
                .filter_map(|name| match name.parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => {
                        warn!(entry = %name, "ignoring unparseable reverse-map entry");
                        None
                    }
                })
                .collect(),
            Err(CoordinationError::NoNode(_)) => HashSet::new(),
            Err(err) => return Err(err.into()),
        };

        let available: Vec<Ipv4Addr> = self
            .subnet
            .hosts()
            .filter(|addr| !taken.contains(addr))
            .collect();
        match available.choose(&mut rand::rng()) {
            Some(addr) => Ok(*addr),
            None => {
                error!("overlay subnet exhausted");
                Err(AgentError::NoAvailableAddresses)
            }
        }
    }

    /// Unconditionally point `ip_to_id/<overlay>` back at this instance.
    /// Not a conflict check: the forward lease is authoritative, and a
    /// stale entry from a re-leased address is simply overwritten.
    async fn refresh_reverse_map(&self, overlay: Ipv4Addr) -> AgentResult<()> {
        let path = self.paths.reverse_map(overlay);
        let id = self.instance_id.to_string();

        match self.coordinator.set(&path, &id).await {
            Ok(()) => return Ok(()),
            Err(CoordinationError::NoNode(_)) => {
                info!(%overlay, "no reverse-map entry yet; creating");
            }
            Err(err) => return Err(err.into()),
        }

        match self.coordinator.create(&path, &id, Durability::Durable).await {
            Ok(()) => Ok(()),
            Err(CoordinationError::NodeExists(_)) => {
                // Lost a race with another registrant refreshing the same
                // entry; overwrite, the forward lease already decided.
                self.coordinator.set(&path, &id).await.map_err(Into::into)
            }
            Err(CoordinationError::NoNode(_)) => {
                self.coordinator
                    .ensure_path(self.paths.ip_to_id_root())
                    .await?;
                self.coordinator
                    .create(&path, &id, Durability::Durable)
                    .await
                    .map_err(Into::into)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_lease(path: &str, data: &str) -> AgentResult<Ipv4Addr> {
    data.parse().map_err(|_| {
        AgentError::Coordination(CoordinationError::Transport(format!(
            "lease node {path} holds invalid address {data:?}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use neti_coordination::MemoryEnsemble;
    use crate::tagger::LogOnlyTagger;

    fn paths() -> RegistryPaths {
        RegistryPaths::new("/neti", "ip_to_id", "id_to_ip", "ip_map")
    }

    fn allocator(ensemble: &MemoryEnsemble, instance: &str, subnet: &str) -> Allocator {
        Allocator::new(
            Arc::new(ensemble.client()),
            paths(),
            subnet.parse().unwrap(),
            InstanceId::new(instance),
            Arc::new(LogOnlyTagger),
        )
    }

    #[tokio::test]
    async fn test_fresh_registration_writes_both_maps() {
        let ensemble = MemoryEnsemble::new();
        let overlay = allocator(&ensemble, "i-abc", "10.99.0.0/30")
            .register()
            .await
            .unwrap();

        // /30 leaves exactly two host addresses.
        let hosts: Vec<Ipv4Addr> = "10.99.0.0/30".parse::<Ipv4Net>().unwrap().hosts().collect();
        assert!(hosts.contains(&overlay));

        assert_eq!(
            ensemble.data_at("/neti/id_to_ip/i-abc").unwrap(),
            overlay.to_string()
        );
        assert_eq!(
            ensemble.data_at(&format!("/neti/ip_to_id/{overlay}")).unwrap(),
            "i-abc"
        );
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let ensemble = MemoryEnsemble::new();
        let first = allocator(&ensemble, "i-abc", "10.99.0.0/24")
            .register()
            .await
            .unwrap();
        let second = allocator(&ensemble, "i-abc", "10.99.0.0/24")
            .register()
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_existing_lease_wins_over_pool() {
        let ensemble = MemoryEnsemble::new();
        let seed = ensemble.client();
        seed.ensure_path("/neti/id_to_ip").await.unwrap();
        seed.create("/neti/id_to_ip/i-abc", "10.99.0.1", Durability::Durable)
            .await
            .unwrap();

        let overlay = allocator(&ensemble, "i-abc", "10.99.0.0/30")
            .register()
            .await
            .unwrap();
        assert_eq!(overlay.to_string(), "10.99.0.1");
        // The reverse map is refreshed even for a pre-existing lease.
        assert_eq!(
            ensemble.data_at("/neti/ip_to_id/10.99.0.1").unwrap(),
            "i-abc"
        );
    }

    #[tokio::test]
    async fn test_reverse_map_refresh_overwrites_stale_owner() {
        let ensemble = MemoryEnsemble::new();
        let seed = ensemble.client();
        seed.ensure_path("/neti/id_to_ip").await.unwrap();
        seed.ensure_path("/neti/ip_to_id").await.unwrap();
        seed.create("/neti/id_to_ip/i-abc", "10.99.0.1", Durability::Durable)
            .await
            .unwrap();
        seed.create("/neti/ip_to_id/10.99.0.1", "i-dead", Durability::Durable)
            .await
            .unwrap();

        allocator(&ensemble, "i-abc", "10.99.0.0/30")
            .register()
            .await
            .unwrap();
        assert_eq!(
            ensemble.data_at("/neti/ip_to_id/10.99.0.1").unwrap(),
            "i-abc"
        );
    }

    #[tokio::test]
    async fn test_exhausted_subnet_fails() {
        let ensemble = MemoryEnsemble::new();
        let seed = ensemble.client();
        seed.ensure_path("/neti/ip_to_id").await.unwrap();
        for (addr, owner) in [("10.99.0.1", "i-one"), ("10.99.0.2", "i-two")] {
            seed.create(&format!("/neti/ip_to_id/{addr}"), owner, Durability::Durable)
                .await
                .unwrap();
        }

        let err = allocator(&ensemble, "i-new", "10.99.0.0/30")
            .register()
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoAvailableAddresses));
    }

    #[tokio::test]
    async fn test_addresses_stay_within_subnet() {
        let ensemble = MemoryEnsemble::new();
        let subnet: Ipv4Net = "10.10.4.0/28".parse().unwrap();
        for i in 0..10 {
            let overlay = allocator(&ensemble, &format!("i-{i}"), "10.10.4.0/28")
                .register()
                .await
                .unwrap();
            assert!(subnet.contains(&overlay));
            assert_ne!(overlay, subnet.network());
            assert_ne!(overlay, subnet.broadcast());
        }
    }

    #[tokio::test]
    async fn test_registrants_get_distinct_addresses() {
        // Each registration completes before the next begins, so every
        // claimant sees its predecessors through the reverse map.
        let ensemble = MemoryEnsemble::new();
        let mut seen = HashSet::new();
        for i in 0..8 {
            let overlay = allocator(&ensemble, &format!("i-{i}"), "10.20.0.0/26")
                .register()
                .await
                .unwrap();
            assert!(seen.insert(overlay), "duplicate overlay address {overlay}");
        }

        // Forward and reverse maps agree for every registrant.
        for i in 0..8 {
            let lease = ensemble
                .data_at(&format!("/neti/id_to_ip/i-{i}"))
                .unwrap();
            assert_eq!(
                ensemble.data_at(&format!("/neti/ip_to_id/{lease}")).unwrap(),
                format!("i-{i}")
            );
        }
    }

    #[tokio::test]
    async fn test_same_instance_race_converges_on_one_lease() {
        let ensemble = MemoryEnsemble::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ensemble = ensemble.clone();
            handles.push(tokio::spawn(async move {
                allocator(&ensemble, "i-abc", "10.30.0.0/28")
                    .register()
                    .await
                    .unwrap()
            }));
        }

        let mut results = HashSet::new();
        for handle in handles {
            results.insert(handle.await.unwrap());
        }
        assert_eq!(results.len(), 1, "same instance id must converge on one lease");
    }
}
