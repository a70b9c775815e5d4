//! Group membership
//!
//! After registration the host joins the `ip_map` group in both
//! ensembles with the same identifier — its address tuple — as an
//! ephemeral member, so crashed peers drop out of everyone's rule sets
//! without operator action. Only the local ensemble is watched: remote-
//! realm peers publish into it under the same schema, so the local view
//! is already the union.

use std::sync::Arc;

use tracing::{info, instrument};

use neti_coordination::{CoordinationResult, Coordinator, CoordinatorPair, Snapshots};
use neti_core::AddressTuple;

/// Publishes this host's address tuple into both ensembles and watches
/// the local membership group
pub struct Membership {
    local: Arc<dyn Coordinator>,
    remote: Arc<dyn Coordinator>,
    ip_map_path: String,
    identifier: String,
}

impl Membership {
    pub fn new(pair: &CoordinatorPair, ip_map_path: impl Into<String>, tuple: &AddressTuple) -> Self {
        Self {
            local: pair.local(),
            remote: pair.remote(),
            ip_map_path: ip_map_path.into(),
            identifier: tuple.encode(),
        }
    }

    /// Join the group in both ensembles. Registration has already
    /// completed by the time this runs, so a peer can never see us in
    /// the group without a durable forward lease behind us.
    #[instrument(skip(self), fields(path = %self.ip_map_path))]
    pub async fn join(&self) -> CoordinationResult<()> {
        for (name, session) in [("local", &self.local), ("remote", &self.remote)] {
            session.ensure_path(&self.ip_map_path).await?;
            let member = session.join_group(&self.ip_map_path, &self.identifier).await?;
            info!(ensemble = name, member = %member, "joined membership group");
        }
        Ok(())
    }

    /// Install the children watch on the local ensemble's group. Called
    /// only after [`Membership::join`] has completed, so the first
    /// snapshot delivered always contains this host's own entry.
    pub async fn watch(&self) -> CoordinationResult<Snapshots> {
        self.local.watch_children(&self.ip_map_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neti_coordination::{MemoryConnector, MemoryEnsemble};
    use neti_core::Realm;

    async fn pair(
        local: &MemoryEnsemble,
        remote: &MemoryEnsemble,
    ) -> CoordinatorPair {
        let connector = MemoryConnector::new();
        connector.register("local:2181", local.clone());
        connector.register("remote:2181", remote.clone());
        // A VPC host: vpc hosts are local, legacy hosts remote.
        CoordinatorPair::connect(&connector, Realm::Vpc, "remote:2181", "local:2181")
            .await
            .unwrap()
    }

    fn tuple() -> AddressTuple {
        AddressTuple {
            public: "1.2.3.4".parse().unwrap(),
            private: "10.0.0.5".parse().unwrap(),
            overlay: "10.99.0.1".parse().unwrap(),
            realm: Realm::Vpc,
        }
    }

    #[tokio::test]
    async fn test_join_publishes_into_both_ensembles() {
        let local = MemoryEnsemble::new();
        let remote = MemoryEnsemble::new();
        let pair = pair(&local, &remote).await;

        let membership = Membership::new(&pair, "/neti/ip_map", &tuple());
        membership.join().await.unwrap();

        for ensemble in [&local, &remote] {
            let inspector = ensemble.client();
            let members = inspector.children("/neti/ip_map").await.unwrap();
            assert_eq!(members.len(), 1);
            assert!(members[0].ends_with(&tuple().encode()));
        }
    }

    #[tokio::test]
    async fn test_first_snapshot_contains_self() {
        let local = MemoryEnsemble::new();
        let remote = MemoryEnsemble::new();
        let pair = pair(&local, &remote).await;

        let membership = Membership::new(&pair, "/neti/ip_map", &tuple());
        membership.join().await.unwrap();

        let mut snapshots = membership.watch().await.unwrap();
        let first = snapshots.recv().await.unwrap();
        assert!(first.iter().any(|entry| entry.ends_with(&tuple().encode())));
    }

    #[tokio::test]
    async fn test_watch_sees_remote_realm_peers_via_local_group() {
        // A legacy peer publishes into our (local) ensemble too; the
        // local view is the union.
        let local = MemoryEnsemble::new();
        let remote = MemoryEnsemble::new();
        let pair = pair(&local, &remote).await;

        let membership = Membership::new(&pair, "/neti/ip_map", &tuple());
        membership.join().await.unwrap();
        let mut snapshots = membership.watch().await.unwrap();
        assert_eq!(snapshots.recv().await.unwrap().len(), 1);

        let legacy_peer = local.client();
        legacy_peer
            .join_group("/neti/ip_map", "9.9.9.9|10.0.0.6|10.99.0.2|0")
            .await
            .unwrap();
        let merged = snapshots.recv().await.unwrap();
        assert_eq!(merged.len(), 2);
    }
}
