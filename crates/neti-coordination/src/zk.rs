//! ZooKeeper-backed coordination sessions
//!
//! Production [`Coordinator`] implementation over `zookeeper-client`. One
//! [`ZkCoordinator`] wraps one client session; the agent holds two, one
//! per realm ensemble. ZooKeeper child watches are one-shot, so the
//! children watch re-arms itself after every event and forwards each
//! fresh snapshot into the channel; when re-arming fails the stream ends,
//! which the supervisor treats as session loss.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use zookeeper_client as zk;

use crate::coordinator::{Connector, Coordinator, Durability, Snapshots, ancestor_paths};
use crate::error::{CoordinationError, CoordinationResult};

/// One session to a ZooKeeper ensemble
pub struct ZkCoordinator {
    client: zk::Client,
}

impl ZkCoordinator {
    /// Connect to a comma-separated list of ensemble endpoints
    pub async fn connect(hosts: &str) -> CoordinationResult<Self> {
        let client = zk::Client::connect(hosts)
            .await
            .map_err(|err| CoordinationError::Transport(err.to_string()))?;
        debug!(hosts, "coordination session established");
        Ok(Self { client })
    }
}

fn map_zk_error(path: &str, err: zk::Error) -> CoordinationError {
    match err {
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::SessionExpired => CoordinationError::SessionLost(err.to_string()),
        other => CoordinationError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Coordinator for ZkCoordinator {
    async fn create(
        &self,
        path: &str,
        data: &str,
        durability: Durability,
    ) -> CoordinationResult<()> {
        let mode = match durability {
            Durability::Durable => zk::CreateMode::Persistent,
            Durability::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = mode.with_acls(zk::Acls::anyone_all());
        self.client
            .create(path, data.as_bytes(), &options)
            .await
            .map(|_| ())
            .map_err(|err| map_zk_error(path, err))
    }

    async fn get(&self, path: &str) -> CoordinationResult<String> {
        let (data, _stat) = self
            .client
            .get_data(path)
            .await
            .map_err(|err| map_zk_error(path, err))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn set(&self, path: &str, data: &str) -> CoordinationResult<()> {
        self.client
            .set_data(path, data.as_bytes(), None)
            .await
            .map(|_| ())
            .map_err(|err| map_zk_error(path, err))
    }

    async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        for prefix in ancestor_paths(path) {
            match self.create(&prefix, "", Durability::Durable).await {
                Ok(()) | Err(CoordinationError::NodeExists(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.client
            .list_children(path)
            .await
            .map_err(|err| map_zk_error(path, err))
    }

    async fn watch_children(&self, path: &str) -> CoordinationResult<Snapshots> {
        // Arm the first watch before returning so a missing path surfaces
        // here rather than as a silently empty stream.
        let (children, _stat, watcher) = self
            .client
            .get_and_watch_children(path)
            .await
            .map_err(|err| map_zk_error(path, err))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(children);

        let client = self.client.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut watcher = watcher;
            loop {
                let event = watcher.changed().await;
                debug!(path = %path, event_type = ?event.event_type, "children watch fired");
                // Re-arm and forward the fresh snapshot. Redelivery of an
                // unchanged snapshot (e.g. after a reconnect event) is
                // harmless under the replace-semantic contract.
                match client.get_and_watch_children(&path).await {
                    Ok((children, _stat, next)) => {
                        watcher = next;
                        if tx.send(children).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(path = %path, error = %err, "children watch ended");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn join_group(&self, parent: &str, identifier: &str) -> CoordinationResult<String> {
        let name = format!("{}-{identifier}", Uuid::new_v4().simple());
        self.create(&format!("{parent}/{name}"), "", Durability::Ephemeral)
            .await?;
        Ok(name)
    }
}

/// Production [`Connector`] yielding ZooKeeper sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct ZkConnector;

#[async_trait]
impl Connector for ZkConnector {
    async fn connect(&self, hosts: &str) -> CoordinationResult<Arc<dyn Coordinator>> {
        Ok(Arc::new(ZkCoordinator::connect(hosts).await?))
    }
}
