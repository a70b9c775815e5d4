//! The coordination-session abstraction and the realm pair
//!
//! [`Coordinator`] is the contract both the ZooKeeper client and the
//! in-memory fake implement. The watch contract is replace-semantic and
//! edge-triggered: every change to a watched node's child set delivers a
//! complete fresh snapshot of child names, the current snapshot is
//! delivered first, and closure of the stream means the session is gone.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use neti_core::Realm;

use crate::error::{CoordinationError, CoordinationResult};

/// Stream of replace-semantic child-list snapshots from a children watch.
///
/// Receiving `None` means the watch (and with it the session) ended.
pub type Snapshots = mpsc::UnboundedReceiver<Vec<String>>;

/// Whether a node survives the session that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// The node persists across sessions
    Durable,
    /// The node vanishes automatically when its session ends
    Ephemeral,
}

/// One session to a coordination ensemble
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Create `path` holding `data`. Fails with
    /// [`CoordinationError::NodeExists`] if the node is already there and
    /// [`CoordinationError::NoNode`] if its parent is missing.
    async fn create(&self, path: &str, data: &str, durability: Durability)
    -> CoordinationResult<()>;

    /// Read the data stored at `path`
    async fn get(&self, path: &str) -> CoordinationResult<String>;

    /// Overwrite the data stored at `path`
    async fn set(&self, path: &str, data: &str) -> CoordinationResult<()>;

    /// Create `path` and any missing parents as durable nodes; existing
    /// nodes are left untouched
    async fn ensure_path(&self, path: &str) -> CoordinationResult<()>;

    /// List the names of the children of `path`
    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Watch the children of `path`. The current child set is delivered
    /// immediately; every subsequent change delivers a fresh snapshot.
    async fn watch_children(&self, path: &str) -> CoordinationResult<Snapshots>;

    /// Join the group under `parent` as an ephemeral member carrying
    /// `identifier`, returning the member's node name
    /// (`<uuid>-<identifier>`, unique suffix first)
    async fn join_group(&self, parent: &str, identifier: &str) -> CoordinationResult<String>;
}

/// Builds sessions from an endpoint string; the seam that lets the
/// supervisor re-establish sessions after a loss and lets tests hand out
/// in-memory ones
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, hosts: &str) -> CoordinationResult<Arc<dyn Coordinator>>;
}

/// The two independent sessions the agent holds: one to the ensemble
/// serving its own realm, one to the other realm's ensemble
pub struct CoordinatorPair {
    local: Arc<dyn Coordinator>,
    remote: Arc<dyn Coordinator>,
}

impl CoordinatorPair {
    /// Open both sessions, picking which endpoints are local by `realm`
    pub async fn connect(
        connector: &dyn Connector,
        realm: Realm,
        legacy_hosts: &str,
        vpc_hosts: &str,
    ) -> CoordinationResult<Self> {
        let (local_hosts, remote_hosts) = match realm {
            Realm::Vpc => (vpc_hosts, legacy_hosts),
            Realm::Legacy => (legacy_hosts, vpc_hosts),
        };
        let local = connector.connect(local_hosts).await?;
        let remote = connector.connect(remote_hosts).await?;
        Ok(Self { local, remote })
    }

    /// The session to this host's own realm
    pub fn local(&self) -> Arc<dyn Coordinator> {
        Arc::clone(&self.local)
    }

    /// The session to the other realm
    pub fn remote(&self) -> Arc<dyn Coordinator> {
        Arc::clone(&self.remote)
    }
}

/// Split an absolute path into its ancestor prefixes, shortest first,
/// excluding the root: `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub(crate) fn ancestor_paths(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current.push('/');
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Parent of an absolute path, if it has one below the root
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 { None } else { Some(&path[..idx]) }
}
