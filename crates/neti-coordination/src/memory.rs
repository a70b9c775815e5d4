//! In-process coordination ensemble
//!
//! A complete [`Coordinator`] implementation backed by process memory,
//! honoring the ordering, durability and ephemerality contract of the
//! trait: creates are atomic under concurrent sessions, ephemeral nodes
//! vanish when their session ends, and children watches deliver a fresh
//! replace-semantic snapshot on every change. Used by the test suites and
//! handy for local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::coordinator::{
    Connector, Coordinator, Durability, Snapshots, ancestor_paths, parent_path,
};
use crate::error::{CoordinationError, CoordinationResult};

#[derive(Debug, Clone)]
struct Node {
    data: String,
    /// Owning session, set only for ephemeral nodes
    owner: Option<u64>,
}

struct WatchEntry {
    parent: String,
    session: u64,
    tx: mpsc::UnboundedSender<Vec<String>>,
}

#[derive(Default)]
struct Shared {
    nodes: Mutex<BTreeMap<String, Node>>,
    watches: Mutex<Vec<WatchEntry>>,
    sessions: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl Shared {
    fn children_of(nodes: &BTreeMap<String, Node>, parent: &str) -> Vec<String> {
        let prefix = format!("{parent}/");
        nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, _)| path[prefix.len()..].to_string())
            .collect()
    }

    /// Deliver a fresh snapshot of `parent`'s children to its watchers,
    /// pruning watchers whose receiver is gone
    fn notify(&self, parent: &str) {
        let snapshot = {
            let nodes = self.nodes.lock().unwrap();
            Self::children_of(&nodes, parent)
        };
        let mut watches = self.watches.lock().unwrap();
        watches.retain(|entry| {
            entry.parent != parent || entry.tx.send(snapshot.clone()).is_ok()
        });
    }

    /// End one session: drop its ephemeral nodes and close its watches
    fn expire_session(&self, session: u64) {
        if let Some(alive) = self.sessions.lock().unwrap().remove(&session) {
            alive.store(false, Ordering::SeqCst);
        }

        let affected: Vec<String> = {
            let mut nodes = self.nodes.lock().unwrap();
            let doomed: Vec<String> = nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &doomed {
                nodes.remove(path);
            }
            doomed
                .iter()
                .filter_map(|path| parent_path(path).map(str::to_string))
                .collect()
        };

        self.watches
            .lock()
            .unwrap()
            .retain(|entry| entry.session != session);

        for parent in affected {
            self.notify(&parent);
        }
    }
}

/// A shared in-memory ensemble; cloning yields a handle to the same store
#[derive(Clone, Default)]
pub struct MemoryEnsemble {
    shared: Arc<Shared>,
    next_session: Arc<AtomicU64>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this ensemble
    pub fn client(&self) -> MemoryCoordinator {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.shared
            .sessions
            .lock()
            .unwrap()
            .insert(session, Arc::clone(&alive));
        MemoryCoordinator {
            shared: Arc::clone(&self.shared),
            session,
            alive,
        }
    }

    /// Kill every live session, as an ensemble outage would: ephemeral
    /// nodes vanish and all watch streams close
    pub fn disconnect_all(&self) {
        let sessions: Vec<u64> = self.shared.sessions.lock().unwrap().keys().copied().collect();
        for session in sessions {
            self.shared.expire_session(session);
        }
    }

    /// Peek at a node's data without a session (test inspection)
    pub fn data_at(&self, path: &str) -> Option<String> {
        self.shared
            .nodes
            .lock()
            .unwrap()
            .get(path)
            .map(|node| node.data.clone())
    }
}

/// One session against a [`MemoryEnsemble`]
pub struct MemoryCoordinator {
    shared: Arc<Shared>,
    session: u64,
    alive: Arc<AtomicBool>,
}

impl MemoryCoordinator {
    /// End this session explicitly (dropping the last handle does the same)
    pub fn expire(&self) {
        self.shared.expire_session(self.session);
    }

    fn check_alive(&self) -> CoordinationResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinationError::SessionLost(format!(
                "memory session {} expired",
                self.session
            )))
        }
    }

    fn create_node(&self, path: &str, data: &str, durability: Durability) -> CoordinationResult<()> {
        {
            let mut nodes = self.shared.nodes.lock().unwrap();
            if let Some(parent) = parent_path(path) {
                if !nodes.contains_key(parent) {
                    return Err(CoordinationError::NoNode(parent.to_string()));
                }
            }
            if nodes.contains_key(path) {
                return Err(CoordinationError::NodeExists(path.to_string()));
            }
            let owner = match durability {
                Durability::Ephemeral => Some(self.session),
                Durability::Durable => None,
            };
            nodes.insert(path.to_string(), Node { data: data.to_string(), owner });
        }
        if let Some(parent) = parent_path(path) {
            self.shared.notify(parent);
        }
        Ok(())
    }
}

impl Drop for MemoryCoordinator {
    fn drop(&mut self) {
        self.shared.expire_session(self.session);
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn create(
        &self,
        path: &str,
        data: &str,
        durability: Durability,
    ) -> CoordinationResult<()> {
        self.check_alive()?;
        self.create_node(path, data, durability)
    }

    async fn get(&self, path: &str) -> CoordinationResult<String> {
        self.check_alive()?;
        let nodes = self.shared.nodes.lock().unwrap();
        nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn set(&self, path: &str, data: &str) -> CoordinationResult<()> {
        self.check_alive()?;
        let mut nodes = self.shared.nodes.lock().unwrap();
        match nodes.get_mut(path) {
            Some(node) => {
                node.data = data.to_string();
                Ok(())
            }
            None => Err(CoordinationError::NoNode(path.to_string())),
        }
    }

    async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        self.check_alive()?;
        for prefix in ancestor_paths(path) {
            match self.create_node(&prefix, "", Durability::Durable) {
                Ok(()) | Err(CoordinationError::NodeExists(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.check_alive()?;
        let nodes = self.shared.nodes.lock().unwrap();
        if !nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(Shared::children_of(&nodes, path))
    }

    async fn watch_children(&self, path: &str) -> CoordinationResult<Snapshots> {
        self.check_alive()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let nodes = self.shared.nodes.lock().unwrap();
            if !nodes.contains_key(path) {
                return Err(CoordinationError::NoNode(path.to_string()));
            }
            // Initial snapshot under the lock, so no change can slip
            // between the snapshot and the watch registration.
            let _ = tx.send(Shared::children_of(&nodes, path));
            self.shared.watches.lock().unwrap().push(WatchEntry {
                parent: path.to_string(),
                session: self.session,
                tx,
            });
        }
        Ok(rx)
    }

    async fn join_group(&self, parent: &str, identifier: &str) -> CoordinationResult<String> {
        self.check_alive()?;
        let name = format!("{}-{identifier}", Uuid::new_v4().simple());
        self.create_node(&format!("{parent}/{name}"), "", Durability::Ephemeral)?;
        Ok(name)
    }
}

/// Hands out sessions to pre-registered [`MemoryEnsemble`]s, keyed by the
/// endpoint string production code would pass to a real connector
#[derive(Default)]
pub struct MemoryConnector {
    ensembles: Mutex<HashMap<String, MemoryEnsemble>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an endpoint string to an ensemble
    pub fn register(&self, hosts: &str, ensemble: MemoryEnsemble) {
        self.ensembles
            .lock()
            .unwrap()
            .insert(hosts.to_string(), ensemble);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, hosts: &str) -> CoordinationResult<Arc<dyn Coordinator>> {
        let ensembles = self.ensembles.lock().unwrap();
        let ensemble = ensembles.get(hosts).ok_or_else(|| {
            CoordinationError::Transport(format!("no in-memory ensemble registered for {hosts}"))
        })?;
        Ok(Arc::new(ensemble.client()))
    }
}
