//! In-memory (single process) implementation of the coordination service for
//! local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use relay_coordination::{
    ChildrenEvent, ChildrenWatch, Coordinator, CreateMode, NodeEvent, NodeWatch,
};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

#[derive(Debug)]
struct Node {
    data: Bytes,
    owner: Option<u64>,
}

#[derive(Debug)]
struct Watcher<T> {
    session: u64,
    sender: mpsc::UnboundedSender<T>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    node_watchers: HashMap<String, Vec<Watcher<NodeEvent>>>,
    children_watchers: HashMap<String, Vec<Watcher<ChildrenEvent>>>,
    closed_sessions: HashSet<u64>,
}

impl Tree {
    fn ensure_open(&self, session: u64) -> Result<(), Error> {
        if self.closed_sessions.contains(&session) {
            return Err(Error::SessionClosed(session));
        }
        Ok(())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect()
    }

    fn insert(&mut self, path: &str, data: Bytes, owner: Option<u64>) {
        let mut missing = Vec::new();
        let mut current = parent(path);
        while let Some(ancestor) = current {
            if ancestor == "/" || self.nodes.contains_key(ancestor) {
                break;
            }
            missing.push(ancestor.to_string());
            current = parent(ancestor);
        }

        for ancestor in missing.into_iter().rev() {
            self.nodes.insert(
                ancestor.clone(),
                Node {
                    data: Bytes::new(),
                    owner: None,
                },
            );
            self.notify_node(&ancestor, Some(Bytes::new()));
            self.notify_parent(&ancestor);
        }

        self.nodes.insert(path.to_string(), Node { data: data.clone(), owner });
        self.notify_node(path, Some(data));
        self.notify_parent(path);
    }

    fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.notify_node(path, None);
            self.notify_parent(path);
        }
    }

    fn notify_node(&mut self, path: &str, data: Option<Bytes>) {
        if let Some(watchers) = self.node_watchers.get_mut(path) {
            let event = NodeEvent {
                path: path.to_string(),
                data,
            };
            watchers.retain(|watcher| watcher.sender.send(event.clone()).is_ok());
        }
    }

    fn notify_parent(&mut self, path: &str) {
        let Some(parent) = parent(path) else {
            return;
        };

        if !self.children_watchers.contains_key(parent) {
            return;
        }

        let event = ChildrenEvent {
            path: parent.to_string(),
            children: self.children_of(parent),
        };

        if let Some(watchers) = self.children_watchers.get_mut(parent) {
            watchers.retain(|watcher| watcher.sender.send(event.clone()).is_ok());
        }
    }

    fn expire(&mut self, session: u64) -> usize {
        self.closed_sessions.insert(session);

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            self.remove(path);
        }

        for watchers in self.node_watchers.values_mut() {
            watchers.retain(|watcher| watcher.session != session);
        }
        for watchers in self.children_watchers.values_mut() {
            watchers.retain(|watcher| watcher.session != session);
        }

        owned.len()
    }
}

fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }

    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn validate(path: &str) -> Result<(), Error> {
    let valid = path.starts_with('/')
        && (path == "/" || (!path.ends_with('/') && !path[1..].split('/').any(str::is_empty)));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

/// The shared node tree. Each [`MemoryEnsemble::connect`] opens a new session.
#[derive(Clone, Debug, Default)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
    next_session: Arc<AtomicU64>,
}

impl MemoryEnsemble {
    /// Creates an empty ensemble.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session.
    #[must_use]
    pub fn connect(&self) -> MemoryCoordinator {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;

        debug!("opened coordination session {}", session);

        MemoryCoordinator {
            tree: self.tree.clone(),
            session,
        }
    }
}

/// A session against a [`MemoryEnsemble`].
#[derive(Clone, Debug)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
    session: u64,
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    type Error = Error;

    fn session_id(&self) -> u64 {
        self.session
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<(), Self::Error> {
        validate(path)?;
        let mut tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        if tree.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.session),
        };
        tree.insert(path, data, owner);

        Ok(())
    }

    async fn set(&self, path: &str, data: Bytes) -> Result<(), Self::Error> {
        validate(path)?;
        let mut tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        let owner = tree.nodes.get(path).and_then(|node| node.owner);
        tree.insert(path, data, owner);

        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, Self::Error> {
        validate(path)?;
        let tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        Ok(tree.nodes.get(path).map(|node| node.data.clone()))
    }

    async fn delete(&self, path: &str) -> Result<(), Self::Error> {
        validate(path)?;
        let mut tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        if !tree.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !tree.children_of(path).is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        tree.remove(path);

        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error> {
        validate(path)?;
        let tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        Ok(tree.children_of(path))
    }

    async fn watch(&self, path: &str) -> Result<NodeWatch, Self::Error> {
        validate(path)?;
        let mut tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let initial = NodeEvent {
            path: path.to_string(),
            data: tree.nodes.get(path).map(|node| node.data.clone()),
        };
        // Receiver is alive; cannot fail.
        let _ = sender.send(initial);

        tree.node_watchers
            .entry(path.to_string())
            .or_default()
            .push(Watcher {
                session: self.session,
                sender,
            });

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch, Self::Error> {
        validate(path)?;
        let mut tree = self.tree.lock().await;
        tree.ensure_open(self.session)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(ChildrenEvent {
            path: path.to_string(),
            children: tree.children_of(path),
        });

        tree.children_watchers
            .entry(path.to_string())
            .or_default()
            .push(Watcher {
                session: self.session,
                sender,
            });

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut tree = self.tree.lock().await;
        if tree.closed_sessions.contains(&self.session) {
            return Ok(());
        }

        let removed = tree.expire(self.session);
        info!(
            "closed coordination session {} ({} ephemeral nodes removed)",
            self.session, removed
        );

        Ok(())
    }
}
