//! Abstract interface for the coordination service: a tree of small nodes
//! with ephemeral ownership, exclusive creation and change watches.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod election;

pub use election::{Claim, claim, wait_for_node};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Broad categories of coordination failures callers branch on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoordinatorErrorKind {
    /// An exclusive create found the node already present.
    NodeExists,

    /// The node does not exist.
    NoNode,

    /// The session has ended; ephemeral nodes are gone.
    SessionClosed,

    /// Anything else.
    Other,
}

/// Marker trait for `Coordinator` errors
pub trait CoordinatorError: Debug + Error + Send + Sync + 'static {
    /// The category of this error.
    fn kind(&self) -> CoordinatorErrorKind;
}

/// Lifetime of a created node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateMode {
    /// Lives until deleted.
    Persistent,

    /// Removed automatically when the creating session ends.
    Ephemeral,
}

/// The state of a watched node. `data` is `None` while the node is absent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeEvent {
    /// The watched path.
    pub path: String,

    /// Current contents, if the node exists.
    pub data: Option<Bytes>,
}

/// The child names of a watched node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChildrenEvent {
    /// The watched parent path.
    pub path: String,

    /// Sorted child names (not full paths).
    pub children: Vec<String>,
}

/// Stream of node states, starting with the state at registration.
pub type NodeWatch = BoxStream<'static, NodeEvent>;

/// Stream of child listings, starting with the listing at registration.
pub type ChildrenWatch = BoxStream<'static, ChildrenEvent>;

/// A session with the coordination service.
///
/// Clones share the session. Ephemeral nodes created through any clone are
/// removed, and its watches end, once [`Coordinator::close`] is called.
#[async_trait]
pub trait Coordinator: Clone + Debug + Send + Sync + 'static {
    /// The error type for coordination operations.
    type Error: CoordinatorError;

    /// Identifies this session.
    fn session_id(&self) -> u64;

    /// Creates a node, failing with [`CoordinatorErrorKind::NodeExists`] if
    /// it is already present. Missing parents are created as persistent nodes.
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<(), Self::Error>;

    /// Replaces a node's data, creating a persistent node if absent.
    async fn set(&self, path: &str, data: Bytes) -> Result<(), Self::Error>;

    /// Reads a node.
    async fn get(&self, path: &str) -> Result<Option<Bytes>, Self::Error>;

    /// Whether a node exists.
    async fn exists(&self, path: &str) -> Result<bool, Self::Error> {
        Ok(self.get(path).await?.is_some())
    }

    /// Deletes a node without children.
    async fn delete(&self, path: &str) -> Result<(), Self::Error>;

    /// Lists child names of a node; empty if the node is absent.
    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error>;

    /// Watches a node's existence and data.
    async fn watch(&self, path: &str) -> Result<NodeWatch, Self::Error>;

    /// Watches a node's set of children.
    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch, Self::Error>;

    /// Ends the session.
    async fn close(&self) -> Result<(), Self::Error>;
}
