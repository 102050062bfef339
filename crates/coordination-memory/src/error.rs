use relay_coordination::{CoordinatorError, CoordinatorErrorKind};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Exclusive create of an existing node.
    #[error("node {0} already exists")]
    NodeExists(String),

    /// Operation on a missing node.
    #[error("node {0} does not exist")]
    NoNode(String),

    /// Delete of a node that still has children.
    #[error("node {0} has children")]
    NotEmpty(String),

    /// Path is not absolute or has empty segments.
    #[error("invalid path `{0}`")]
    InvalidPath(String),

    /// The session was closed.
    #[error("session {0} is closed")]
    SessionClosed(u64),
}

impl CoordinatorError for Error {
    fn kind(&self) -> CoordinatorErrorKind {
        match self {
            Self::NodeExists(_) => CoordinatorErrorKind::NodeExists,
            Self::NoNode(_) => CoordinatorErrorKind::NoNode,
            Self::SessionClosed(_) => CoordinatorErrorKind::SessionClosed,
            Self::NotEmpty(_) | Self::InvalidPath(_) => CoordinatorErrorKind::Other,
        }
    }
}
