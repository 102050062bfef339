use relay_coordination::CoordinatorError;
use relay_transport::TransportError;
use thiserror::Error;

use crate::state::DiscoveryState;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordination service failure.
    #[error("coordination error: {0}")]
    Coordination(String),

    /// A state change the machine does not allow.
    #[error("invalid discovery state transition from {from} to {to}")]
    InvalidTransition {
        /// State before.
        from: DiscoveryState,
        /// Requested state.
        to: DiscoveryState,
    },

    /// A request arrived before expected counts were configured.
    #[error("discovery is not configured")]
    NotConfigured,

    /// Malformed message or payload.
    #[error(transparent)]
    Protocol(#[from] relay_protocol::Error),

    /// The coordination session ended underneath the service.
    #[error("coordination session closed")]
    SessionClosed,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    pub(crate) fn coordination(error: impl CoordinatorError) -> Self {
        Self::Coordination(error.to_string())
    }

    pub(crate) fn transport(error: impl TransportError) -> Self {
        Self::Transport(error.to_string())
    }
}
