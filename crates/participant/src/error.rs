use relay_coordination::CoordinatorError;
use relay_transport::TransportError;
use thiserror::Error;

use crate::lifecycle::Lifecycle;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordination service failure.
    #[error("coordination error: {0}")]
    Coordination(String),

    /// Discovery answered with an error reply.
    #[error("discovery refused request: {0}")]
    Discovery(String),

    /// A lifecycle step out of order.
    #[error("invalid participant transition from {from} to {to}")]
    InvalidTransition {
        /// State before.
        from: Lifecycle,
        /// Requested state.
        to: Lifecycle,
    },

    /// No discovery leader answered within the retry bound.
    #[error("discovery leader unavailable after {attempts} attempts")]
    LeaderUnavailable {
        /// Attempts made.
        attempts: usize,
    },

    /// An operation needed `configure` first.
    #[error("participant is not configured")]
    NotConfigured,

    /// Malformed message or payload.
    #[error(transparent)]
    Protocol(#[from] relay_protocol::Error),

    /// Registration was rejected.
    #[error("registration rejected: {0}")]
    RegistrationConflict(String),

    /// The coordination session ended underneath the participant.
    #[error("coordination session closed")]
    SessionClosed,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Discovery answered with a reply for a different request.
    #[error("unexpected response from discovery")]
    UnexpectedResponse,
}

impl Error {
    pub(crate) fn coordination(error: impl CoordinatorError) -> Self {
        Self::Coordination(error.to_string())
    }

    pub(crate) fn transport(error: impl TransportError) -> Self {
        Self::Transport(error.to_string())
    }
}
