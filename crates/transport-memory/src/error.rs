use relay_transport::{TransportError, TransportErrorKind};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// No reply channel is bound at the address.
    #[error("no listener at {0}")]
    Unreachable(String),

    /// The request channel has no endpoints.
    #[error("request channel is not connected")]
    NotConnected,

    /// A live channel is already bound at the address.
    #[error("address {0} already in use")]
    AddressInUse(String),

    /// The server dropped the request without replying.
    #[error("no reply from {0}")]
    NoReply(String),

    /// The requester stopped waiting before the reply was sent.
    #[error("requester went away")]
    RequesterGone,
}

impl TransportError for Error {
    fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Unreachable(_) => TransportErrorKind::Unreachable,
            Self::NotConnected => TransportErrorKind::NotConnected,
            Self::AddressInUse(_) => TransportErrorKind::AddressInUse,
            Self::NoReply(_) | Self::RequesterGone => TransportErrorKind::Closed,
        }
    }
}
