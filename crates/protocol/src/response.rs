use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Error;
use crate::identity::Identity;

/// Outcome of a registration.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum Status {
    /// The record was stored.
    Success,

    /// The record was refused; see the reason.
    Failure,
}

/// Reply to [`crate::Request::Register`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegisterResponse {
    /// Whether the registration was accepted.
    pub status: Status,

    /// Human readable rejection reason. Empty on success.
    pub reason: String,
}

impl RegisterResponse {
    /// An accepted registration.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            status: Status::Success,
            reason: String::new(),
        }
    }

    /// A rejected registration.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            reason: reason.into(),
        }
    }

    /// Whether the registration was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == Status::Success
    }
}

/// Reply to [`crate::Request::IsReady`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IsReadyResponse {
    /// The readiness flag.
    pub ready: bool,
}

/// Reply to both lookup requests.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LookupResponse {
    /// False until the system is ready; `publishers` is then empty.
    pub ready: bool,

    /// Endpoints to connect to.
    pub publishers: Vec<Identity>,
}

impl LookupResponse {
    /// The reply given before readiness.
    #[must_use]
    pub const fn not_ready() -> Self {
        Self {
            ready: false,
            publishers: Vec::new(),
        }
    }
}

/// Reply to a request that could not be processed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub message: String,
}

/// A reply from the discovery leader.
#[derive(Clone, Debug, Deserialize, Eq, From, PartialEq, Serialize)]
pub enum Response {
    /// Reply to a registration.
    #[from]
    Register(RegisterResponse),

    /// Reply to a readiness poll.
    #[from]
    IsReady(IsReadyResponse),

    /// Reply to a topic lookup.
    LookupByTopic(LookupResponse),

    /// Reply to a full publisher listing.
    LookupAllPublishers(LookupResponse),

    /// The request was malformed or arrived in the wrong state.
    #[from]
    Error(ErrorResponse),
}

impl Response {
    /// Wraps a protocol failure for the wire.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse {
            message: message.into(),
        })
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Error> {
        codec::decode_enveloped(&bytes)
    }
}

impl TryInto<Bytes> for Response {
    type Error = Error;

    fn try_into(self) -> Result<Bytes, Error> {
        codec::encode_enveloped(&self)
    }
}
