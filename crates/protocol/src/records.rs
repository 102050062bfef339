//! Payloads stored in coordination nodes, and where they live.

use std::collections::BTreeSet;

use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Error;
use crate::identity::{Identity, Role};

/// Well-known coordination paths.
pub mod paths {
    /// Ephemeral node naming the discovery leader.
    pub const LEADER: &str = "/leader";

    /// Ephemeral node naming the active broker.
    pub const BROKER: &str = "/broker";

    /// Parent of the per-publisher ephemeral records.
    pub const PUBLISHERS: &str = "/publisher";

    /// Parent of the per-subscriber ephemeral records.
    pub const SUBSCRIBERS: &str = "/subscriber";

    /// Replicated discovery state.
    pub const DISCOVERY_SNAPSHOT: &str = "/discovery/snapshot";

    /// Record path for a publisher.
    #[must_use]
    pub fn publisher(id: &str) -> String {
        format!("{PUBLISHERS}/{id}")
    }

    /// Record path for a subscriber.
    #[must_use]
    pub fn subscriber(id: &str) -> String {
        format!("{SUBSCRIBERS}/{id}")
    }
}

/// Which singleton a leader pointer names.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum LeaderRole {
    /// The discovery replica answering requests.
    Discovery,

    /// The broker relaying publications.
    Broker,
}

/// Contents of `/leader` and `/broker`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LeaderPointer {
    /// Which singleton this is.
    pub role: LeaderRole,

    /// The elected instance.
    pub identity: Identity,
}

impl LeaderPointer {
    /// Points at a discovery replica.
    #[must_use]
    pub const fn discovery(identity: Identity) -> Self {
        Self {
            role: LeaderRole::Discovery,
            identity,
        }
    }

    /// Points at a broker.
    #[must_use]
    pub const fn broker(identity: Identity) -> Self {
        Self {
            role: LeaderRole::Broker,
            identity,
        }
    }

    /// Where the leader accepts connections.
    #[must_use]
    pub fn reply_address(&self) -> String {
        self.identity.endpoint()
    }
}

/// A participant as stored by discovery, or in a `/publisher/{id}` node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegistrationRecord {
    /// Who registered.
    pub identity: Identity,

    /// Under which role.
    pub role: Role,

    /// For which topics.
    pub topics: BTreeSet<String>,
}

impl RegistrationRecord {
    /// Creates a record.
    pub fn new<I, S>(identity: Identity, role: Role, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity,
            role,
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    /// Shorthand for the identity's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.identity.id
    }
}

macro_rules! impl_cbor_bytes {
    ($ty:ty) => {
        impl TryFrom<Bytes> for $ty {
            type Error = Error;

            fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
                codec::decode_enveloped(&bytes)
            }
        }

        impl TryInto<Bytes> for $ty {
            type Error = Error;

            fn try_into(self) -> Result<Bytes, Self::Error> {
                codec::encode_enveloped(&self)
            }
        }
    };
}

impl_cbor_bytes!(LeaderPointer);
impl_cbor_bytes!(RegistrationRecord);
