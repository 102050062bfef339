use std::collections::BTreeSet;

use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Error;
use crate::identity::{Identity, Role};

/// Discriminator carried by every request.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum MessageType {
    /// See [`Request::Register`].
    Register,

    /// See [`Request::IsReady`].
    IsReady,

    /// See [`Request::LookupByTopic`].
    LookupByTopic,

    /// See [`Request::LookupAllPublishers`].
    LookupAllPublishers,
}

/// Asks discovery to record a participant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegisterRequest {
    /// Role the participant plays.
    pub role: Role,

    /// The participant's identity.
    pub identity: Identity,

    /// Topics published or subscribed to. Empty for the broker.
    pub topics: BTreeSet<String>,
}

/// Asks discovery for publishers of any of the given topics.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LookupByTopicRequest {
    /// Topics of interest.
    pub topics: BTreeSet<String>,
}

/// A request to the discovery leader.
#[derive(Clone, Debug, Deserialize, Eq, From, PartialEq, Serialize)]
pub enum Request {
    /// Register a participant.
    #[from]
    Register(RegisterRequest),

    /// Poll the readiness flag.
    IsReady,

    /// Find publishers by topic.
    #[from]
    LookupByTopic(LookupByTopicRequest),

    /// List every publisher.
    LookupAllPublishers,
}

impl Request {
    /// Builds a registration request.
    pub fn register<I, S>(role: Role, identity: Identity, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Register(RegisterRequest {
            role,
            identity,
            topics: topics.into_iter().map(Into::into).collect(),
        })
    }

    /// Builds a topic lookup request.
    pub fn lookup_by_topic<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::LookupByTopic(LookupByTopicRequest {
            topics: topics.into_iter().map(Into::into).collect(),
        })
    }

    /// The message discriminator.
    #[must_use]
    pub const fn msg_type(&self) -> MessageType {
        match self {
            Self::Register(_) => MessageType::Register,
            Self::IsReady => MessageType::IsReady,
            Self::LookupByTopic(_) => MessageType::LookupByTopic,
            Self::LookupAllPublishers => MessageType::LookupAllPublishers,
        }
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        codec::decode_enveloped(&bytes)
    }
}

impl TryInto<Bytes> for Request {
    type Error = Error;

    fn try_into(self) -> Result<Bytes, Self::Error> {
        codec::encode_enveloped(&self)
    }
}
