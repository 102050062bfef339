//! Wire types shared by discovery, publishers, subscribers and the broker.
//!
//! Requests and responses travel CBOR encoded inside a versioned envelope.
//! Topic messages use a plain `topic:publisherId:payload:timestamp` framing so
//! subscribe channels can filter on the topic prefix.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
mod error;
mod identity;
mod message;
mod records;
mod request;
mod response;
mod strategy;

pub use error::{Error, Result};
pub use identity::{Identity, Role};
pub use message::TopicMessage;
pub use records::{LeaderPointer, LeaderRole, RegistrationRecord, paths};
pub use request::{LookupByTopicRequest, MessageType, RegisterRequest, Request};
pub use response::{
    ErrorResponse, IsReadyResponse, LookupResponse, RegisterResponse, Response, Status,
};
pub use strategy::{DisseminationStrategy, LookupStrategy};
