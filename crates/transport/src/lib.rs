//! Abstract request/reply and publish/subscribe channels.
//!
//! Addresses are opaque `host:port` strings. Concrete transports (in-process,
//! sockets) live in separate crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Broad categories of transport failures callers branch on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// Nothing is listening at the address.
    Unreachable,

    /// The channel has no endpoint to talk to.
    NotConnected,

    /// Another channel is already bound to the address.
    AddressInUse,

    /// The peer went away mid-exchange.
    Closed,

    /// Anything else.
    Other,
}

/// Marker trait for transport errors
pub trait TransportError: Debug + Error + Send + Sync + 'static {
    /// The category of this error.
    fn kind(&self) -> TransportErrorKind;
}

/// Client side of request/reply. One outstanding request at a time.
#[async_trait]
pub trait RequestChannel: Debug + Send + Sync + 'static {
    /// The error type for this channel.
    type Error: TransportError;

    /// Adds an endpoint. Connecting twice to the same address is a no-op.
    async fn connect(&mut self, address: &str) -> Result<(), Self::Error>;

    /// Removes an endpoint. Unknown addresses are ignored.
    async fn disconnect(&mut self, address: &str) -> Result<(), Self::Error>;

    /// Currently connected endpoints.
    fn endpoints(&self) -> Vec<String>;

    /// Sends a request and waits for its reply.
    async fn request(&mut self, payload: Bytes) -> Result<Bytes, Self::Error>;
}

/// Sends the reply for one received request.
#[async_trait]
pub trait Responder: Send + 'static {
    /// The error type for replying.
    type Error: TransportError;

    /// Delivers the reply.
    async fn reply(self, payload: Bytes) -> Result<(), Self::Error>;
}

/// Server side of request/reply.
#[async_trait]
pub trait ReplyChannel: Debug + Send + 'static {
    /// The error type for this channel.
    type Error: TransportError;

    /// Handle used to answer a received request.
    type Responder: Responder<Error = Self::Error>;

    /// The bound address.
    fn address(&self) -> &str;

    /// Waits for the next request. Cancel safe.
    async fn recv(&mut self) -> Result<(Bytes, Self::Responder), Self::Error>;
}

/// Fire-and-forget fan-out to every connected subscriber.
#[async_trait]
pub trait PublishChannel: Debug + Send + Sync + 'static {
    /// The error type for this channel.
    type Error: TransportError;

    /// The bound address.
    fn address(&self) -> &str;

    /// Publishes a message. Succeeds even with no subscribers.
    async fn publish(&self, message: Bytes) -> Result<(), Self::Error>;
}

/// Receives from any number of publish channels, filtered by prefix.
///
/// A channel with no filters receives nothing; an empty filter receives all.
#[async_trait]
pub trait SubscribeChannel: Debug + Send + 'static {
    /// The error type for this channel.
    type Error: TransportError;

    /// Connects to a publish address. The publisher need not be bound yet.
    async fn connect(&mut self, address: &str) -> Result<(), Self::Error>;

    /// Stops receiving from a publish address. Unknown addresses are ignored.
    async fn disconnect(&mut self, address: &str) -> Result<(), Self::Error>;

    /// Adds a prefix filter.
    fn subscribe(&mut self, filter: Bytes);

    /// Addresses connected so far.
    fn connections(&self) -> Vec<String>;

    /// Waits for the next accepted message. Pends forever while unconnected.
    /// Cancel safe.
    async fn recv(&mut self) -> Result<Bytes, Self::Error>;
}

/// Factory for channels sharing one transport.
#[async_trait]
pub trait Transport: Clone + Debug + Send + Sync + 'static {
    /// The error type for this transport.
    type Error: TransportError;

    /// Request channel type.
    type RequestChannel: RequestChannel<Error = Self::Error>;

    /// Reply channel type.
    type ReplyChannel: ReplyChannel<Error = Self::Error>;

    /// Publish channel type.
    type PublishChannel: PublishChannel<Error = Self::Error>;

    /// Subscribe channel type.
    type SubscribeChannel: SubscribeChannel<Error = Self::Error>;

    /// Creates an unconnected request channel.
    fn request_channel(&self) -> Self::RequestChannel;

    /// Binds a reply channel to `address`.
    async fn bind_reply(&self, address: &str) -> Result<Self::ReplyChannel, Self::Error>;

    /// Binds a publish channel to `address`.
    async fn bind_publish(&self, address: &str) -> Result<Self::PublishChannel, Self::Error>;

    /// Creates an unconnected subscribe channel.
    fn subscribe_channel(&self) -> Self::SubscribeChannel;
}
