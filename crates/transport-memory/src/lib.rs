//! In-memory transport implementation for testing
//!
//! Channels created from the same [`MemoryTransport`] (or its clones) can
//! reach each other by address; separate transports are isolated.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use relay_transport::{
    PublishChannel, ReplyChannel, RequestChannel, Responder, SubscribeChannel, Transport,
};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

/// Configuration for memory transport
#[derive(Clone, Debug)]
pub struct MemoryOptions {
    /// Messages buffered per publish address before slow subscribers lag.
    pub publish_capacity: usize,

    /// Requests queued per reply address.
    pub request_capacity: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            publish_capacity: 1024,
            request_capacity: 64,
        }
    }
}

struct PendingRequest {
    payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

#[derive(Debug)]
struct PublishSlot {
    sender: broadcast::Sender<Bytes>,
    bound: Arc<AtomicBool>,
}

#[derive(Default)]
struct Hub {
    repliers: DashMap<String, flume::Sender<PendingRequest>>,
    publishers: DashMap<String, PublishSlot>,
}

impl Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("repliers", &self.repliers.len())
            .field("publishers", &self.publishers.len())
            .finish()
    }
}

impl Hub {
    fn publish_sender(
        &self,
        address: &str,
        capacity: usize,
    ) -> (broadcast::Sender<Bytes>, Arc<AtomicBool>) {
        let slot = self
            .publishers
            .entry(address.to_string())
            .or_insert_with(|| PublishSlot {
                sender: broadcast::channel(capacity).0,
                bound: Arc::new(AtomicBool::new(false)),
            });

        (slot.sender.clone(), slot.bound.clone())
    }
}

/// Memory transport implementation
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    options: MemoryOptions,
}

impl MemoryTransport {
    /// Create a new memory transport with options
    #[must_use]
    pub fn new(options: MemoryOptions) -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            options,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;
    type RequestChannel = MemoryRequestChannel;
    type ReplyChannel = MemoryReplyChannel;
    type PublishChannel = MemoryPublishChannel;
    type SubscribeChannel = MemorySubscribeChannel;

    fn request_channel(&self) -> Self::RequestChannel {
        MemoryRequestChannel {
            hub: self.hub.clone(),
            endpoints: Vec::new(),
            next: 0,
        }
    }

    async fn bind_reply(&self, address: &str) -> Result<Self::ReplyChannel, Self::Error> {
        if let Some(existing) = self.hub.repliers.get(address) {
            if !existing.is_disconnected() {
                return Err(Error::AddressInUse(address.to_string()));
            }
        }

        let (sender, receiver) = flume::bounded(self.options.request_capacity);
        self.hub.repliers.insert(address.to_string(), sender);

        info!("reply channel bound at {}", address);

        Ok(MemoryReplyChannel {
            address: address.to_string(),
            receiver,
        })
    }

    async fn bind_publish(&self, address: &str) -> Result<Self::PublishChannel, Self::Error> {
        let (sender, bound) = self
            .hub
            .publish_sender(address, self.options.publish_capacity);

        if bound.swap(true, Ordering::AcqRel) {
            return Err(Error::AddressInUse(address.to_string()));
        }

        info!("publish channel bound at {}", address);

        Ok(MemoryPublishChannel {
            address: address.to_string(),
            sender,
            bound,
        })
    }

    fn subscribe_channel(&self) -> Self::SubscribeChannel {
        MemorySubscribeChannel {
            hub: self.hub.clone(),
            capacity: self.options.publish_capacity,
            streams: StreamMap::new(),
            filters: Vec::new(),
        }
    }
}

/// Request side of a memory request/reply pair.
#[derive(Debug)]
pub struct MemoryRequestChannel {
    hub: Arc<Hub>,
    endpoints: Vec<String>,
    next: usize,
}

#[async_trait]
impl RequestChannel for MemoryRequestChannel {
    type Error = Error;

    async fn connect(&mut self, address: &str) -> Result<(), Self::Error> {
        if !self.endpoints.iter().any(|e| e == address) {
            debug!("request channel connected to {}", address);
            self.endpoints.push(address.to_string());
        }
        Ok(())
    }

    async fn disconnect(&mut self, address: &str) -> Result<(), Self::Error> {
        self.endpoints.retain(|e| e != address);
        debug!("request channel disconnected from {}", address);
        Ok(())
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    async fn request(&mut self, payload: Bytes) -> Result<Bytes, Self::Error> {
        if self.endpoints.is_empty() {
            return Err(Error::NotConnected);
        }

        let address = self.endpoints[self.next % self.endpoints.len()].clone();
        self.next = self.next.wrapping_add(1);

        let sender = self
            .hub
            .repliers
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Unreachable(address.clone()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send_async(PendingRequest { payload, reply })
            .await
            .map_err(|_| Error::Unreachable(address.clone()))?;

        response.await.map_err(|_| Error::NoReply(address))
    }
}

/// Reply side of a memory request/reply pair.
pub struct MemoryReplyChannel {
    address: String,
    receiver: flume::Receiver<PendingRequest>,
}

impl Debug for MemoryReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryReplyChannel")
            .field("address", &self.address)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

#[async_trait]
impl ReplyChannel for MemoryReplyChannel {
    type Error = Error;
    type Responder = MemoryResponder;

    fn address(&self) -> &str {
        &self.address
    }

    async fn recv(&mut self) -> Result<(Bytes, Self::Responder), Self::Error> {
        // The hub holds a sender for as long as this channel is bound.
        let pending = self
            .receiver
            .recv_async()
            .await
            .map_err(|_| Error::Unreachable(self.address.clone()))?;

        Ok((
            pending.payload,
            MemoryResponder {
                reply: pending.reply,
            },
        ))
    }
}

/// Answers one request received on a [`MemoryReplyChannel`].
#[derive(Debug)]
pub struct MemoryResponder {
    reply: oneshot::Sender<Bytes>,
}

#[async_trait]
impl Responder for MemoryResponder {
    type Error = Error;

    async fn reply(self, payload: Bytes) -> Result<(), Self::Error> {
        self.reply.send(payload).map_err(|_| Error::RequesterGone)
    }
}

/// Publish side of memory pub/sub.
#[derive(Debug)]
pub struct MemoryPublishChannel {
    address: String,
    sender: broadcast::Sender<Bytes>,
    bound: Arc<AtomicBool>,
}

impl Drop for MemoryPublishChannel {
    fn drop(&mut self) {
        self.bound.store(false, Ordering::Release);
    }
}

#[async_trait]
impl PublishChannel for MemoryPublishChannel {
    type Error = Error;

    fn address(&self) -> &str {
        &self.address
    }

    async fn publish(&self, message: Bytes) -> Result<(), Self::Error> {
        // Sending with no live receivers is not an error for pub/sub.
        let _ = self.sender.send(message);
        Ok(())
    }
}

/// Subscribe side of memory pub/sub.
pub struct MemorySubscribeChannel {
    hub: Arc<Hub>,
    capacity: usize,
    streams: StreamMap<String, BroadcastStream<Bytes>>,
    filters: Vec<Bytes>,
}

impl Debug for MemorySubscribeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubscribeChannel")
            .field("connections", &self.connections())
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl MemorySubscribeChannel {
    fn accepts(&self, message: &Bytes) -> bool {
        self.filters.iter().any(|filter| message.starts_with(filter))
    }
}

#[async_trait]
impl SubscribeChannel for MemorySubscribeChannel {
    type Error = Error;

    async fn connect(&mut self, address: &str) -> Result<(), Self::Error> {
        if self.streams.contains_key(address) {
            return Ok(());
        }

        let (sender, _) = self.hub.publish_sender(address, self.capacity);
        self.streams
            .insert(address.to_string(), BroadcastStream::new(sender.subscribe()));

        debug!("subscribe channel connected to {}", address);

        Ok(())
    }

    async fn disconnect(&mut self, address: &str) -> Result<(), Self::Error> {
        if self.streams.remove(address).is_some() {
            debug!("subscribe channel disconnected from {}", address);
        }

        Ok(())
    }

    fn subscribe(&mut self, filter: Bytes) {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
    }

    fn connections(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    async fn recv(&mut self) -> Result<Bytes, Self::Error> {
        loop {
            let Some((address, item)) = self.streams.next().await else {
                return std::future::pending().await;
            };

            match item {
                Ok(message) if self.accepts(&message) => return Ok(message),
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("subscriber lagged behind {} by {} messages", address, skipped);
                }
            }
        }
    }
}
