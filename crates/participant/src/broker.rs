use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use relay_coordination::{ChildrenEvent, ChildrenWatch, Claim, Coordinator, claim};
use relay_protocol::{DisseminationStrategy, Identity, LeaderPointer, Role, TopicMessage, paths};
use relay_transport::{PublishChannel, SubscribeChannel, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ParticipantConfig;
use crate::directory::read_records;
use crate::error::Error;
use crate::handler::ParticipantHandler;
use crate::lifecycle::Lifecycle;
use crate::middleware::{Middleware, Participant, next_or_pending};

/// Relays every publisher's traffic so subscribers need a single
/// connection.
///
/// Candidates compete for `/broker`; only the holder registers, binds its
/// publish channel and relays. Messages are re-published byte-for-byte.
pub struct Broker<C, T>
where
    C: Coordinator,
    T: Transport,
{
    channel: Option<T::PublishChannel>,
    middleware: Middleware<C, T>,
    publisher_watch: Option<ChildrenWatch>,
    relayed: u64,
    upstream: T::SubscribeChannel,
    upstreams: BTreeMap<String, Identity>,
}

impl<C, T> Debug for Broker<C, T>
where
    C: Coordinator,
    T: Transport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("channel", &self.channel)
            .field("middleware", &self.middleware)
            .field("relayed", &self.relayed)
            .field("upstreams", &self.upstreams)
            .finish_non_exhaustive()
    }
}

impl<C, T> Broker<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Creates a broker candidate.
    pub fn new(config: ParticipantConfig, coordinator: C, transport: T) -> Self {
        let upstream = transport.subscribe_channel();

        Self {
            channel: None,
            middleware: Middleware::new(config, coordinator, transport),
            publisher_watch: None,
            relayed: 0,
            upstream,
            upstreams: BTreeMap::new(),
        }
    }

    /// Messages relayed so far.
    #[must_use]
    pub const fn relayed(&self) -> u64 {
        self.relayed
    }

    /// Publishers the broker is connected to, by id.
    #[must_use]
    pub const fn upstreams(&self) -> &BTreeMap<String, Identity> {
        &self.upstreams
    }

    fn relaying(&self) -> bool {
        self.middleware.config().dissemination == DisseminationStrategy::Broker
    }

    /// Waits until this candidate holds `/broker`.
    async fn campaign(&mut self) -> Result<(), Error> {
        let identity = self.middleware.identity();
        let coordinator = self.middleware.coordinator();
        let pointer: Bytes = LeaderPointer::broker(identity.clone()).try_into()?;

        let mut watch = coordinator
            .watch(paths::BROKER)
            .await
            .map_err(Error::coordination)?;

        while let Some(event) = watch.next().await {
            if let Some(data) = event.data {
                if LeaderPointer::try_from(data).is_ok_and(|holder| holder.identity == *identity) {
                    return Ok(());
                }
                debug!("{} is a standby broker", identity);
                continue;
            }

            match claim(coordinator, paths::BROKER, pointer.clone())
                .await
                .map_err(Error::coordination)?
            {
                Claim::Won => {
                    info!("{} elected broker", identity);
                    return Ok(());
                }
                Claim::Lost(_) => debug!("{} lost the broker election", identity),
            }
        }

        Err(Error::SessionClosed)
    }

    async fn relay(&mut self, bytes: Bytes) -> Result<(), Error> {
        let Some(channel) = self.channel.as_ref() else {
            return Err(Error::NotConfigured);
        };

        channel
            .publish(bytes.clone())
            .await
            .map_err(Error::transport)?;
        self.relayed += 1;

        match TopicMessage::decode(&bytes) {
            Ok(message) => self.middleware.handler().on_message(&message),
            Err(e) => debug!("relayed an untagged message: {}", e),
        }

        Ok(())
    }

    async fn on_publishers_changed(&mut self, event: ChildrenEvent) -> Result<(), Error> {
        let unknown: Vec<String> = event
            .children
            .into_iter()
            .filter(|id| !self.upstreams.contains_key(id))
            .collect();

        if unknown.is_empty() {
            return Ok(());
        }

        let records =
            read_records(self.middleware.coordinator(), paths::PUBLISHERS, unknown).await?;
        for record in records {
            self.connect(record.identity).await?;
        }

        let upstreams: Vec<Identity> = self.upstreams.values().cloned().collect();
        self.middleware.handler().on_publisher_set_changed(&upstreams);

        Ok(())
    }

    async fn connect(&mut self, identity: Identity) -> Result<(), Error> {
        self.upstream
            .connect(&identity.endpoint())
            .await
            .map_err(Error::transport)?;

        info!("broker connected to publisher {}", identity);
        self.upstreams.insert(identity.id.clone(), identity);

        Ok(())
    }
}

#[async_trait]
impl<C, T> Participant for Broker<C, T>
where
    C: Coordinator,
    T: Transport,
{
    async fn configure(&mut self) -> Result<(), Error> {
        self.middleware.configure().await?;

        // Relay everything.
        self.upstream.subscribe(Bytes::new());

        Ok(())
    }

    /// Blocks while another candidate holds `/broker`. Does nothing under
    /// direct dissemination.
    async fn register(&mut self) -> Result<(), Error> {
        if !self.relaying() {
            warn!(
                "{} is idle: dissemination is not broker-mediated",
                self.middleware.identity()
            );
            return Ok(());
        }

        self.campaign().await?;

        let address = self.middleware.identity().endpoint();
        self.channel = Some(
            self.middleware
                .transport()
                .bind_publish(&address)
                .await
                .map_err(Error::transport)?,
        );

        self.middleware.register(Role::Broker).await
    }

    async fn is_ready(&mut self) -> Result<bool, Error> {
        self.middleware.is_ready().await
    }

    async fn event_loop(&mut self, shutdown: CancellationToken) -> Result<(), Error> {
        if !self.relaying() {
            return Ok(());
        }

        if !self.middleware.wait_until_ready(&shutdown).await? {
            return Ok(());
        }

        let response = self.middleware.lookup_all_publishers().await?;
        for identity in response.publishers {
            self.connect(identity).await?;
        }

        // Picks up publishers advertised after the lookup.
        self.publisher_watch = Some(
            self.middleware
                .coordinator()
                .watch_children(paths::PUBLISHERS)
                .await
                .map_err(Error::coordination)?,
        );

        let limit = self.middleware.config().iterations;

        loop {
            if limit.is_some_and(|limit| self.relayed >= limit) {
                info!("broker relayed {} messages, stopping", self.relayed);
                return Ok(());
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown token cancelled, exiting broker loop");
                    return Ok(());
                }
                event = self.middleware.leader_event() => {
                    self.middleware.follow_leader(event).await?;
                }
                event = next_or_pending(&mut self.publisher_watch) => {
                    self.on_publishers_changed(event.ok_or(Error::SessionClosed)?).await?;
                }
                received = self.upstream.recv() => {
                    let bytes = received.map_err(Error::transport)?;
                    self.relay(bytes).await?;
                }
            }
        }
    }

    fn set_upcall_handle(&mut self, handler: Box<dyn ParticipantHandler>) {
        self.middleware.set_handler(handler);
    }

    fn identity(&self) -> &Identity {
        self.middleware.identity()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.middleware.lifecycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use relay_coordination_memory::{MemoryCoordinator, MemoryEnsemble};
    use relay_protocol::LookupStrategy;
    use relay_registry::ExpectedCounts;
    use relay_transport_memory::{
        MemoryPublishChannel, MemoryReplyChannel, MemoryRequestChannel, MemorySubscribeChannel,
        MemoryTransport,
    };
    use tokio::time::timeout;

    use crate::publisher::Publisher;

    /// Memory transport whose subscribe channels fail once data arrives.
    #[derive(Clone, Debug, Default)]
    struct BrokenUpstream(MemoryTransport);

    #[derive(Debug)]
    struct BrokenSubscribeChannel(MemorySubscribeChannel);

    #[async_trait]
    impl SubscribeChannel for BrokenSubscribeChannel {
        type Error = relay_transport_memory::Error;

        async fn connect(&mut self, address: &str) -> Result<(), Self::Error> {
            self.0.connect(address).await
        }

        async fn disconnect(&mut self, address: &str) -> Result<(), Self::Error> {
            self.0.disconnect(address).await
        }

        fn subscribe(&mut self, filter: Bytes) {
            self.0.subscribe(filter);
        }

        fn connections(&self) -> Vec<String> {
            self.0.connections()
        }

        async fn recv(&mut self) -> Result<Bytes, Self::Error> {
            self.0.recv().await?;
            Err(relay_transport_memory::Error::Unreachable("upstream".to_string()))
        }
    }

    #[async_trait]
    impl Transport for BrokenUpstream {
        type Error = relay_transport_memory::Error;
        type RequestChannel = MemoryRequestChannel;
        type ReplyChannel = MemoryReplyChannel;
        type PublishChannel = MemoryPublishChannel;
        type SubscribeChannel = BrokenSubscribeChannel;

        fn request_channel(&self) -> Self::RequestChannel {
            self.0.request_channel()
        }

        async fn bind_reply(&self, address: &str) -> Result<Self::ReplyChannel, Self::Error> {
            self.0.bind_reply(address).await
        }

        async fn bind_publish(&self, address: &str) -> Result<Self::PublishChannel, Self::Error> {
            self.0.bind_publish(address).await
        }

        fn subscribe_channel(&self) -> Self::SubscribeChannel {
            BrokenSubscribeChannel(self.0.subscribe_channel())
        }
    }

    fn config(id: &str, port: u16, topics: &[&str]) -> ParticipantConfig {
        ParticipantConfig::new(Identity::new(id, "127.0.0.1", port), topics.iter().copied())
            .with_dissemination(DisseminationStrategy::Broker)
            .with_lookup(LookupStrategy::Coordinated, ExpectedCounts::new(1, 0))
            .with_frequency(100.0)
            .with_ready_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_receive_failure_stops_broker() {
        let _ = tracing_subscriber::fmt::try_init();

        let ensemble = MemoryEnsemble::new();
        let transport = MemoryTransport::default();
        let shutdown = CancellationToken::new();

        let mut publisher: Publisher<MemoryCoordinator, MemoryTransport> =
            Publisher::new(config("P1", 5570, &["t"]), ensemble.connect(), transport.clone());
        let token = shutdown.clone();
        let publisher = tokio::spawn(async move { publisher.run(token).await });

        let mut broker = Broker::new(
            config("B1", 5590, &[]),
            ensemble.connect(),
            BrokenUpstream(transport),
        );

        let result = timeout(Duration::from_secs(5), broker.run(shutdown.clone()))
            .await
            .expect("broker kept running after a receive failure");
        assert_matches!(result, Err(Error::Transport(_)));
        assert_eq!(broker.relayed(), 0);

        shutdown.cancel();
        publisher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_under_direct_dissemination() {
        let ensemble = MemoryEnsemble::new();
        let observer = ensemble.connect();

        let mut broker = Broker::new(
            config("B1", 5590, &[]).with_dissemination(DisseminationStrategy::Direct),
            ensemble.connect(),
            MemoryTransport::default(),
        );

        timeout(Duration::from_secs(1), broker.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert!(observer.get(paths::BROKER).await.unwrap().is_none());
        assert_eq!(broker.lifecycle(), Lifecycle::Configured);
    }
}
