use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::{Stream, stream};
use relay_coordination::{ChildrenEvent, ChildrenWatch, Coordinator, NodeEvent, NodeWatch};
use relay_protocol::{
    DisseminationStrategy, Identity, LeaderPointer, Role, TopicMessage, paths,
};
use relay_transport::{SubscribeChannel, Transport};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ParticipantConfig;
use crate::directory::read_records;
use crate::error::Error;
use crate::handler::ParticipantHandler;
use crate::lifecycle::Lifecycle;
use crate::middleware::{Middleware, Participant, next_or_pending};

/// Receives messages for its topics, straight from publishers or through the
/// broker.
pub struct Subscriber<C, T>
where
    C: Coordinator,
    T: Transport,
{
    broker_watch: Option<NodeWatch>,
    channel: T::SubscribeChannel,
    middleware: Middleware<C, T>,
    publisher_watch: Option<ChildrenWatch>,
    received: u64,
    sources: BTreeMap<String, Identity>,
}

impl<C, T> Debug for Subscriber<C, T>
where
    C: Coordinator,
    T: Transport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("channel", &self.channel)
            .field("middleware", &self.middleware)
            .field("received", &self.received)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl<C, T> Subscriber<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Creates a subscriber.
    pub fn new(config: ParticipantConfig, coordinator: C, transport: T) -> Self {
        let channel = transport.subscribe_channel();

        Self {
            broker_watch: None,
            channel,
            middleware: Middleware::new(config, coordinator, transport),
            publisher_watch: None,
            received: 0,
            sources: BTreeMap::new(),
        }
    }

    /// Messages received so far.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Endpoints the subscribe channel is connected to, by id.
    #[must_use]
    pub const fn sources(&self) -> &BTreeMap<String, Identity> {
        &self.sources
    }

    /// Turns a registered subscriber into the stream of messages it
    /// receives. The stream waits for readiness on first poll, ends on
    /// `shutdown`, and ends after yielding an error.
    pub fn into_messages(
        self,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = Result<TopicMessage, Error>> + Send {
        stream::unfold(Some((self, shutdown)), |state| async move {
            let (mut subscriber, shutdown) = state?;

            if subscriber.middleware.lifecycle() != Lifecycle::Active {
                match subscriber.activate(&shutdown).await {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some((Err(e), None)),
                }
            }

            match subscriber.receive(&shutdown).await {
                Ok(Some(message)) => Some((Ok(message), Some((subscriber, shutdown)))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Waits for readiness, resolves the endpoints for the configured topics
    /// and starts watching for new ones. Returns false on shutdown.
    async fn activate(&mut self, shutdown: &CancellationToken) -> Result<bool, Error> {
        if !self.middleware.wait_until_ready(shutdown).await? {
            return Ok(false);
        }

        let interval = self.middleware.config().ready_poll_interval;

        // Broker dissemination answers not ready until a broker registers.
        loop {
            let response = self.middleware.lookup_by_topic().await?;
            if response.ready {
                for identity in response.publishers {
                    self.connect(identity).await?;
                }
                break;
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(false),
                event = self.middleware.leader_event() => {
                    self.middleware.follow_leader(event).await?;
                }
                () = sleep(interval) => {}
            }
        }

        self.report_sources();

        let coordinator = self.middleware.coordinator();
        match self.middleware.config().dissemination {
            DisseminationStrategy::Direct => {
                self.publisher_watch = Some(
                    coordinator
                        .watch_children(paths::PUBLISHERS)
                        .await
                        .map_err(Error::coordination)?,
                );
            }
            DisseminationStrategy::Broker => {
                self.broker_watch = Some(
                    coordinator
                        .watch(paths::BROKER)
                        .await
                        .map_err(Error::coordination)?,
                );
            }
        }

        Ok(true)
    }

    /// Waits for the next message, handling leader and source changes in
    /// between. `None` on shutdown.
    async fn receive(&mut self, shutdown: &CancellationToken) -> Result<Option<TopicMessage>, Error> {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown token cancelled, exiting subscriber loop");
                    return Ok(None);
                }
                event = self.middleware.leader_event() => {
                    self.middleware.follow_leader(event).await?;
                }
                event = next_or_pending(&mut self.publisher_watch) => {
                    self.on_publishers_changed(event.ok_or(Error::SessionClosed)?).await?;
                }
                event = next_or_pending(&mut self.broker_watch) => {
                    self.on_broker_changed(event.ok_or(Error::SessionClosed)?).await?;
                }
                received = self.channel.recv() => {
                    let bytes = received.map_err(Error::transport)?;

                    match TopicMessage::decode(&bytes) {
                        Ok(message) => {
                            self.received += 1;
                            self.middleware.handler().on_message(&message);
                            return Ok(Some(message));
                        }
                        Err(e) => warn!("dropping malformed message: {}", e),
                    }
                }
            }
        }
    }

    async fn on_publishers_changed(&mut self, event: ChildrenEvent) -> Result<(), Error> {
        let unknown: Vec<String> = event
            .children
            .into_iter()
            .filter(|id| !self.sources.contains_key(id))
            .collect();

        let records =
            read_records(self.middleware.coordinator(), paths::PUBLISHERS, unknown).await?;

        let mut added = false;
        for record in records {
            if record.topics.is_disjoint(&self.middleware.config().topics) {
                debug!("{} publishes none of our topics", record.identity);
                continue;
            }

            self.connect(record.identity).await?;
            added = true;
        }

        if added {
            self.report_sources();
        }

        Ok(())
    }

    async fn on_broker_changed(&mut self, event: NodeEvent) -> Result<(), Error> {
        let Some(data) = event.data else {
            warn!("broker went away, waiting for a successor");
            return Ok(());
        };

        let pointer = LeaderPointer::try_from(data)?;
        if self.sources.contains_key(&pointer.identity.id) {
            return Ok(());
        }

        info!("broker changed to {}", pointer.identity);

        // In broker mode every source is a broker.
        let superseded = std::mem::take(&mut self.sources);
        for broker in superseded.into_values() {
            self.channel
                .disconnect(&broker.endpoint())
                .await
                .map_err(Error::transport)?;
            debug!("{} dropped superseded broker {}", self.middleware.identity(), broker);
        }

        self.connect(pointer.identity).await?;
        self.report_sources();

        Ok(())
    }

    async fn connect(&mut self, identity: Identity) -> Result<(), Error> {
        self.channel
            .connect(&identity.endpoint())
            .await
            .map_err(Error::transport)?;

        info!("{} connected to {}", self.middleware.identity(), identity);
        self.sources.insert(identity.id.clone(), identity);

        Ok(())
    }

    fn report_sources(&mut self) {
        let sources: Vec<Identity> = self.sources.values().cloned().collect();
        self.middleware.handler().on_publisher_set_changed(&sources);
    }
}

#[async_trait]
impl<C, T> Participant for Subscriber<C, T>
where
    C: Coordinator,
    T: Transport,
{
    async fn configure(&mut self) -> Result<(), Error> {
        self.middleware.configure().await?;

        for topic in &self.middleware.config().topics {
            self.channel.subscribe(TopicMessage::topic_filter(topic));
        }

        Ok(())
    }

    async fn register(&mut self) -> Result<(), Error> {
        self.middleware.register(Role::Subscriber).await
    }

    async fn is_ready(&mut self) -> Result<bool, Error> {
        self.middleware.is_ready().await
    }

    async fn event_loop(&mut self, shutdown: CancellationToken) -> Result<(), Error> {
        if !self.activate(&shutdown).await? {
            return Ok(());
        }

        let limit = self.middleware.config().iterations;
        while limit.is_none_or(|limit| self.received < limit) {
            if self.receive(&shutdown).await?.is_none() {
                return Ok(());
            }
        }

        info!(
            "{} received {} messages, stopping",
            self.middleware.identity(),
            self.received
        );

        Ok(())
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
