use std::fmt::Debug;

use async_trait::async_trait;
use relay_coordination::Coordinator;
use relay_protocol::{Identity, Role, TopicMessage};
use relay_transport::{PublishChannel, Transport};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ParticipantConfig;
use crate::error::Error;
use crate::handler::ParticipantHandler;
use crate::lifecycle::Lifecycle;
use crate::middleware::{Middleware, Participant};

/// Publishes tagged messages for its topics at a fixed rate.
#[derive(Debug)]
pub struct Publisher<C, T>
where
    C: Coordinator,
    T: Transport,
{
    channel: Option<T::PublishChannel>,
    middleware: Middleware<C, T>,
    rounds: u64,
}

impl<C, T> Publisher<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Creates a publisher.
    pub fn new(config: ParticipantConfig, coordinator: C, transport: T) -> Self {
        Self {
            channel: None,
            middleware: Middleware::new(config, coordinator, transport),
            rounds: 0,
        }
    }

    /// Publication rounds completed.
    #[must_use]
    pub const fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Sends one message on the publish channel. Nobody acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher is not configured, the topic is not
    /// a valid tag, or the transport fails.
    pub async fn disseminate(&mut self, topic: &str, payload: &str) -> Result<(), Error> {
        let Some(channel) = self.channel.as_ref() else {
            return Err(Error::NotConfigured);
        };

        let message = TopicMessage::stamped(topic, &self.middleware.identity().id, payload)?;
        channel
            .publish(message.encode())
            .await
            .map_err(Error::transport)
    }

    async fn publish_round(&mut self) -> Result<(), Error> {
        let iteration = self.rounds;
        let topics: Vec<String> = self.middleware.config().topics.iter().cloned().collect();

        for topic in topics {
            let payload = self.middleware.handler().payload_for(&topic, iteration);
            self.disseminate(&topic, &payload).await?;
        }

        self.rounds += 1;
        debug!("{} finished round {}", self.middleware.identity(), iteration);

        Ok(())
    }
}

#[async_trait]
impl<C, T> Participant for Publisher<C, T>
where
    C: Coordinator,
    T: Transport,
{
    async fn configure(&mut self) -> Result<(), Error> {
        self.middleware.configure().await?;

        let address = self.middleware.identity().endpoint();
        self.channel = Some(
            self.middleware
                .transport()
                .bind_publish(&address)
                .await
                .map_err(Error::transport)?,
        );

        Ok(())
    }

    async fn register(&mut self) -> Result<(), Error> {
        self.middleware.register(Role::Publisher).await
    }

    async fn is_ready(&mut self) -> Result<bool, Error> {
        self.middleware.is_ready().await
    }

    async fn event_loop(&mut self, shutdown: CancellationToken) -> Result<(), Error> {
        if !self.middleware.wait_until_ready(&shutdown).await? {
            return Ok(());
        }

        let limit = self.middleware.config().iterations;
        let mut ticker = interval(self.middleware.config().publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if limit.is_some_and(|limit| self.rounds >= limit) {
                info!(
                    "{} published {} rounds, stopping",
                    self.middleware.identity(),
                    self.rounds
                );
                return Ok(());
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown token cancelled, exiting publisher loop");
                    return Ok(());
                }
                event = self.middleware.leader_event() => {
                    self.middleware.follow_leader(event).await?;
                }
                _ = ticker.tick() => self.publish_round().await?,
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
