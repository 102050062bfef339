use std::fmt::Debug;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use relay_coordination::{Coordinator, NodeEvent, NodeWatch, wait_for_node};
use relay_protocol::{LeaderPointer, Request, Response, paths};
use relay_transport::{RequestChannel, Transport, TransportError, TransportErrorKind};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::error::Error;
use crate::leader::{LeaderChange, LeaderTracker};

/// Request channel that follows the discovery leader.
///
/// The channel is connected to whatever `/leader` names. Leader changes are
/// picked up either from [`DiscoveryClient::follow`] inside an event loop or
/// lazily before each request; a request that fails because its leader went
/// away is retried against the successor.
pub struct DiscoveryClient<C, T>
where
    C: Coordinator,
    T: Transport,
{
    channel: T::RequestChannel,
    coordinator: C,
    options: ClientOptions,
    tracker: LeaderTracker,
    watch: NodeWatch,
}

impl<C, T> Debug for DiscoveryClient<C, T>
where
    C: Coordinator,
    T: Transport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("channel", &self.channel)
            .field("leader", &self.tracker.current())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C, T> DiscoveryClient<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Watches `/leader` and connects to the current leader, waiting a
    /// bounded time for one to be elected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaderUnavailable`] if no leader appears in time, or
    /// any coordination failure.
    pub async fn connect(coordinator: C, transport: &T, options: ClientOptions) -> Result<Self, Error> {
        let watch = coordinator
            .watch(paths::LEADER)
            .await
            .map_err(Error::coordination)?;

        let mut client = Self {
            channel: transport.request_channel(),
            coordinator,
            options,
            tracker: LeaderTracker::default(),
            watch,
        };
        client.resolve().await?;

        Ok(client)
    }

    /// The leader requests currently go to.
    #[must_use]
    pub const fn leader(&self) -> Option<&LeaderPointer> {
        self.tracker.current()
    }

    /// The session this client watches through.
    #[must_use]
    pub const fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Waits for the next `/leader` notification. `None` once the session
    /// has ended. Cancel safe.
    pub async fn leader_event(&mut self) -> Option<NodeEvent> {
        self.watch.next().await
    }

    /// Reconnects according to a `/leader` notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the request channel cannot be reconnected.
    pub async fn follow(&mut self, event: NodeEvent) -> Result<(), Error> {
        self.apply(event.data).await
    }

    /// Sends a request to the leader and waits for its reply, following
    /// leader changes in between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the leader answered with an error
    /// reply, [`Error::LeaderUnavailable`] once the attempts are exhausted,
    /// or any non-retryable transport failure.
    pub async fn request(&mut self, request: Request) -> Result<Response, Error> {
        let attempts = self.options.request_attempts.max(1);
        let msg_type = request.msg_type();

        for attempt in 1..=attempts {
            self.resolve().await?;

            let payload: Bytes = request.clone().try_into()?;
            match timeout(self.options.request_timeout, self.channel.request(payload)).await {
                Ok(Ok(reply)) => {
                    return match Response::try_from(reply)? {
                        Response::Error(e) => Err(Error::Discovery(e.message)),
                        response => Ok(response),
                    };
                }
                Ok(Err(e)) if retryable(&e) => {
                    warn!("{} request failed (attempt {}/{}): {}", msg_type, attempt, attempts, e);
                }
                Ok(Err(e)) => return Err(Error::transport(e)),
                Err(_) => {
                    warn!("{} request timed out (attempt {}/{})", msg_type, attempt, attempts);
                }
            }

            if attempt < attempts {
                sleep(self.options.leader_poll_interval).await;
            }
        }

        Err(Error::LeaderUnavailable { attempts })
    }

    /// Applies queued notifications, then blocks a bounded time if there is
    /// still no leader.
    async fn resolve(&mut self) -> Result<(), Error> {
        while let Some(event) = self.watch.next().now_or_never() {
            let Some(event) = event else {
                return Err(Error::SessionClosed);
            };
            self.apply(event.data).await?;
        }

        if self.tracker.current().is_some() {
            return Ok(());
        }

        debug!("no discovery leader yet, waiting");

        let data = wait_for_node(
            &self.coordinator,
            paths::LEADER,
            self.options.leader_poll_interval,
            self.options.leader_wait_attempts,
        )
        .await
        .map_err(Error::coordination)?;

        match data {
            Some(data) => self.apply(Some(data)).await,
            None => Err(Error::LeaderUnavailable {
                attempts: self.options.leader_wait_attempts,
            }),
        }
    }

    async fn apply(&mut self, data: Option<Bytes>) -> Result<(), Error> {
        let change = match self.tracker.observe(data) {
            Ok(change) => change,
            Err(e) => {
                warn!("ignoring undecodable leader pointer: {}", e);
                return Ok(());
            }
        };

        match change {
            LeaderChange::Unchanged => {}
            LeaderChange::Elected { previous, current } => {
                if let Some(previous) = previous {
                    self.channel
                        .disconnect(&previous)
                        .await
                        .map_err(Error::transport)?;
                }
                self.channel
                    .connect(&current)
                    .await
                    .map_err(Error::transport)?;

                info!("following discovery leader at {}", current);
            }
            LeaderChange::Vacated { previous } => {
                self.channel
                    .disconnect(&previous)
                    .await
                    .map_err(Error::transport)?;

                warn!("discovery leader at {} went away", previous);
            }
        }

        Ok(())
    }
}

fn retryable(error: &impl TransportError) -> bool {
    matches!(
        error.kind(),
        TransportErrorKind::Unreachable | TransportErrorKind::NotConnected | TransportErrorKind::Closed
    )
}
