use bytes::Bytes;
use futures::StreamExt;
use relay_coordination::{Claim, Coordinator, NodeWatch, claim};
use relay_protocol::{LeaderPointer, Request, Response, Role, paths};
use relay_transport::{ReplyChannel, Responder, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::Error;
use crate::handler::DiscoveryHandler;
use crate::snapshot::DiscoverySnapshot;

enum Tenure {
    Deposed,
    Shutdown,
}

/// One discovery replica.
///
/// Replicas compete for the `/leader` node. The winner binds its reply
/// channel, answers requests and pushes a snapshot after every mutation;
/// standbys apply those snapshots and take over when `/leader` disappears.
#[derive(Debug)]
pub struct DiscoveryService<C, T>
where
    C: Coordinator,
    T: Transport,
{
    config: DiscoveryConfig,
    coordinator: C,
    handler: DiscoveryHandler,
    transport: T,
}

impl<C, T> DiscoveryService<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Creates a replica.
    #[must_use]
    pub fn new(config: DiscoveryConfig, coordinator: C, transport: T) -> Self {
        let handler = DiscoveryHandler::new(config.dissemination);

        Self {
            config,
            coordinator,
            handler,
            transport,
        }
    }

    /// Request handling state.
    #[must_use]
    pub const fn handler(&self) -> &DiscoveryHandler {
        &self.handler
    }

    /// Runs the replica until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the coordination session
    /// ends, or the reply channel cannot be bound or fails.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), Error> {
        self.handler.configure(self.config.expected)?;

        loop {
            if !self.campaign(&shutdown).await? {
                return Ok(());
            }

            match self.lead(&shutdown).await? {
                Tenure::Shutdown => return Ok(()),
                Tenure::Deposed => warn!("{} lost discovery leadership", self.config.identity),
            }
        }
    }

    /// Stays standby until this replica wins `/leader`. Returns false on shutdown.
    async fn campaign(&mut self, shutdown: &CancellationToken) -> Result<bool, Error> {
        let mut leader_watch = self.watch(paths::LEADER).await?;
        let mut snapshot_watch = self.watch(paths::DISCOVERY_SNAPSHOT).await?;

        let pointer: Bytes = LeaderPointer::discovery(self.config.identity.clone()).try_into()?;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown token cancelled, leaving discovery election");
                    return Ok(false);
                }
                Some(event) = snapshot_watch.next() => {
                    if let Some(data) = event.data {
                        self.apply_snapshot(data);
                    }
                }
                event = leader_watch.next() => {
                    let Some(event) = event else {
                        return Err(Error::SessionClosed);
                    };

                    if event.data.is_some() {
                        debug!("{} is standby", self.config.identity);
                        continue;
                    }

                    match claim(&self.coordinator, paths::LEADER, pointer.clone())
                        .await
                        .map_err(Error::coordination)?
                    {
                        Claim::Won => {
                            info!("{} elected discovery leader", self.config.identity);
                            return Ok(true);
                        }
                        Claim::Lost(_) => debug!("{} lost discovery election", self.config.identity),
                    }
                }
            }
        }
    }

    async fn lead(&mut self, shutdown: &CancellationToken) -> Result<Tenure, Error> {
        // Catch up on anything replicated after the last watch event.
        if let Some(data) = self
            .coordinator
            .get(paths::DISCOVERY_SNAPSHOT)
            .await
            .map_err(Error::coordination)?
        {
            self.apply_snapshot(data);
        }

        let address = self.config.identity.endpoint();
        let mut reply_channel = self
            .transport
            .bind_reply(&address)
            .await
            .map_err(Error::transport)?;

        info!("discovery leader serving at {}", address);

        self.replicate().await?;

        let mut leader_watch = self.watch(paths::LEADER).await?;
        let mut broker_watch = self.watch(paths::BROKER).await?;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown token cancelled, exiting discovery loop");
                    return Ok(Tenure::Shutdown);
                }
                event = leader_watch.next() => {
                    let Some(event) = event else {
                        return Err(Error::SessionClosed);
                    };

                    if !self.holds(event.data) {
                        return Ok(Tenure::Deposed);
                    }
                }
                Some(_) = broker_watch.next() => {
                    if self.reconcile_broker().await? {
                        self.replicate().await?;
                    }
                }
                received = reply_channel.recv() => {
                    let (payload, responder) = received.map_err(Error::transport)?;
                    let sequence = self.handler.sequence();

                    let response: Bytes = self.respond(payload).await?.try_into()?;

                    // A mutation is acknowledged only once standbys can see it.
                    if self.handler.sequence() != sequence {
                        if let Err(e) = self.replicate().await {
                            drop(responder);
                            return Err(e);
                        }
                    }

                    if let Err(e) = responder.reply(response).await {
                        warn!("failed to send discovery reply: {}", e);
                    }
                }
            }
        }
    }

    async fn respond(&mut self, payload: Bytes) -> Result<Response, Error> {
        let request = match Request::try_from(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("undecodable discovery request: {}", e);
                return Ok(Response::error(e.to_string()));
            }
        };

        if let Request::Register(register) = &request {
            if register.role == Role::Broker {
                // A successor broker can register before its /broker watch
                // event reaches this loop.
                self.reconcile_broker().await?;
            }
        }

        Ok(self.handler.handle(request).unwrap_or_else(|e| {
            error!("discovery request failed: {}", e);
            Response::error(e.to_string())
        }))
    }

    async fn reconcile_broker(&mut self) -> Result<bool, Error> {
        let active = self
            .coordinator
            .get(paths::BROKER)
            .await
            .map_err(Error::coordination)?
            .and_then(|data| LeaderPointer::try_from(data).ok())
            .map(|pointer| pointer.identity);

        Ok(self.handler.reconcile_broker(active.as_ref()))
    }

    fn holds(&self, data: Option<Bytes>) -> bool {
        data.and_then(|data| LeaderPointer::try_from(data).ok())
            .is_some_and(|pointer| pointer.identity == self.config.identity)
    }

    fn apply_snapshot(&mut self, data: Bytes) {
        match DiscoverySnapshot::try_from(data) {
            Ok(snapshot) => {
                self.handler.apply_snapshot(snapshot);
            }
            Err(e) => warn!("ignoring undecodable discovery snapshot: {}", e),
        }
    }

    async fn replicate(&self) -> Result<(), Error> {
        let snapshot = self.handler.snapshot();
        let sequence = snapshot.sequence;
        let data: Bytes = snapshot.try_into()?;

        self.coordinator
            .set(paths::DISCOVERY_SNAPSHOT, data)
            .await
            .map_err(Error::coordination)?;

        debug!("replicated discovery snapshot {}", sequence);

        Ok(())
    }

    async fn watch(&self, path: &str) -> Result<NodeWatch, Error> {
        self.coordinator
            .watch(path)
            .await
            .map_err(Error::coordination)
    }
}
