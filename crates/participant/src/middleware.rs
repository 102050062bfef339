use std::fmt::Debug;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use relay_coordination::{Coordinator, NodeEvent};
use relay_protocol::{Identity, LookupResponse, RegistrationRecord, Role};
use relay_transport::Transport;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ParticipantConfig;
use crate::directory::Directory;
use crate::error::Error;
use crate::handler::{NoopHandler, ParticipantHandler};
use crate::lifecycle::Lifecycle;

/// Capabilities shared by publishers, subscribers and brokers.
#[async_trait]
pub trait Participant: Debug + Send {
    /// Resolves the directory and prepares channels.
    async fn configure(&mut self) -> Result<(), Error>;

    /// Registers with the directory. A rejection is fatal.
    async fn register(&mut self) -> Result<(), Error>;

    /// Polls readiness once.
    async fn is_ready(&mut self) -> Result<bool, Error>;

    /// Waits for readiness, then publishes, receives or relays until the
    /// configured iteration bound or `shutdown`.
    async fn event_loop(&mut self, shutdown: CancellationToken) -> Result<(), Error>;

    /// Installs the application callbacks.
    fn set_upcall_handle(&mut self, handler: Box<dyn ParticipantHandler>);

    /// Who this participant is.
    fn identity(&self) -> &Identity;

    /// Current lifecycle state.
    fn lifecycle(&self) -> Lifecycle;

    /// Configures, registers and runs the event loop.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), Error> {
        self.configure().await?;

        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("shutdown token cancelled before registration completed");
                return Ok(());
            }
            registered = self.register() => registered?,
        }

        self.event_loop(shutdown).await
    }
}

/// State and plumbing every role composes: configuration, the coordination
/// session, the transport, the directory and the lifecycle.
pub struct Middleware<C, T>
where
    C: Coordinator,
    T: Transport,
{
    config: ParticipantConfig,
    coordinator: C,
    directory: Option<Directory<C, T>>,
    handler: Box<dyn ParticipantHandler>,
    lifecycle: Lifecycle,
    transport: T,
}

impl<C, T> Debug for Middleware<C, T>
where
    C: Coordinator,
    T: Transport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("identity", &self.config.identity)
            .field("lifecycle", &self.lifecycle)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl<C, T> Middleware<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Creates an unconfigured middleware with a no-op handler.
    pub fn new(config: ParticipantConfig, coordinator: C, transport: T) -> Self {
        Self {
            config,
            coordinator,
            directory: None,
            handler: Box::new(NoopHandler),
            lifecycle: Lifecycle::Init,
            transport,
        }
    }

    /// The participant's configuration.
    #[must_use]
    pub const fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Shorthand for the configured identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.config.identity
    }

    /// The participant's coordination session.
    #[must_use]
    pub const fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// The participant's transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Replaces the upcall handler.
    pub fn set_handler(&mut self, handler: Box<dyn ParticipantHandler>) {
        self.handler = handler;
    }

    /// The upcall handler.
    pub fn handler(&mut self) -> &mut dyn ParticipantHandler {
        self.handler.as_mut()
    }

    /// Opens the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if called twice or if no discovery leader appears.
    pub async fn configure(&mut self) -> Result<(), Error> {
        let next = self.lifecycle.transition(Lifecycle::Configured)?;

        self.directory = Some(
            Directory::open(&self.config, self.coordinator.clone(), &self.transport).await?,
        );
        self.lifecycle = next;

        info!(
            "{} configured ({} lookup, {} dissemination)",
            self.config.identity, self.config.lookup, self.config.dissemination
        );

        Ok(())
    }

    /// Registers under `role`. Publishers also advertise their record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationConflict`] if the directory rejects the
    /// registration, or any discovery failure.
    pub async fn register(&mut self, role: Role) -> Result<(), Error> {
        self.lifecycle = self.lifecycle.transition(Lifecycle::Registering)?;

        let topics = match role {
            Role::Broker => Default::default(),
            Role::Publisher | Role::Subscriber => self.config.topics.clone(),
        };
        let record = RegistrationRecord::new(self.config.identity.clone(), role, topics);

        let Some(directory) = self.directory.as_mut() else {
            return Err(Error::NotConfigured);
        };

        let response = directory.register(record.clone()).await?;
        self.handler.on_register_response(&response);

        if !response.is_accepted() {
            error!("{} registration rejected: {}", record.identity, response.reason);
            return Err(Error::RegistrationConflict(response.reason));
        }

        if role == Role::Publisher {
            directory.advertise(&record).await?;
        }

        self.lifecycle = self.lifecycle.transition(Lifecycle::WaitingReady)?;
        info!("{} registered as {}", record.identity, role);

        Ok(())
    }

    /// Polls readiness once and reports it to the handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory fails.
    pub async fn is_ready(&mut self) -> Result<bool, Error> {
        let ready = self.directory()?.is_ready().await?;
        self.handler.on_ready_response(ready);

        Ok(ready)
    }

    /// Polls readiness until it holds, following leader changes between
    /// polls, and then becomes active. Returns false on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the participant has not registered or the
    /// directory fails.
    pub async fn wait_until_ready(&mut self, shutdown: &CancellationToken) -> Result<bool, Error> {
        let interval = self.config.ready_poll_interval;

        loop {
            if self.is_ready().await? {
                self.lifecycle = self.lifecycle.transition(Lifecycle::Active)?;
                info!("{} is active", self.config.identity);
                return Ok(true);
            }

            debug!("{} waiting for readiness", self.config.identity);

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(false),
                event = self.leader_event() => self.follow_leader(event).await?,
                () = sleep(interval) => {}
            }
        }
    }

    /// Looks up endpoints for the configured topics and reports the answer
    /// to the handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory fails.
    pub async fn lookup_by_topic(&mut self) -> Result<LookupResponse, Error> {
        let Some(directory) = self.directory.as_mut() else {
            return Err(Error::NotConfigured);
        };

        let response = directory.lookup_by_topic(&self.config.topics).await?;
        self.handler.on_lookup_response(&response);

        Ok(response)
    }

    /// Lists every publisher and reports the answer to the handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory fails.
    pub async fn lookup_all_publishers(&mut self) -> Result<LookupResponse, Error> {
        let response = self.directory()?.lookup_all_publishers().await?;
        self.handler.on_lookup_response(&response);

        Ok(response)
    }

    /// Next discovery leader notification; pends while there is none to
    /// follow. Cancel safe.
    pub async fn leader_event(&mut self) -> Option<NodeEvent> {
        match self.directory.as_mut() {
            Some(directory) => directory.leader_event().await,
            None => std::future::pending().await,
        }
    }

    /// Acts on the output of [`Self::leader_event`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the watch ended, or an error if
    /// the request channel cannot be reconnected.
    pub async fn follow_leader(&mut self, event: Option<NodeEvent>) -> Result<(), Error> {
        let event = event.ok_or(Error::SessionClosed)?;
        self.directory()?.follow(event).await
    }

    fn directory(&mut self) -> Result<&mut Directory<C, T>, Error> {
        self.directory.as_mut().ok_or(Error::NotConfigured)
    }
}

/// Next item of an optional stream; pends forever while there is no stream.
pub(crate) async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use relay_coordination_memory::{MemoryCoordinator, MemoryEnsemble};
    use relay_protocol::{LookupStrategy, RegisterResponse};
    use relay_registry::ExpectedCounts;
    use relay_transport_memory::MemoryTransport;

    #[derive(Default)]
    struct Recorder {
        registrations: Arc<Mutex<Vec<RegisterResponse>>>,
        ready: Arc<Mutex<Vec<bool>>>,
    }

    impl ParticipantHandler for Recorder {
        fn on_register_response(&mut self, response: &RegisterResponse) {
            self.registrations.lock().unwrap().push(response.clone());
        }

        fn on_ready_response(&mut self, ready: bool) {
            self.ready.lock().unwrap().push(ready);
        }
    }

    fn middleware(
        ensemble: &MemoryEnsemble,
        id: &str,
        expected: ExpectedCounts,
    ) -> Middleware<MemoryCoordinator, MemoryTransport> {
        let config = ParticipantConfig::new(Identity::new(id, "127.0.0.1", 5570), ["t"])
            .with_lookup(LookupStrategy::Coordinated, expected);

        Middleware::new(config, ensemble.connect(), MemoryTransport::default())
    }

    #[tokio::test]
    async fn test_lifecycle_through_activation() {
        let ensemble = MemoryEnsemble::new();
        let mut publisher = middleware(&ensemble, "P1", ExpectedCounts::new(1, 0));

        let recorder = Recorder::default();
        let registrations = recorder.registrations.clone();
        let ready = recorder.ready.clone();
        publisher.set_handler(Box::new(recorder));

        assert_matches!(
            publisher.register(Role::Publisher).await,
            Err(Error::InvalidTransition { .. })
        );

        publisher.configure().await.unwrap();
        publisher.register(Role::Publisher).await.unwrap();
        assert_eq!(publisher.lifecycle(), Lifecycle::WaitingReady);

        assert!(
            publisher
                .wait_until_ready(&CancellationToken::new())
                .await
                .unwrap()
        );
        assert_eq!(publisher.lifecycle(), Lifecycle::Active);

        assert_eq!(registrations.lock().unwrap().len(), 1);
        assert_eq!(*ready.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_conflict_is_fatal() {
        let ensemble = MemoryEnsemble::new();
        let mut first = middleware(&ensemble, "P1", ExpectedCounts::default());
        let mut second = middleware(&ensemble, "P1", ExpectedCounts::default());

        first.configure().await.unwrap();
        first.register(Role::Publisher).await.unwrap();

        second.configure().await.unwrap();
        assert_matches!(
            second.register(Role::Publisher).await,
            Err(Error::RegistrationConflict(reason)) if reason.contains("not unique")
        );
        assert_eq!(second.lifecycle(), Lifecycle::Registering);
    }

    #[tokio::test]
    async fn test_wait_stops_on_shutdown() {
        let ensemble = MemoryEnsemble::new();
        let mut subscriber = middleware(&ensemble, "S1", ExpectedCounts::new(5, 5));
        subscriber.configure().await.unwrap();
        subscriber.register(Role::Subscriber).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(!subscriber.wait_until_ready(&shutdown).await.unwrap());
        assert_eq!(subscriber.lifecycle(), Lifecycle::WaitingReady);
    }
}
