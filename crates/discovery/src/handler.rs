use relay_protocol::{
    DisseminationStrategy, Identity, IsReadyResponse, RegisterResponse, RegistrationRecord,
    Request, Response,
};
use relay_registry::{ExpectedCounts, Registry};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::snapshot::DiscoverySnapshot;
use crate::state::DiscoveryState;

/// Discovery's request semantics, independent of any transport.
#[derive(Debug)]
pub struct DiscoveryHandler {
    dissemination: DisseminationStrategy,
    registry: Registry,
    sequence: u64,
    state: DiscoveryState,
}

impl DiscoveryHandler {
    /// Creates an unconfigured handler.
    #[must_use]
    pub fn new(dissemination: DisseminationStrategy) -> Self {
        Self {
            dissemination,
            registry: Registry::default(),
            sequence: 0,
            state: DiscoveryState::Initialized,
        }
    }

    /// Installs the readiness thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler was already configured.
    pub fn configure(&mut self, expected: ExpectedCounts) -> Result<(), Error> {
        self.state = self.state.transition(DiscoveryState::Configuring)?;
        self.registry = Registry::new(expected);
        self.state = self
            .state
            .transition(DiscoveryState::WaitingForRegistrations)?;

        info!(
            "discovery configured: expecting {} publishers, {} subscribers ({} dissemination)",
            expected.publishers, expected.subscribers, self.dissemination
        );

        self.sync_readiness()
    }

    /// Replaces the thresholds and clears readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler was never configured.
    pub fn reconfigure(&mut self, expected: ExpectedCounts) -> Result<(), Error> {
        if !self.state.is_configured() {
            return Err(Error::NotConfigured);
        }

        self.registry.reconfigure(expected);
        if self.state == DiscoveryState::Ready {
            self.state = self
                .state
                .transition(DiscoveryState::WaitingForRegistrations)?;
        }
        self.sequence += 1;

        self.sync_readiness()
    }

    /// Answers one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler is not configured.
    pub fn handle(&mut self, request: Request) -> Result<Response, Error> {
        if !self.state.is_configured() {
            return Err(Error::NotConfigured);
        }

        debug!("handling {} request", request.msg_type());

        let response: Response = match request {
            Request::Register(register) => {
                let record =
                    RegistrationRecord::new(register.identity, register.role, register.topics);
                let who = format!("{} {}", record.role, record.identity);

                match self.registry.register(record) {
                    Ok(()) => {
                        info!("registered {}", who);
                        self.sequence += 1;
                        self.sync_readiness()?;
                        RegisterResponse::accepted().into()
                    }
                    Err(rejection) => {
                        warn!("rejected {}: {}", who, rejection);
                        RegisterResponse::rejected(rejection.to_string()).into()
                    }
                }
            }
            Request::IsReady => IsReadyResponse {
                ready: self.registry.is_ready(),
            }
            .into(),
            Request::LookupByTopic(lookup) => {
                Response::LookupByTopic(
                    self.registry
                        .lookup_response(self.dissemination, &lookup.topics),
                )
            }
            Request::LookupAllPublishers => {
                Response::LookupAllPublishers(self.registry.all_publishers_response())
            }
        };

        Ok(response)
    }

    /// Clears a registered broker that the coordination service no longer
    /// names as the active one. Returns whether anything changed.
    pub fn reconcile_broker(&mut self, active: Option<&Identity>) -> bool {
        let Some(active) = active else {
            return false;
        };

        let stale = self
            .registry
            .broker()
            .is_some_and(|registered| registered.identity.id != active.id);

        if stale {
            info!("broker {} superseded by {}", self.describe_broker(), active);
            self.registry.replace_broker(None);
            self.sequence += 1;
        }

        stale
    }

    /// Captures the state replicated to standbys.
    #[must_use]
    pub fn snapshot(&self) -> DiscoverySnapshot {
        DiscoverySnapshot {
            registry: self.registry.snapshot(),
            state: self.state,
            sequence: self.sequence,
        }
    }

    /// Adopts a snapshot if it is newer than the current state.
    pub fn apply_snapshot(&mut self, snapshot: DiscoverySnapshot) -> bool {
        if snapshot.sequence <= self.sequence && self.state.is_configured() {
            return false;
        }

        debug!(
            "applying discovery snapshot {} ({})",
            snapshot.sequence, snapshot.state
        );

        self.registry = Registry::restore(snapshot.registry);
        self.state = snapshot.state;
        self.sequence = snapshot.sequence;

        true
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> DiscoveryState {
        self.state
    }

    /// The registry being served.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutation counter.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    fn sync_readiness(&mut self) -> Result<(), Error> {
        if self.registry.is_ready() && self.state != DiscoveryState::Ready {
            self.state = self.state.transition(DiscoveryState::Ready)?;
            info!("discovery is ready");
        }
        Ok(())
    }

    fn describe_broker(&self) -> String {
        self.registry
            .broker()
            .map_or_else(|| "<none>".to_string(), |b| b.identity.to_string())
    }
}
