use std::collections::BTreeSet;
use std::time::Duration;

use relay_protocol::{DisseminationStrategy, Identity, LookupStrategy};
use relay_registry::ExpectedCounts;

/// Retry and timeout settings for talking to the discovery leader.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Sleep between checks for the leader node, and between retries.
    pub leader_poll_interval: Duration,

    /// Checks for the leader node before giving up.
    pub leader_wait_attempts: usize,

    /// How long one request may wait for its reply.
    pub request_timeout: Duration,

    /// Attempts per request, across leader changes.
    pub request_attempts: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            leader_poll_interval: Duration::from_millis(100),
            leader_wait_attempts: 100,
            request_timeout: Duration::from_secs(1),
            request_attempts: 10,
        }
    }
}

/// Options shared by publishers, subscribers and brokers.
#[derive(Clone, Debug)]
pub struct ParticipantConfig {
    /// Who this participant is.
    pub identity: Identity,

    /// Topics published or subscribed to. Ignored by the broker.
    pub topics: BTreeSet<String>,

    /// Direct or via the broker.
    pub dissemination: DisseminationStrategy,

    /// Discovery requests or coordination nodes.
    pub lookup: LookupStrategy,

    /// Readiness thresholds, used when lookups are coordinated.
    pub expected: ExpectedCounts,

    /// Time between publication rounds.
    pub publish_interval: Duration,

    /// Publication rounds, messages received or messages relayed before the
    /// event loop stops. `None` runs until shutdown.
    pub iterations: Option<u64>,

    /// Sleep between readiness polls.
    pub ready_poll_interval: Duration,

    /// Discovery client settings.
    pub client: ClientOptions,
}

impl ParticipantConfig {
    /// Creates a config with default timings.
    pub fn new<I, S>(identity: Identity, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity,
            topics: topics.into_iter().map(Into::into).collect(),
            dissemination: DisseminationStrategy::default(),
            lookup: LookupStrategy::default(),
            expected: ExpectedCounts::default(),
            publish_interval: Duration::from_secs(1),
            iterations: None,
            ready_poll_interval: Duration::from_millis(200),
            client: ClientOptions::default(),
        }
    }

    /// Sets the dissemination strategy.
    #[must_use]
    pub const fn with_dissemination(mut self, dissemination: DisseminationStrategy) -> Self {
        self.dissemination = dissemination;
        self
    }

    /// Sets the lookup strategy and the thresholds it needs.
    #[must_use]
    pub const fn with_lookup(mut self, lookup: LookupStrategy, expected: ExpectedCounts) -> Self {
        self.lookup = lookup;
        self.expected = expected;
        self
    }

    /// Publishes `frequency` rounds per second.
    #[must_use]
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        if frequency > 0.0 {
            self.publish_interval = Duration::from_secs_f64(1.0 / frequency);
        }
        self
    }

    /// Bounds the event loop.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: Option<u64>) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub const fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    /// Sets discovery client options.
    #[must_use]
    pub fn with_client(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }
}
