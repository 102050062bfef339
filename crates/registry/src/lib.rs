//! Participant registry and topic index.
//!
//! Pure state: no I/O. Owned by the discovery leader, or rebuilt from
//! coordination nodes by each participant when lookups are coordinated.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Rejection;

use std::collections::{BTreeMap, BTreeSet};

use relay_protocol::{
    DisseminationStrategy, Identity, LookupResponse, RegistrationRecord, Role,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How many participants must register before the system is ready.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExpectedCounts {
    /// Required publishers.
    pub publishers: usize,

    /// Required subscribers.
    pub subscribers: usize,
}

impl ExpectedCounts {
    /// Creates expected counts.
    #[must_use]
    pub const fn new(publishers: usize, subscribers: usize) -> Self {
        Self {
            publishers,
            subscribers,
        }
    }
}

/// Serializable registry contents. The topic index is derived on restore.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    /// Registered publishers.
    pub publishers: Vec<RegistrationRecord>,

    /// Registered subscribers.
    pub subscribers: Vec<RegistrationRecord>,

    /// The registered broker.
    pub broker: Option<RegistrationRecord>,

    /// Readiness thresholds.
    pub expected: ExpectedCounts,

    /// The readiness flag at snapshot time.
    pub ready: bool,
}

/// Registered participants, the derived topic index and the readiness flag.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    publishers: BTreeMap<String, RegistrationRecord>,
    subscribers: BTreeMap<String, RegistrationRecord>,
    broker: Option<RegistrationRecord>,
    topic_index: BTreeMap<String, BTreeSet<String>>,
    expected: ExpectedCounts,
    ready: bool,
}

impl Registry {
    /// Creates an empty registry. With zero expectations it is ready at once.
    #[must_use]
    pub fn new(expected: ExpectedCounts) -> Self {
        let mut registry = Self {
            expected,
            ..Self::default()
        };
        registry.evaluate_readiness();
        registry
    }

    /// Rebuilds a registry from a snapshot.
    #[must_use]
    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        let mut registry = Self {
            publishers: by_id(snapshot.publishers),
            subscribers: by_id(snapshot.subscribers),
            broker: snapshot.broker,
            topic_index: BTreeMap::new(),
            expected: snapshot.expected,
            ready: snapshot.ready,
        };
        registry.rebuild_index();
        registry.evaluate_readiness();
        registry
    }

    /// Captures the registry contents.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            publishers: self.publishers.values().cloned().collect(),
            subscribers: self.subscribers.values().cloned().collect(),
            broker: self.broker.clone(),
            expected: self.expected,
            ready: self.ready,
        }
    }

    /// Records a participant.
    ///
    /// # Errors
    ///
    /// Rejects a duplicate id within the role, or any broker while one is
    /// already registered.
    pub fn register(&mut self, record: RegistrationRecord) -> Result<(), Rejection> {
        match record.role {
            Role::Publisher => {
                if self.publishers.contains_key(record.id()) {
                    return Err(duplicate(&record));
                }
                debug!("registered publisher {} for {:?}", record.identity, record.topics);
                self.publishers.insert(record.id().to_string(), record);
                self.rebuild_index();
            }
            Role::Subscriber => {
                if self.subscribers.contains_key(record.id()) {
                    return Err(duplicate(&record));
                }
                debug!("registered subscriber {} for {:?}", record.identity, record.topics);
                self.subscribers.insert(record.id().to_string(), record);
            }
            Role::Broker => {
                if let Some(existing) = &self.broker {
                    if existing.id() == record.id() {
                        return Err(duplicate(&record));
                    }
                    return Err(Rejection::BrokerAlreadyRegistered {
                        existing: existing.id().to_string(),
                    });
                }
                debug!("registered broker {}", record.identity);
                self.broker = Some(record);
            }
        }

        self.evaluate_readiness();

        Ok(())
    }

    /// Removes a participant. Readiness is not affected.
    pub fn deregister(&mut self, role: Role, id: &str) -> Option<RegistrationRecord> {
        match role {
            Role::Publisher => {
                let removed = self.publishers.remove(id);
                if removed.is_some() {
                    self.rebuild_index();
                }
                removed
            }
            Role::Subscriber => self.subscribers.remove(id),
            Role::Broker => {
                if self.broker.as_ref().is_some_and(|b| b.id() == id) {
                    self.broker.take()
                } else {
                    None
                }
            }
        }
    }

    /// Replaces the publisher set wholesale, e.g. from coordination children.
    pub fn replace_publishers(&mut self, records: impl IntoIterator<Item = RegistrationRecord>) {
        self.publishers = by_id(records);
        self.rebuild_index();
        self.evaluate_readiness();
    }

    /// Replaces the subscriber set wholesale.
    pub fn replace_subscribers(&mut self, records: impl IntoIterator<Item = RegistrationRecord>) {
        self.subscribers = by_id(records);
        self.evaluate_readiness();
    }

    /// Replaces the broker record.
    pub fn replace_broker(&mut self, broker: Option<RegistrationRecord>) {
        self.broker = broker;
    }

    /// Installs new thresholds and clears the readiness flag before
    /// re-evaluating it. The only way readiness can go back to false.
    pub fn reconfigure(&mut self, expected: ExpectedCounts) {
        info!(
            "reconfiguring registry: expecting {} publishers, {} subscribers",
            expected.publishers, expected.subscribers
        );
        self.expected = expected;
        self.ready = false;
        self.evaluate_readiness();
    }

    /// Publishers advertising any of `topics`, deduplicated, ordered by id.
    pub fn lookup_by_topics<I, S>(&self, topics: I) -> Vec<Identity>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: BTreeSet<&String> = topics
            .into_iter()
            .filter_map(|topic| self.topic_index.get(topic.as_ref()))
            .flatten()
            .collect();

        ids.into_iter()
            .filter_map(|id| self.publishers.get(id))
            .map(|record| record.identity.clone())
            .collect()
    }

    /// The reply to a topic lookup. Empty and not ready until the registry
    /// is ready; under broker dissemination it names the broker instead of
    /// the publishers, and stays not ready while no broker is registered.
    pub fn lookup_response<I, S>(
        &self,
        dissemination: DisseminationStrategy,
        topics: I,
    ) -> LookupResponse
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.ready {
            return LookupResponse::not_ready();
        }

        match dissemination {
            DisseminationStrategy::Direct => LookupResponse {
                ready: true,
                publishers: self.lookup_by_topics(topics),
            },
            DisseminationStrategy::Broker => self.broker.as_ref().map_or_else(
                LookupResponse::not_ready,
                |broker| LookupResponse {
                    ready: true,
                    publishers: vec![broker.identity.clone()],
                },
            ),
        }
    }

    /// The reply to a full publisher listing, gated like [`Self::lookup_response`].
    #[must_use]
    pub fn all_publishers_response(&self) -> LookupResponse {
        if !self.ready {
            return LookupResponse::not_ready();
        }

        LookupResponse {
            ready: true,
            publishers: self.all_publishers(),
        }
    }

    /// Every registered publisher, ordered by id.
    #[must_use]
    pub fn all_publishers(&self) -> Vec<Identity> {
        self.publishers
            .values()
            .map(|record| record.identity.clone())
            .collect()
    }

    /// The registered broker.
    #[must_use]
    pub const fn broker(&self) -> Option<&RegistrationRecord> {
        self.broker.as_ref()
    }

    /// The readiness flag.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Current thresholds.
    #[must_use]
    pub const fn expected(&self) -> ExpectedCounts {
        self.expected
    }

    /// Number of registered publishers.
    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Topic to publisher ids.
    #[must_use]
    pub const fn topic_index(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.topic_index
    }

    fn rebuild_index(&mut self) {
        self.topic_index.clear();
        for (id, record) in &self.publishers {
            for topic in &record.topics {
                self.topic_index
                    .entry(topic.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }

    fn evaluate_readiness(&mut self) {
        if self.ready {
            return;
        }

        if self.publishers.len() >= self.expected.publishers
            && self.subscribers.len() >= self.expected.subscribers
        {
            info!(
                "registry ready with {} publishers and {} subscribers",
                self.publishers.len(),
                self.subscribers.len()
            );
            self.ready = true;
        }
    }
}

fn by_id(
    records: impl IntoIterator<Item = RegistrationRecord>,
) -> BTreeMap<String, RegistrationRecord> {
    records
        .into_iter()
        .map(|record| (record.id().to_string(), record))
        .collect()
}

fn duplicate(record: &RegistrationRecord) -> Rejection {
    Rejection::DuplicateId {
        role: record.role,
        id: record.id().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn publisher(id: &str, topics: &[&str]) -> RegistrationRecord {
        RegistrationRecord::new(
            Identity::new(id, "127.0.0.1", 5570),
            Role::Publisher,
            topics.iter().copied(),
        )
    }

    fn subscriber(id: &str, topics: &[&str]) -> RegistrationRecord {
        RegistrationRecord::new(
            Identity::new(id, "127.0.0.1", 5580),
            Role::Subscriber,
            topics.iter().copied(),
        )
    }

    fn broker(id: &str) -> RegistrationRecord {
        RegistrationRecord::new(
            Identity::new(id, "127.0.0.1", 5590),
            Role::Broker,
            Vec::<String>::new(),
        )
    }

    #[test]
    fn test_duplicate_publisher_rejected() {
        let mut registry = Registry::new(ExpectedCounts::new(2, 0));

        assert!(registry.register(publisher("pub1", &["temperature"])).is_ok());
        assert_matches!(
            registry.register(publisher("pub1", &["light"])),
            Err(Rejection::DuplicateId { role: Role::Publisher, id }) if id == "pub1"
        );

        // The first record is kept, not merged.
        assert_eq!(registry.publisher_count(), 1);
        assert!(registry.lookup_by_topics(["light"]).is_empty());
    }

    #[test]
    fn test_same_id_in_different_roles() {
        let mut registry = Registry::new(ExpectedCounts::default());

        assert!(registry.register(publisher("node1", &["t"])).is_ok());
        assert!(registry.register(subscriber("node1", &["t"])).is_ok());
    }

    #[test]
    fn test_second_broker_rejected() {
        let mut registry = Registry::new(ExpectedCounts::default());

        assert!(registry.register(broker("broker1")).is_ok());
        assert_matches!(
            registry.register(broker("broker2")),
            Err(Rejection::BrokerAlreadyRegistered { existing }) if existing == "broker1"
        );
        assert_eq!(registry.broker().map(RegistrationRecord::id), Some("broker1"));
    }

    #[test]
    fn test_lookup_by_topic() {
        let mut registry = Registry::new(ExpectedCounts::default());
        registry
            .register(publisher("P1", &["temperature", "humidity"]))
            .unwrap();
        registry.register(publisher("P2", &["light"])).unwrap();

        let found = registry.lookup_by_topics(["temperature"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "P1");

        let union = registry.lookup_by_topics(["temperature", "humidity", "light"]);
        let ids: Vec<&str> = union.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);

        assert!(registry.lookup_by_topics(["pressure"]).is_empty());
    }

    #[test]
    fn test_index_tracks_publishers() {
        let mut registry = Registry::new(ExpectedCounts::default());
        registry.register(publisher("P1", &["a", "b"])).unwrap();
        registry.register(publisher("P2", &["b"])).unwrap();

        for (topic, ids) in registry.topic_index() {
            for id in ids {
                let record = registry.publishers.get(id).unwrap();
                assert!(record.topics.contains(topic));
            }
        }

        registry.deregister(Role::Publisher, "P2");
        assert_eq!(
            registry.topic_index().get("b"),
            Some(&BTreeSet::from(["P1".to_string()]))
        );
    }

    #[test]
    fn test_readiness_flips_at_threshold_and_stays() {
        let mut registry = Registry::new(ExpectedCounts::new(2, 1));
        assert!(!registry.is_ready());

        registry.register(publisher("P1", &["t"])).unwrap();
        registry.register(subscriber("S1", &["t"])).unwrap();
        assert!(!registry.is_ready());

        registry.register(publisher("P2", &["t"])).unwrap();
        assert!(registry.is_ready());

        registry.deregister(Role::Publisher, "P2");
        registry.replace_subscribers(Vec::new());
        assert!(registry.is_ready());

        registry.reconfigure(ExpectedCounts::new(2, 1));
        assert!(!registry.is_ready());
    }

    #[test]
    fn test_lookup_response_policy() {
        let mut registry = Registry::new(ExpectedCounts::new(1, 0));
        assert_eq!(
            registry.lookup_response(DisseminationStrategy::Direct, ["t"]),
            LookupResponse::not_ready()
        );

        registry.register(publisher("P1", &["t"])).unwrap();
        let direct = registry.lookup_response(DisseminationStrategy::Direct, ["t"]);
        assert!(direct.ready);
        assert_eq!(direct.publishers[0].id, "P1");

        assert_eq!(
            registry.lookup_response(DisseminationStrategy::Broker, ["t"]),
            LookupResponse::not_ready()
        );
        registry.register(broker("B1")).unwrap();
        let brokered = registry.lookup_response(DisseminationStrategy::Broker, ["t"]);
        assert_eq!(brokered.publishers[0].id, "B1");

        assert_eq!(registry.all_publishers_response().publishers.len(), 1);
    }

    #[test]
    fn test_zero_expectations_are_ready() {
        assert!(Registry::new(ExpectedCounts::default()).is_ready());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut registry = Registry::new(ExpectedCounts::new(1, 1));
        registry.register(publisher("P1", &["t"])).unwrap();
        registry.register(subscriber("S1", &["t"])).unwrap();
        registry.register(broker("B1")).unwrap();

        let restored = Registry::restore(registry.snapshot());

        assert!(restored.is_ready());
        assert_eq!(restored.topic_index(), registry.topic_index());
        assert_eq!(restored.broker(), registry.broker());
        assert_eq!(restored.snapshot(), registry.snapshot());
    }

    #[test]
    fn test_replace_publishers() {
        let mut registry = Registry::new(ExpectedCounts::new(2, 0));

        registry.replace_publishers([publisher("P1", &["a"]), publisher("P2", &["b"])]);
        assert!(registry.is_ready());

        registry.replace_publishers([publisher("P3", &["a"])]);
        let ids: Vec<String> = registry
            .lookup_by_topics(["a", "b"])
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["P3".to_string()]);
        assert!(registry.is_ready());
    }
}
