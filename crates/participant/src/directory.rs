use std::collections::BTreeSet;

use bytes::Bytes;
use relay_coordination::{
    Coordinator, CoordinatorError, CoordinatorErrorKind, CreateMode, NodeEvent,
};
use relay_protocol::{
    DisseminationStrategy, IsReadyResponse, LeaderPointer, LookupResponse, LookupStrategy,
    RegisterResponse, RegistrationRecord, Request, Response, Role, paths,
};
use relay_registry::{ExpectedCounts, Registry, Rejection};
use relay_transport::Transport;
use tracing::{debug, info, warn};

use crate::client::DiscoveryClient;
use crate::config::ParticipantConfig;
use crate::error::Error;

/// Where a participant registers and looks peers up.
#[derive(Debug)]
pub enum Directory<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Requests to the elected discovery replica.
    Centralized(DiscoveryClient<C, T>),

    /// Nodes in the coordination service, read back into a local registry.
    Coordinated(CoordinatedDirectory<C>),
}

impl<C, T> Directory<C, T>
where
    C: Coordinator,
    T: Transport,
{
    /// Opens the directory selected by `config.lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the centralized client cannot find a leader.
    pub async fn open(config: &ParticipantConfig, coordinator: C, transport: &T) -> Result<Self, Error> {
        match config.lookup {
            LookupStrategy::Centralized => Ok(Self::Centralized(
                DiscoveryClient::connect(coordinator, transport, config.client.clone()).await?,
            )),
            LookupStrategy::Coordinated => Ok(Self::Coordinated(CoordinatedDirectory::new(
                coordinator,
                config.expected,
                config.dissemination,
            ))),
        }
    }

    /// Registers a participant.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or coordination failure. Rejections are
    /// returned as a failed [`RegisterResponse`].
    pub async fn register(&mut self, record: RegistrationRecord) -> Result<RegisterResponse, Error> {
        match self {
            Self::Centralized(client) => {
                let request = Request::register(record.role, record.identity, record.topics);
                match client.request(request).await? {
                    Response::Register(response) => Ok(response),
                    _ => Err(Error::UnexpectedResponse),
                }
            }
            Self::Coordinated(directory) => directory.register(record).await,
        }
    }

    /// Publishes a publisher's `/publisher/{id}` record so subscribers and
    /// the broker notice it. Coordinated registration already wrote it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationConflict`] if the node is held by another
    /// session, or any coordination failure.
    pub async fn advertise(&mut self, record: &RegistrationRecord) -> Result<(), Error> {
        match self {
            Self::Centralized(client) => {
                let path = paths::publisher(record.id());
                let data: Bytes = record.clone().try_into()?;

                match client.coordinator().create(&path, data, CreateMode::Ephemeral).await {
                    Ok(()) => {
                        debug!("advertised {} at {}", record.identity, path);
                        Ok(())
                    }
                    Err(e) if e.kind() == CoordinatorErrorKind::NodeExists => Err(
                        Error::RegistrationConflict(format!("{path} is held by another session")),
                    ),
                    Err(e) => Err(Error::coordination(e)),
                }
            }
            Self::Coordinated(_) => Ok(()),
        }
    }

    /// Whether enough participants have registered.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery or the coordination service fails.
    pub async fn is_ready(&mut self) -> Result<bool, Error> {
        match self {
            Self::Centralized(client) => match client.request(Request::IsReady).await? {
                Response::IsReady(IsReadyResponse { ready }) => Ok(ready),
                _ => Err(Error::UnexpectedResponse),
            },
            Self::Coordinated(directory) => {
                directory.refresh().await?;
                Ok(directory.registry.is_ready())
            }
        }
    }

    /// Publishers for `topics`, or the broker in broker dissemination.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery or the coordination service fails.
    pub async fn lookup_by_topic(&mut self, topics: &BTreeSet<String>) -> Result<LookupResponse, Error> {
        match self {
            Self::Centralized(client) => {
                match client.request(Request::lookup_by_topic(topics.iter().cloned())).await? {
                    Response::LookupByTopic(response) => Ok(response),
                    _ => Err(Error::UnexpectedResponse),
                }
            }
            Self::Coordinated(directory) => {
                directory.refresh().await?;
                Ok(directory
                    .registry
                    .lookup_response(directory.dissemination, topics))
            }
        }
    }

    /// Every registered publisher.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery or the coordination service fails.
    pub async fn lookup_all_publishers(&mut self) -> Result<LookupResponse, Error> {
        match self {
            Self::Centralized(client) => match client.request(Request::LookupAllPublishers).await? {
                Response::LookupAllPublishers(response) => Ok(response),
                _ => Err(Error::UnexpectedResponse),
            },
            Self::Coordinated(directory) => {
                directory.refresh().await?;
                Ok(directory.registry.all_publishers_response())
            }
        }
    }

    /// Next discovery leader notification. Pends forever for coordinated
    /// lookups, which have no leader. Cancel safe.
    pub async fn leader_event(&mut self) -> Option<NodeEvent> {
        match self {
            Self::Centralized(client) => client.leader_event().await,
            Self::Coordinated(_) => std::future::pending().await,
        }
    }

    /// Acts on a leader notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the request channel cannot be reconnected.
    pub async fn follow(&mut self, event: NodeEvent) -> Result<(), Error> {
        match self {
            Self::Centralized(client) => client.follow(event).await,
            Self::Coordinated(_) => Ok(()),
        }
    }
}

/// Registration and lookups without a discovery tier.
///
/// Every participant writes its own ephemeral record; readiness and lookups
/// are computed from a registry rebuilt from the coordination children on
/// each query.
#[derive(Debug)]
pub struct CoordinatedDirectory<C>
where
    C: Coordinator,
{
    coordinator: C,
    dissemination: DisseminationStrategy,
    registry: Registry,
}

impl<C> CoordinatedDirectory<C>
where
    C: Coordinator,
{
    /// Creates an empty directory.
    #[must_use]
    pub fn new(coordinator: C, expected: ExpectedCounts, dissemination: DisseminationStrategy) -> Self {
        Self {
            coordinator,
            dissemination,
            registry: Registry::new(expected),
        }
    }

    /// The registry as of the last refresh.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Writes the participant's node.
    ///
    /// Publishers and subscribers create `/publisher/{id}` or
    /// `/subscriber/{id}`; a broker is accepted only if it already holds
    /// `/broker`.
    ///
    /// # Errors
    ///
    /// Returns any coordination failure other than the node existing.
    pub async fn register(&mut self, record: RegistrationRecord) -> Result<RegisterResponse, Error> {
        let path = match record.role {
            Role::Publisher => paths::publisher(record.id()),
            Role::Subscriber => paths::subscriber(record.id()),
            Role::Broker => return self.register_broker(&record).await,
        };

        let rejection = Rejection::DuplicateId {
            role: record.role,
            id: record.id().to_string(),
        };
        let data: Bytes = record.try_into()?;

        match self.coordinator.create(&path, data, CreateMode::Ephemeral).await {
            Ok(()) => {
                info!("registered at {}", path);
                Ok(RegisterResponse::accepted())
            }
            Err(e) if e.kind() == CoordinatorErrorKind::NodeExists => {
                warn!("{} already exists", path);
                Ok(RegisterResponse::rejected(rejection.to_string()))
            }
            Err(e) => Err(Error::coordination(e)),
        }
    }

    async fn register_broker(&self, record: &RegistrationRecord) -> Result<RegisterResponse, Error> {
        let holder = self
            .coordinator
            .get(paths::BROKER)
            .await
            .map_err(Error::coordination)?
            .and_then(|data| LeaderPointer::try_from(data).ok());

        match holder {
            Some(pointer) if pointer.identity == record.identity => Ok(RegisterResponse::accepted()),
            Some(pointer) => Ok(RegisterResponse::rejected(
                Rejection::BrokerAlreadyRegistered {
                    existing: pointer.identity.id,
                }
                .to_string(),
            )),
            None => Ok(RegisterResponse::rejected(format!(
                "{} does not hold {}",
                record.identity,
                paths::BROKER
            ))),
        }
    }

    /// Rebuilds the registry from the coordination tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordination service fails.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let publishers = self.records(paths::PUBLISHERS).await?;
        let subscribers = self.records(paths::SUBSCRIBERS).await?;
        let broker = self
            .coordinator
            .get(paths::BROKER)
            .await
            .map_err(Error::coordination)?
            .and_then(|data| LeaderPointer::try_from(data).ok())
            .map(|pointer| RegistrationRecord::new(pointer.identity, Role::Broker, Vec::<String>::new()));

        self.registry.replace_publishers(publishers);
        self.registry.replace_subscribers(subscribers);
        self.registry.replace_broker(broker);

        Ok(())
    }

    async fn records(&self, parent: &str) -> Result<Vec<RegistrationRecord>, Error> {
        let children = self
            .coordinator
            .children(parent)
            .await
            .map_err(Error::coordination)?;

        read_records(&self.coordinator, parent, children).await
    }
}

/// Reads and decodes the records stored under `parent` for `children`.
/// Children that expired or do not decode are skipped.
pub(crate) async fn read_records<C, I>(
    coordinator: &C,
    parent: &str,
    children: I,
) -> Result<Vec<RegistrationRecord>, Error>
where
    C: Coordinator,
    I: IntoIterator<Item = String> + Send,
    I::IntoIter: Send,
{
    let mut records = Vec::new();
    for child in children {
        let path = format!("{parent}/{child}");

        let Some(data) = coordinator.get(&path).await.map_err(Error::coordination)? else {
            continue;
        };

        match RegistrationRecord::try_from(data) {
            Ok(record) => records.push(record),
            Err(e) => warn!("ignoring undecodable record at {}: {}", path, e),
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    use relay_coordination_memory::MemoryEnsemble;
    use relay_protocol::{Identity, Status};
    use relay_transport_memory::MemoryTransport;

    type Coordinated = Directory<relay_coordination_memory::MemoryCoordinator, MemoryTransport>;

    fn directory(ensemble: &MemoryEnsemble, expected: ExpectedCounts) -> Coordinated {
        Directory::Coordinated(CoordinatedDirectory::new(
            ensemble.connect(),
            expected,
            DisseminationStrategy::Direct,
        ))
    }

    fn record(role: Role, id: &str, port: u16, topics: &[&str]) -> RegistrationRecord {
        RegistrationRecord::new(
            Identity::new(id, "127.0.0.1", port),
            role,
            topics.iter().copied(),
        )
    }

    #[tokio::test]
    async fn test_coordinated_readiness_and_lookup() {
        let ensemble = MemoryEnsemble::new();
        let expected = ExpectedCounts::new(1, 1);
        let mut publisher = directory(&ensemble, expected);
        let mut subscriber = directory(&ensemble, expected);

        assert!(
            publisher
                .register(record(Role::Publisher, "P1", 5570, &["t"]))
                .await
                .unwrap()
                .is_accepted()
        );
        assert!(!subscriber.is_ready().await.unwrap());

        subscriber
            .register(record(Role::Subscriber, "S1", 5580, &["t"]))
            .await
            .unwrap();
        assert!(subscriber.is_ready().await.unwrap());

        let topics = BTreeSet::from(["t".to_string()]);
        let response = subscriber.lookup_by_topic(&topics).await.unwrap();
        assert!(response.ready);
        assert_eq!(response.publishers, vec![Identity::new("P1", "127.0.0.1", 5570)]);
    }

    #[tokio::test]
    async fn test_coordinated_duplicate_is_rejected() {
        let ensemble = MemoryEnsemble::new();
        let mut first = directory(&ensemble, ExpectedCounts::default());
        let mut second = directory(&ensemble, ExpectedCounts::default());

        first
            .register(record(Role::Publisher, "P1", 5570, &["t"]))
            .await
            .unwrap();
        let response = second
            .register(record(Role::Publisher, "P1", 5571, &["t"]))
            .await
            .unwrap();

        assert_eq!(response.status, Status::Failure);
        assert!(response.reason.contains("not unique"));
    }

    #[tokio::test]
    async fn test_coordinated_broker_must_hold_node() {
        let ensemble = MemoryEnsemble::new();
        let b1 = Identity::new("B1", "127.0.0.1", 5590);
        let holder = ensemble.connect();
        holder
            .create(
                paths::BROKER,
                LeaderPointer::broker(b1.clone()).try_into().unwrap(),
                CreateMode::Ephemeral,
            )
            .await
            .unwrap();

        let mut directory = directory(&ensemble, ExpectedCounts::default());
        assert!(
            directory
                .register(RegistrationRecord::new(b1, Role::Broker, Vec::<String>::new()))
                .await
                .unwrap()
                .is_accepted()
        );
        assert_eq!(
            directory
                .register(record(Role::Broker, "B2", 5591, &[]))
                .await
                .unwrap()
                .status,
            Status::Failure
        );
    }

    #[tokio::test]
    async fn test_expired_records_drop_out() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        let mut publisher = Directory::<_, MemoryTransport>::Coordinated(CoordinatedDirectory::new(
            session.clone(),
            ExpectedCounts::default(),
            DisseminationStrategy::Direct,
        ));
        publisher
            .register(record(Role::Publisher, "P1", 5570, &["t"]))
            .await
            .unwrap();

        let mut observer = directory(&ensemble, ExpectedCounts::default());
        assert_eq!(observer.lookup_all_publishers().await.unwrap().publishers.len(), 1);

        session.close().await.unwrap();
        assert!(observer.lookup_all_publishers().await.unwrap().publishers.is_empty());
    }
}
