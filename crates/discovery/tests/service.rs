use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use relay_coordination::{ChildrenWatch, Coordinator, CreateMode, NodeWatch, wait_for_node};
use relay_coordination_memory::{MemoryCoordinator, MemoryEnsemble};
use relay_discovery::{DiscoveryConfig, DiscoveryService};
use relay_protocol::{
    DisseminationStrategy, Identity, LeaderPointer, LookupResponse, Request, Response, Role,
    Status, paths,
};
use relay_registry::ExpectedCounts;
use relay_transport::{RequestChannel, Transport};
use relay_transport_memory::MemoryTransport;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

async fn call(transport: &MemoryTransport, address: &str, request: Request) -> Response {
    let mut channel = transport.request_channel();
    channel.connect(address).await.unwrap();

    let payload: Bytes = request.try_into().unwrap();
    let reply = timeout(Duration::from_secs(1), channel.request(payload))
        .await
        .expect("request timed out")
        .expect("request failed");

    Response::try_from(reply).unwrap()
}

async fn wait_for_leader<C: Coordinator>(coordinator: &C, id: &str) {
    for _ in 0..200 {
        if let Some(data) = wait_for_node(coordinator, paths::LEADER, Duration::from_millis(5), 1)
            .await
            .unwrap()
        {
            if LeaderPointer::try_from(data).unwrap().identity.id == id {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{id} never became leader");
}

/// Session that dies on the first snapshot write after being armed.
#[derive(Clone, Debug)]
struct FragileSession {
    armed: Arc<AtomicBool>,
    inner: MemoryCoordinator,
}

#[async_trait]
impl Coordinator for FragileSession {
    type Error = relay_coordination_memory::Error;

    fn session_id(&self) -> u64 {
        self.inner.session_id()
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<(), Self::Error> {
        self.inner.create(path, data, mode).await
    }

    async fn set(&self, path: &str, data: Bytes) -> Result<(), Self::Error> {
        if path == paths::DISCOVERY_SNAPSHOT && self.armed.load(Ordering::SeqCst) {
            self.inner.close().await?;
        }
        self.inner.set(path, data).await
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, Self::Error> {
        self.inner.get(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), Self::Error> {
        self.inner.delete(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error> {
        self.inner.children(path).await
    }

    async fn watch(&self, path: &str) -> Result<NodeWatch, Self::Error> {
        self.inner.watch(path).await
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch, Self::Error> {
        self.inner.watch_children(path).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.inner.close().await
    }
}

fn replica(id: &str, port: u16, expected: ExpectedCounts) -> DiscoveryConfig {
    DiscoveryConfig::new(
        Identity::new(id, "127.0.0.1", port),
        expected,
        DisseminationStrategy::Direct,
    )
}

#[tokio::test]
async fn test_register_and_lookup_over_transport() {
    let _ = tracing_subscriber::fmt::try_init();

    let ensemble = MemoryEnsemble::new();
    let transport = MemoryTransport::default();
    let shutdown = CancellationToken::new();

    let service = DiscoveryService::new(
        replica("disc1", 5555, ExpectedCounts::new(1, 1)),
        ensemble.connect(),
        transport.clone(),
    );
    let task = tokio::spawn(service.run(shutdown.clone()));

    let observer = ensemble.connect();
    wait_for_leader(&observer, "disc1").await;

    let address = "127.0.0.1:5555";
    let p1 = Identity::new("P1", "127.0.0.1", 5570);
    let s1 = Identity::new("S1", "127.0.0.1", 5580);

    assert_matches!(
        call(&transport, address, Request::register(Role::Publisher, p1, ["t"])).await,
        Response::Register(r) if r.status == Status::Success
    );
    assert_eq!(
        call(&transport, address, Request::lookup_by_topic(["t"])).await,
        Response::LookupByTopic(LookupResponse::not_ready())
    );

    call(&transport, address, Request::register(Role::Subscriber, s1, ["t"])).await;

    assert_matches!(
        call(&transport, address, Request::IsReady).await,
        Response::IsReady(r) if r.ready
    );
    assert_matches!(
        call(&transport, address, Request::lookup_by_topic(["t"])).await,
        Response::LookupByTopic(LookupResponse { ready: true, publishers })
            if publishers.len() == 1 && publishers[0].id == "P1"
    );

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_request_gets_error_reply() {
    let _ = tracing_subscriber::fmt::try_init();

    let ensemble = MemoryEnsemble::new();
    let transport = MemoryTransport::default();
    let shutdown = CancellationToken::new();

    let service = DiscoveryService::new(
        replica("disc1", 5555, ExpectedCounts::default()),
        ensemble.connect(),
        transport.clone(),
    );
    let task = tokio::spawn(service.run(shutdown.clone()));
    wait_for_leader(&ensemble.connect(), "disc1").await;

    let mut channel = transport.request_channel();
    channel.connect("127.0.0.1:5555").await.unwrap();
    let reply = channel
        .request(Bytes::from_static(b"\xff\xff\xff"))
        .await
        .unwrap();
    assert_matches!(Response::try_from(reply).unwrap(), Response::Error(_));

    // The loop keeps serving after a bad request.
    assert_matches!(
        call(&transport, "127.0.0.1:5555", Request::IsReady).await,
        Response::IsReady(r) if r.ready
    );

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_standby_takes_over_with_replicated_state() {
    let _ = tracing_subscriber::fmt::try_init();

    let ensemble = MemoryEnsemble::new();
    let transport = MemoryTransport::default();
    let observer = ensemble.connect();

    let first_session = ensemble.connect();
    let first_shutdown = CancellationToken::new();
    let first = DiscoveryService::new(
        replica("disc1", 5555, ExpectedCounts::new(1, 0)),
        first_session.clone(),
        transport.clone(),
    );
    let first_task = tokio::spawn(first.run(first_shutdown.clone()));
    wait_for_leader(&observer, "disc1").await;

    let second_shutdown = CancellationToken::new();
    let second = DiscoveryService::new(
        replica("disc2", 5556, ExpectedCounts::new(1, 0)),
        ensemble.connect(),
        transport.clone(),
    );
    let second_task = tokio::spawn(second.run(second_shutdown.clone()));

    let p1 = Identity::new("P1", "127.0.0.1", 5570);
    assert_matches!(
        call(&transport, "127.0.0.1:5555", Request::register(Role::Publisher, p1.clone(), ["t"])).await,
        Response::Register(r) if r.status == Status::Success
    );

    // Let the standby see the replicated snapshot before the leader dies.
    tokio::time::sleep(Duration::from_millis(50)).await;

    first_shutdown.cancel();
    first_task.await.unwrap().unwrap();
    first_session.close().await.unwrap();

    wait_for_leader(&observer, "disc2").await;

    assert_matches!(
        call(&transport, "127.0.0.1:5556", Request::LookupAllPublishers).await,
        Response::LookupAllPublishers(LookupResponse { ready: true, publishers })
            if publishers == vec![p1.clone()]
    );
    assert_matches!(
        call(&transport, "127.0.0.1:5556", Request::register(Role::Publisher, p1, ["t"])).await,
        Response::Register(r) if r.status == Status::Failure
    );

    second_shutdown.cancel();
    second_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registration_unacknowledged_until_replicated() {
    let _ = tracing_subscriber::fmt::try_init();

    let ensemble = MemoryEnsemble::new();
    let transport = MemoryTransport::default();
    let observer = ensemble.connect();
    let shutdown = CancellationToken::new();

    let armed = Arc::new(AtomicBool::new(false));
    let first = DiscoveryService::new(
        replica("disc1", 5555, ExpectedCounts::new(1, 0)),
        FragileSession {
            armed: armed.clone(),
            inner: ensemble.connect(),
        },
        transport.clone(),
    );
    let first_task = tokio::spawn(first.run(shutdown.clone()));
    wait_for_leader(&observer, "disc1").await;

    // The leader's own first snapshot is written once it serves requests.
    wait_for_node(&observer, paths::DISCOVERY_SNAPSHOT, Duration::from_millis(5), 200)
        .await
        .unwrap()
        .expect("leader never replicated");

    let second = DiscoveryService::new(
        replica("disc2", 5556, ExpectedCounts::new(1, 0)),
        ensemble.connect(),
        transport.clone(),
    );
    let second_task = tokio::spawn(second.run(shutdown.clone()));

    armed.store(true, Ordering::SeqCst);

    let p1 = Identity::new("P1", "127.0.0.1", 5570);
    let mut channel = transport.request_channel();
    channel.connect("127.0.0.1:5555").await.unwrap();
    let payload: Bytes = Request::register(Role::Publisher, p1.clone(), ["t"])
        .try_into()
        .unwrap();
    let reply = timeout(Duration::from_secs(1), channel.request(payload))
        .await
        .expect("request timed out");

    // No acceptance reached the publisher, so it retries with the successor.
    assert!(reply.is_err());
    assert!(first_task.await.unwrap().is_err());

    wait_for_leader(&observer, "disc2").await;

    assert_matches!(
        call(&transport, "127.0.0.1:5556", Request::register(Role::Publisher, p1.clone(), ["t"])).await,
        Response::Register(r) if r.status == Status::Success
    );
    assert_matches!(
        call(&transport, "127.0.0.1:5556", Request::LookupAllPublishers).await,
        Response::LookupAllPublishers(LookupResponse { ready: true, publishers })
            if publishers == vec![p1]
    );

    shutdown.cancel();
    second_task.await.unwrap().unwrap();
}
