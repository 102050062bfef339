use std::time::Duration;

use futures::StreamExt;
use relay_coordination::Coordinator;
use relay_coordination_memory::{MemoryCoordinator, MemoryEnsemble};
use relay_discovery::{DiscoveryConfig, DiscoveryService};
use relay_participant::{Broker, Participant, ParticipantConfig, Publisher, Subscriber};
use relay_protocol::{DisseminationStrategy, Identity, LeaderPointer, LookupStrategy, paths};
use relay_registry::ExpectedCounts;
use relay_transport_memory::MemoryTransport;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::deployment::{
    BROKER_BASE_PORT, DISCOVERY_BASE_PORT, Deployment, PUBLISHER_BASE_PORT, SUBSCRIBER_BASE_PORT,
    port,
};
use crate::error::Error;
use crate::latency::{self, LatencySample};

/// Time subscribers keep receiving after the last publisher finishes.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// What one subscriber saw.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriberReport {
    pub id: String,
    pub received: u64,
    pub mean_latency: Option<Duration>,
    /// Per-message samples, kept only when a latency file is requested.
    pub samples: Vec<LatencySample>,
}

/// Outcome of a deployment run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    pub leader_failed_over: bool,
    pub subscribers: Vec<SubscriberReport>,
}

struct Replica {
    id: String,
    session: MemoryCoordinator,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), relay_discovery::Error>>,
}

/// Runs every role of `deployment` in this process until the publishers
/// finish or `shutdown` is cancelled.
pub async fn run(deployment: Deployment, shutdown: CancellationToken) -> Result<Report, Error> {
    let ensemble = MemoryEnsemble::new();
    let transport = MemoryTransport::default();
    let expected = ExpectedCounts::new(deployment.publishers, deployment.subscribers);
    let stop = shutdown.child_token();

    let replicas = match deployment.lookup {
        LookupStrategy::Centralized => {
            spawn_replicas(&deployment, &ensemble, &transport, expected, &stop)?
        }
        LookupStrategy::Coordinated => {
            info!("coordinated lookup, not starting discovery replicas");
            Vec::new()
        }
    };

    let failover = deployment.fail_leader_after.map(|delay| {
        let targets: Vec<_> = replicas
            .iter()
            .map(|r| (r.id.clone(), r.session.clone(), r.shutdown.clone()))
            .collect();
        tokio::spawn(fail_leader(ensemble.connect(), targets, delay, stop.clone()))
    });

    let participant_config = |identity: Identity, topics: Vec<String>| {
        ParticipantConfig::new(identity, topics)
            .with_dissemination(deployment.dissemination)
            .with_lookup(deployment.lookup, expected)
            .with_frequency(deployment.frequency)
            .with_iterations(deployment.iterations)
    };

    let mut brokers = Vec::new();
    if deployment.dissemination == DisseminationStrategy::Broker {
        for index in 0..deployment.brokers {
            let identity = Identity::new(
                format!("broker{}", index + 1),
                &deployment.host,
                port(BROKER_BASE_PORT, index)?,
            );
            let mut broker = Broker::new(
                participant_config(identity, Vec::new()).with_iterations(None),
                ensemble.connect(),
                transport.clone(),
            );
            let token = stop.clone();
            brokers.push(tokio::spawn(async move { broker.run(token).await }));
        }
    }

    let mut publishers = Vec::new();
    for index in 0..deployment.publishers {
        let identity = Identity::new(
            format!("pub{}", index + 1),
            &deployment.host,
            port(PUBLISHER_BASE_PORT, index)?,
        );
        let mut publisher = Publisher::new(
            participant_config(identity, deployment.topics.clone()),
            ensemble.connect(),
            transport.clone(),
        );
        let token = stop.clone();
        publishers.push(tokio::spawn(async move { publisher.run(token).await }));
    }

    let mut subscribers = Vec::new();
    for index in 0..deployment.subscribers {
        let identity = Identity::new(
            format!("sub{}", index + 1),
            &deployment.host,
            port(SUBSCRIBER_BASE_PORT, index)?,
        );
        let subscriber = Subscriber::new(
            participant_config(identity, deployment.subscriber_topics(index)),
            ensemble.connect(),
            transport.clone(),
        );
        subscribers.push(tokio::spawn(subscribe(
            subscriber,
            stop.clone(),
            deployment.latency_csv.is_some(),
        )));
    }

    let mut result: Result<(), Error> = Ok(());
    for publisher in publishers {
        if let Err(e) = publisher.await? {
            error!("publisher failed: {}", e);
            result = Err(e.into());
        }
    }

    if !stop.is_cancelled() {
        tokio::time::sleep(DRAIN_GRACE).await;
    }
    stop.cancel();

    let mut report = Report::default();
    for subscriber in subscribers {
        match subscriber.await? {
            Ok(subscriber) => report.subscribers.push(subscriber),
            Err(e) => {
                error!("subscriber failed: {}", e);
                result = Err(e.into());
            }
        }
    }

    for broker in brokers {
        if let Err(e) = broker.await? {
            warn!("broker stopped with error: {}", e);
        }
    }

    if let Some(failover) = failover {
        report.leader_failed_over = failover.await?;
    }

    for replica in replicas {
        if let Err(e) = replica.task.await? {
            warn!("discovery replica {} stopped with error: {}", replica.id, e);
        }
    }

    result?;

    if let Some(path) = &deployment.latency_csv {
        latency::write_csv(path, &report.subscribers)?;
    }

    Ok(report)
}

fn spawn_replicas(
    deployment: &Deployment,
    ensemble: &MemoryEnsemble,
    transport: &MemoryTransport,
    expected: ExpectedCounts,
    stop: &CancellationToken,
) -> Result<Vec<Replica>, Error> {
    let mut replicas = Vec::with_capacity(deployment.replicas);

    for index in 0..deployment.replicas {
        let identity = Identity::new(
            format!("disc{}", index + 1),
            &deployment.host,
            port(DISCOVERY_BASE_PORT, index)?,
        );
        let session = ensemble.connect();
        let shutdown = stop.child_token();

        let service = DiscoveryService::new(
            DiscoveryConfig::new(identity.clone(), expected, deployment.dissemination),
            session.clone(),
            transport.clone(),
        );

        replicas.push(Replica {
            id: identity.id,
            session,
            task: tokio::spawn(service.run(shutdown.clone())),
            shutdown,
        });
    }

    Ok(replicas)
}

async fn subscribe(
    mut subscriber: Subscriber<MemoryCoordinator, MemoryTransport>,
    stop: CancellationToken,
    record: bool,
) -> Result<SubscriberReport, relay_participant::Error> {
    let id = subscriber.identity().id.clone();

    tokio::select! {
        () = stop.cancelled() => {
            return Ok(SubscriberReport {
                id,
                received: 0,
                mean_latency: None,
                samples: Vec::new(),
            });
        }
        configured = async {
            subscriber.configure().await?;
            subscriber.register().await
        } => configured?,
    }

    let mut received = 0u64;
    let mut total_latency = Duration::ZERO;
    let mut samples = Vec::new();
    let started = Instant::now();

    let mut messages = Box::pin(subscriber.into_messages(stop));
    while let Some(message) = messages.next().await {
        let message = message?;
        let latency = message.latency().unwrap_or_default();

        info!(
            "{} got {}:{} from {} after {:?}",
            id, message.topic, message.payload, message.publisher_id, latency
        );

        received += 1;
        total_latency += latency;

        if record {
            samples.push(LatencySample {
                elapsed: started.elapsed(),
                topic: message.topic,
                publisher_id: message.publisher_id,
                latency,
            });
        }
    }

    let mean_latency = u32::try_from(received)
        .ok()
        .filter(|&n| n > 0)
        .map(|n| total_latency / n);

    Ok(SubscriberReport {
        id,
        received,
        mean_latency,
        samples,
    })
}

/// Closes the discovery leader's session after `delay`. Returns whether a
/// leader was found and closed.
async fn fail_leader(
    observer: MemoryCoordinator,
    replicas: Vec<(String, MemoryCoordinator, CancellationToken)>,
    delay: Duration,
    stop: CancellationToken,
) -> bool {
    tokio::select! {
        () = stop.cancelled() => return false,
        () = tokio::time::sleep(delay) => {}
    }

    let leader = match observer.get(paths::LEADER).await {
        Ok(Some(data)) => LeaderPointer::try_from(data).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!("could not read the discovery leader: {}", e);
            None
        }
    };

    let Some(leader) = leader else {
        warn!("no discovery leader to fail");
        return false;
    };

    let Some((id, session, shutdown)) = replicas
        .into_iter()
        .find(|(id, _, _)| *id == leader.identity.id)
    else {
        return false;
    };

    warn!("failing discovery leader {}", id);
    shutdown.cancel();
    if let Err(e) = session.close().await {
        warn!("closing {}'s session failed: {}", id, e);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::timeout;

    fn quick(dissemination: DisseminationStrategy, lookup: LookupStrategy) -> Deployment {
        Deployment {
            brokers: 2,
            dissemination,
            frequency: 50.0,
            iterations: Some(20),
            lookup,
            publishers: 2,
            replicas: 2,
            subscribers: 2,
            ..Deployment::default()
        }
    }

    async fn run_quick(deployment: Deployment) -> Report {
        timeout(Duration::from_secs(20), run(deployment, CancellationToken::new()))
            .await
            .expect("deployment did not finish")
            .expect("deployment failed")
    }

    #[tokio::test]
    async fn test_direct_deployment() {
        let _ = tracing_subscriber::fmt::try_init();

        let report = run_quick(quick(DisseminationStrategy::Direct, LookupStrategy::Centralized)).await;

        assert_eq!(report.subscribers.len(), 2);
        assert!(report.subscribers.iter().all(|s| s.received > 0));
        assert!(!report.leader_failed_over);
    }

    #[tokio::test]
    async fn test_broker_deployment_with_coordinated_lookup() {
        let _ = tracing_subscriber::fmt::try_init();

        let report = run_quick(quick(DisseminationStrategy::Broker, LookupStrategy::Coordinated)).await;

        assert!(report.subscribers.iter().all(|s| s.received > 0));
    }

    #[tokio::test]
    async fn test_leader_failure_mid_run() {
        let _ = tracing_subscriber::fmt::try_init();

        let deployment = Deployment {
            fail_leader_after: Some(Duration::from_millis(200)),
            ..quick(DisseminationStrategy::Direct, LookupStrategy::Centralized)
        };

        let report = run_quick(deployment).await;

        assert!(report.leader_failed_over);
        assert!(report.subscribers.iter().all(|s| s.received > 0));
    }

    #[tokio::test]
    async fn test_latency_samples_written() {
        let _ = tracing_subscriber::fmt::try_init();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        let deployment = Deployment {
            latency_csv: Some(path.clone()),
            ..quick(DisseminationStrategy::Direct, LookupStrategy::Centralized)
        };

        let report = run_quick(deployment).await;

        let received: u64 = report.subscribers.iter().map(|s| s.received).sum();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();

        assert_eq!(lines.next(), Some("subscriber,topic,publisher,elapsed_ms,latency_us"));
        assert_eq!(u64::try_from(lines.count()).unwrap(), received);
        assert!(received > 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_unbounded_run() {
        let shutdown = CancellationToken::new();
        let deployment = Deployment {
            iterations: None,
            ..quick(DisseminationStrategy::Direct, LookupStrategy::Centralized)
        };

        let handle = tokio::spawn(run(deployment, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();

        timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
