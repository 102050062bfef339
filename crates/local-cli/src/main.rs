//! CLI binary to run a whole relay deployment in one process.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod deployment;
mod error;
mod latency;
mod runner;

use std::path::PathBuf;

use clap::Parser;
use relay_protocol::{DisseminationStrategy, LookupStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deployment::{Deployment, DeploymentFile};
use error::Error;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML deployment file; flags override its values
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Number of discovery replicas
    #[arg(long, env = "RELAY_REPLICAS")]
    replicas: Option<usize>,

    /// Number of publishers
    #[arg(long, env = "RELAY_PUBLISHERS")]
    publishers: Option<usize>,

    /// Number of subscribers
    #[arg(long, env = "RELAY_SUBSCRIBERS")]
    subscribers: Option<usize>,

    /// Number of broker candidates
    #[arg(long, env = "RELAY_BROKERS")]
    brokers: Option<usize>,

    /// Comma separated topics
    #[arg(long, env = "RELAY_TOPICS", value_delimiter = ',')]
    topics: Option<Vec<String>>,

    /// `direct` or `broker`
    #[arg(long, env = "RELAY_DISSEMINATION")]
    dissemination: Option<DisseminationStrategy>,

    /// `centralized` or `coordinated`
    #[arg(long, env = "RELAY_LOOKUP")]
    lookup: Option<LookupStrategy>,

    /// Publish rate in messages per second
    #[arg(long, env = "RELAY_FREQUENCY")]
    frequency: Option<f64>,

    /// Publish rounds per publisher, 0 for unbounded
    #[arg(long, env = "RELAY_ITERATIONS")]
    iterations: Option<u64>,

    /// Kill the discovery leader after this many seconds
    #[arg(long, env = "RELAY_FAIL_LEADER_AFTER")]
    fail_leader_after: Option<u64>,

    /// Write per-message latency samples to this CSV file
    #[arg(long, env = "RELAY_LATENCY_CSV")]
    latency_csv: Option<PathBuf>,

    /// Address every participant advertises
    #[arg(long, env = "RELAY_HOST")]
    host: Option<String>,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> DeploymentFile {
        DeploymentFile {
            brokers: self.brokers,
            dissemination: self.dissemination,
            fail_leader_after: self.fail_leader_after,
            frequency: self.frequency,
            host: self.host.clone(),
            iterations: self.iterations,
            latency_csv: self.latency_csv.clone(),
            lookup: self.lookup,
            publishers: self.publishers,
            replicas: self.replicas,
            subscribers: self.subscribers,
            topics: self.topics.clone(),
        }
    }
}

#[tokio::main(worker_threads = 8)]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let file = match &args.config {
        Some(path) => DeploymentFile::load(path)?,
        None => DeploymentFile::default(),
    };
    let deployment = Deployment::resolve(file.layer(args.overrides()))?;

    info!(
        "starting {} replicas, {} publishers, {} subscribers ({} dissemination, {} lookup)",
        deployment.replicas,
        deployment.publishers,
        deployment.subscribers,
        deployment.dissemination,
        deployment.lookup
    );

    let shutdown_token = CancellationToken::new();

    // Set up signal handlers
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown_token.cancel();
    });

    let report = runner::run(deployment, shutdown_token).await?;

    if report.leader_failed_over {
        warn!("discovery leader was failed during the run");
    }

    for subscriber in &report.subscribers {
        match subscriber.mean_latency {
            Some(latency) => info!(
                "{} received {} messages, mean latency {:?}",
                subscriber.id, subscriber.received, latency
            ),
            None => info!("{} received no messages", subscriber.id),
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to install signal handlers: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received interrupt signal");
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt signal");
}
