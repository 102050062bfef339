use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_protocol::{DisseminationStrategy, LookupStrategy};
use serde::Deserialize;

use crate::error::Error;

/// First port handed to discovery replicas.
pub const DISCOVERY_BASE_PORT: u16 = 5555;

/// First port handed to broker candidates.
pub const BROKER_BASE_PORT: u16 = 5590;

/// First port handed to publishers.
pub const PUBLISHER_BASE_PORT: u16 = 5600;

/// First port handed to subscribers.
pub const SUBSCRIBER_BASE_PORT: u16 = 5700;

/// Partial deployment, as read from a TOML file or collected from flags.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DeploymentFile {
    pub brokers: Option<usize>,
    pub dissemination: Option<DisseminationStrategy>,
    pub fail_leader_after: Option<u64>,
    pub frequency: Option<f64>,
    pub host: Option<String>,
    pub iterations: Option<u64>,
    pub latency_csv: Option<PathBuf>,
    pub lookup: Option<LookupStrategy>,
    pub publishers: Option<usize>,
    pub replicas: Option<usize>,
    pub subscribers: Option<usize>,
    pub topics: Option<Vec<String>>,
}

impl DeploymentFile {
    /// Reads a TOML deployment file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.display().to_string(),
            source,
        })?;

        Ok(toml::from_str(&contents)?)
    }

    /// Values set in `overrides` win.
    #[must_use]
    pub fn layer(self, overrides: Self) -> Self {
        Self {
            brokers: overrides.brokers.or(self.brokers),
            dissemination: overrides.dissemination.or(self.dissemination),
            fail_leader_after: overrides.fail_leader_after.or(self.fail_leader_after),
            frequency: overrides.frequency.or(self.frequency),
            host: overrides.host.or(self.host),
            iterations: overrides.iterations.or(self.iterations),
            latency_csv: overrides.latency_csv.or(self.latency_csv),
            lookup: overrides.lookup.or(self.lookup),
            publishers: overrides.publishers.or(self.publishers),
            replicas: overrides.replicas.or(self.replicas),
            subscribers: overrides.subscribers.or(self.subscribers),
            topics: overrides.topics.or(self.topics),
        }
    }
}

/// A fully resolved deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct Deployment {
    pub brokers: usize,
    pub dissemination: DisseminationStrategy,
    pub fail_leader_after: Option<Duration>,
    pub frequency: f64,
    pub host: String,
    pub iterations: Option<u64>,
    /// Where to write per-message latency samples, if anywhere.
    pub latency_csv: Option<PathBuf>,
    pub lookup: LookupStrategy,
    pub publishers: usize,
    pub replicas: usize,
    pub subscribers: usize,
    pub topics: Vec<String>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            brokers: 1,
            dissemination: DisseminationStrategy::Direct,
            fail_leader_after: None,
            frequency: 2.0,
            host: "127.0.0.1".to_string(),
            iterations: Some(10),
            latency_csv: None,
            lookup: LookupStrategy::Centralized,
            publishers: 2,
            replicas: 2,
            subscribers: 2,
            topics: vec!["weather".to_string(), "traffic".to_string()],
        }
    }
}

impl Deployment {
    /// Fills gaps in `file` with defaults and validates the result.
    pub fn resolve(file: DeploymentFile) -> Result<Self, Error> {
        let defaults = Self::default();

        let deployment = Self {
            brokers: file.brokers.unwrap_or(defaults.brokers),
            dissemination: file.dissemination.unwrap_or(defaults.dissemination),
            fail_leader_after: file.fail_leader_after.map(Duration::from_secs),
            frequency: file.frequency.unwrap_or(defaults.frequency),
            host: file.host.unwrap_or(defaults.host),
            // Zero means run until interrupted.
            iterations: file.iterations.map_or(defaults.iterations, |n| (n > 0).then_some(n)),
            latency_csv: file.latency_csv,
            lookup: file.lookup.unwrap_or(defaults.lookup),
            publishers: file.publishers.unwrap_or(defaults.publishers),
            replicas: file.replicas.unwrap_or(defaults.replicas),
            subscribers: file.subscribers.unwrap_or(defaults.subscribers),
            topics: file.topics.unwrap_or(defaults.topics),
        };

        deployment.validate()?;

        Ok(deployment)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.topics.is_empty() {
            return Err(Error::InvalidDeployment("at least one topic is required".into()));
        }
        if self.topics.iter().any(|t| t.is_empty() || t.contains(':')) {
            return Err(Error::InvalidDeployment("topics must be non-empty and contain no ':'".into()));
        }
        if self.frequency.is_nan() || self.frequency <= 0.0 {
            return Err(Error::InvalidDeployment("frequency must be positive".into()));
        }
        if self.lookup == LookupStrategy::Centralized && self.replicas == 0 {
            return Err(Error::InvalidDeployment(
                "centralized lookup needs at least one discovery replica".into(),
            ));
        }
        if self.dissemination == DisseminationStrategy::Broker && self.brokers == 0 {
            return Err(Error::InvalidDeployment(
                "broker dissemination needs at least one broker candidate".into(),
            ));
        }

        port(DISCOVERY_BASE_PORT, self.replicas)?;
        port(BROKER_BASE_PORT, self.brokers)?;
        port(PUBLISHER_BASE_PORT, self.publishers)?;
        port(SUBSCRIBER_BASE_PORT, self.subscribers)?;

        Ok(())
    }

    /// Topics subscriber `index` listens to.
    #[must_use]
    pub fn subscriber_topics(&self, index: usize) -> Vec<String> {
        vec![self.topics[index % self.topics.len()].clone()]
    }
}

/// The port of participant `index` in a range starting at `base`.
pub fn port(base: u16, index: usize) -> Result<u16, Error> {
    u16::try_from(index)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| Error::InvalidDeployment(format!("no port left for participant {index}")))
}
