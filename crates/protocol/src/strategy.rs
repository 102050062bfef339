use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How messages travel from publishers to subscribers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisseminationStrategy {
    /// Subscribers connect to each matching publisher.
    #[default]
    #[display("direct")]
    Direct,

    /// Subscribers connect to the broker, which relays everything.
    #[display("broker")]
    Broker,
}

impl FromStr for DisseminationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "broker" | "viabroker" => Ok(Self::Broker),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

/// Where registrations and lookups are resolved.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStrategy {
    /// Request/response against the elected discovery leader.
    #[default]
    #[display("centralized")]
    Centralized,

    /// Ephemeral coordination nodes; each participant rebuilds the registry.
    #[display("coordinated")]
    Coordinated,
}

impl FromStr for LookupStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "centralized" => Ok(Self::Centralized),
            "coordinated" | "distributed" => Ok(Self::Coordinated),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}
