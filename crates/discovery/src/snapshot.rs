use bytes::Bytes;
use relay_protocol::codec;
use relay_registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};

use crate::state::DiscoveryState;

/// Discovery state pushed from the leader to standby replicas.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiscoverySnapshot {
    /// Registered participants and readiness.
    pub registry: RegistrySnapshot,

    /// Lifecycle state.
    pub state: DiscoveryState,

    /// Increases with every mutation; standbys ignore older snapshots.
    pub sequence: u64,
}

impl TryFrom<Bytes> for DiscoverySnapshot {
    type Error = relay_protocol::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        codec::decode_enveloped(&bytes)
    }
}

impl TryInto<Bytes> for DiscoverySnapshot {
    type Error = relay_protocol::Error;

    fn try_into(self) -> Result<Bytes, Self::Error> {
        codec::encode_enveloped(&self)
    }
}
