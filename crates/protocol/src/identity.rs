use derive_more::Display;
use serde::{Deserialize, Serialize};

/// How a participant is known to its peers.
#[derive(Clone, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[display("{id}@{address}:{port}")]
pub struct Identity {
    /// Unique within the participant's role.
    pub id: String,

    /// Host the participant listens on.
    pub address: String,

    /// Port the participant listens on.
    pub port: u16,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// The `address:port` string peers connect to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The role a participant registers under.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Role {
    /// Produces topic messages.
    Publisher,

    /// Consumes topic messages.
    Subscriber,

    /// Re-publishes every publisher's traffic.
    Broker,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let identity = Identity::new("pub1", "10.0.0.1", 5577);

        assert_eq!(identity.endpoint(), "10.0.0.1:5577");
        assert_eq!(identity.to_string(), "pub1@10.0.0.1:5577");
    }
}
