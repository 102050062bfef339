use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Where discovery is in its registration lifecycle.
///
/// `Ready` keeps servicing requests; only an administrative reconfiguration
/// moves it back to `WaitingForRegistrations`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum DiscoveryState {
    /// Created, nothing configured.
    #[default]
    Initialized,

    /// Expected counts being installed.
    Configuring,

    /// Accepting registrations below the thresholds.
    WaitingForRegistrations,

    /// Thresholds met; lookups answered.
    Ready,
}

impl DiscoveryState {
    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for any edge not in the machine.
    pub fn transition(self, to: Self) -> Result<Self, Error> {
        match (self, to) {
            (Self::Initialized, Self::Configuring)
            | (Self::Configuring, Self::WaitingForRegistrations)
            | (Self::WaitingForRegistrations | Self::Ready, Self::Ready)
            | (Self::Ready, Self::WaitingForRegistrations) => Ok(to),
            (from, to) => Err(Error::InvalidTransition { from, to }),
        }
    }

    /// Whether expected counts have been installed.
    #[must_use]
    pub const fn is_configured(self) -> bool {
        matches!(self, Self::WaitingForRegistrations | Self::Ready)
    }
}
