use derive_more::Display;

use crate::error::Error;

/// Startup progress shared by publishers, subscribers and brokers.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum Lifecycle {
    /// Constructed.
    #[default]
    Init,

    /// Coordination and discovery endpoints resolved.
    Configured,

    /// Registration in flight.
    Registering,

    /// Registered; polling readiness.
    WaitingReady,

    /// Publishing, receiving or relaying.
    Active,
}

impl Lifecycle {
    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for any edge not in the lifecycle.
    pub fn transition(self, to: Self) -> Result<Self, Error> {
        match (self, to) {
            (Self::Init, Self::Configured)
            | (Self::Configured, Self::Registering)
            | (Self::Registering, Self::WaitingReady)
            | (Self::WaitingReady, Self::Active) => Ok(to),
            (from, to) => Err(Error::InvalidTransition { from, to }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_lifecycle_order() {
        let mut state = Lifecycle::Init;
        for next in [
            Lifecycle::Configured,
            Lifecycle::Registering,
            Lifecycle::WaitingReady,
            Lifecycle::Active,
        ] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Lifecycle::Active);

        assert_matches!(
            Lifecycle::Init.transition(Lifecycle::Registering),
            Err(Error::InvalidTransition { .. })
        );
        assert_matches!(
            Lifecycle::Active.transition(Lifecycle::WaitingReady),
            Err(Error::InvalidTransition { .. })
        );
    }
}
