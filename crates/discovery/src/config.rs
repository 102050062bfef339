use relay_protocol::{DisseminationStrategy, Identity};
use relay_registry::ExpectedCounts;

/// Options for a discovery replica.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// This replica; its endpoint becomes the reply address when elected.
    pub identity: Identity,

    /// Readiness thresholds.
    pub expected: ExpectedCounts,

    /// Decides what topic lookups return.
    pub dissemination: DisseminationStrategy,
}

impl DiscoveryConfig {
    /// Creates a config for `identity`.
    #[must_use]
    pub const fn new(
        identity: Identity,
        expected: ExpectedCounts,
        dissemination: DisseminationStrategy,
    ) -> Self {
        Self {
            identity,
            expected,
            dissemination,
        }
    }
}
