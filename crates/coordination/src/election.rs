use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::{Coordinator, CoordinatorError, CoordinatorErrorKind, CreateMode};

/// Outcome of trying to take a singleton node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Claim {
    /// This session now owns the node.
    Won,

    /// Another session owns it. Carries the holder's data unless the node
    /// vanished between the failed create and the read.
    Lost(Option<Bytes>),
}

/// Tries to create `path` as an ephemeral node holding `data`.
///
/// Creation is exclusive: exactly one concurrent caller wins, the others learn
/// the current holder.
///
/// # Errors
///
/// Returns any coordination failure other than the node already existing.
pub async fn claim<C: Coordinator>(
    coordinator: &C,
    path: &str,
    data: Bytes,
) -> Result<Claim, C::Error> {
    match coordinator.create(path, data, CreateMode::Ephemeral).await {
        Ok(()) => {
            debug!("session {} claimed {}", coordinator.session_id(), path);
            Ok(Claim::Won)
        }
        Err(e) if e.kind() == CoordinatorErrorKind::NodeExists => {
            Ok(Claim::Lost(coordinator.get(path).await?))
        }
        Err(e) => Err(e),
    }
}

/// Polls until `path` exists, sleeping `interval` between checks.
///
/// Returns `Ok(None)` after `max_attempts` checks have found nothing.
///
/// # Errors
///
/// Returns an error if the coordination service fails.
pub async fn wait_for_node<C: Coordinator>(
    coordinator: &C,
    path: &str,
    interval: Duration,
    max_attempts: usize,
) -> Result<Option<Bytes>, C::Error> {
    for attempt in 1..=max_attempts {
        if let Some(data) = coordinator.get(path).await? {
            return Ok(Some(data));
        }

        debug!("{} not present yet (attempt {}/{})", path, attempt, max_attempts);

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(None)
}
