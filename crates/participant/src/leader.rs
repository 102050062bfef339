use bytes::Bytes;
use relay_protocol::LeaderPointer;
use tracing::debug;

/// What a leader node update meant for the cached pointer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LeaderChange {
    /// Same leader as before.
    Unchanged,

    /// A leader appeared or replaced the previous one.
    Elected {
        /// Reply address of the replaced leader.
        previous: Option<String>,
        /// Reply address to use from now on.
        current: String,
    },

    /// The leader node disappeared.
    Vacated {
        /// Reply address of the departed leader.
        previous: String,
    },
}

/// Cached copy of a leader node, replaced on every watch notification.
#[derive(Clone, Debug, Default)]
pub struct LeaderTracker {
    current: Option<LeaderPointer>,
}

impl LeaderTracker {
    /// The cached leader.
    #[must_use]
    pub const fn current(&self) -> Option<&LeaderPointer> {
        self.current.as_ref()
    }

    /// Replaces the cache with the node's latest contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the node data does not decode; the cache is left
    /// untouched.
    pub fn observe(&mut self, data: Option<Bytes>) -> Result<LeaderChange, relay_protocol::Error> {
        let next = data.map(LeaderPointer::try_from).transpose()?;

        if next == self.current {
            return Ok(LeaderChange::Unchanged);
        }

        let previous = self.current.as_ref().map(LeaderPointer::reply_address);
        let change = match &next {
            Some(pointer) => LeaderChange::Elected {
                previous,
                current: pointer.reply_address(),
            },
            None => match previous {
                Some(previous) => LeaderChange::Vacated { previous },
                None => LeaderChange::Unchanged,
            },
        };

        debug!("leader pointer changed: {:?}", change);
        self.current = next;

        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use relay_protocol::Identity;

    fn pointer(id: &str, port: u16) -> Bytes {
        LeaderPointer::discovery(Identity::new(id, "127.0.0.1", port))
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_cache_tracks_latest() {
        let mut tracker = LeaderTracker::default();

        let sequence = [("L1", 5555), ("L2", 5556), ("L1", 5555)];
        let mut previous: Option<String> = None;
        for (id, port) in sequence {
            let change = tracker.observe(Some(pointer(id, port))).unwrap();
            let address = format!("127.0.0.1:{port}");

            assert_eq!(
                change,
                LeaderChange::Elected {
                    previous: previous.clone(),
                    current: address.clone()
                }
            );
            assert_eq!(tracker.current().unwrap().identity.id, id);
            previous = Some(address);
        }
    }

    #[test]
    fn test_repeat_and_vacate() {
        let mut tracker = LeaderTracker::default();

        assert_eq!(tracker.observe(None).unwrap(), LeaderChange::Unchanged);
        tracker.observe(Some(pointer("L1", 5555))).unwrap();
        assert_eq!(
            tracker.observe(Some(pointer("L1", 5555))).unwrap(),
            LeaderChange::Unchanged
        );
        assert_eq!(
            tracker.observe(None).unwrap(),
            LeaderChange::Vacated {
                previous: "127.0.0.1:5555".to_string()
            }
        );
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_garbage_keeps_cache() {
        let mut tracker = LeaderTracker::default();
        tracker.observe(Some(pointer("L1", 5555))).unwrap();

        assert!(tracker.observe(Some(Bytes::from_static(b"junk"))).is_err());
        assert_eq!(tracker.current().unwrap().identity.id, "L1");
    }
}
