use presence_core::rpc::ClientId;
use std::collections::HashSet;

/// Ids seen since the last scheduler tick.
#[derive(Debug, Default)]
pub struct ClientLivenessTracker {
    observed: HashSet<ClientId>,
}

impl ClientLivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, client_id: ClientId) {
        self.observed.insert(client_id);
    }

    pub fn snapshot_and_clear(&mut self) -> HashSet<ClientId> {
        std::mem::take(&mut self.observed)
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.observed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_resets_for_next_tick() {
        let mut tracker = ClientLivenessTracker::new();
        tracker.record(4);
        tracker.record(4);
        tracker.record(9);
        assert_eq!(tracker.pending(), 2);

        assert_eq!(tracker.snapshot_and_clear(), HashSet::from([4, 9]));
        assert!(tracker.snapshot_and_clear().is_empty());
    }
}
