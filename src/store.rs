use crate::types::{FridgeState, StatusReport};
use tokio::sync::watch;

/// Cache of the most recently accepted status report
///
/// Backed by a watch channel: any number of readers take short shared borrows of the
/// current value, the single writer swaps in a complete new value. A reader therefore
/// sees either the previous or the next report, never a mix of both.
///
/// Cloning yields another handle to the same cache.
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: watch::Sender<FridgeState>,
}

impl StateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FridgeState::Uninitialized);
        Self { tx }
    }

    /// Current state, [`FridgeState::Uninitialized`] until the first report arrives
    #[must_use]
    pub fn read(&self) -> FridgeState {
        *self.tx.borrow()
    }

    /// Current report, if any
    #[must_use]
    pub fn report(&self) -> Option<StatusReport> {
        self.read().report().copied()
    }

    /// Receiver notified whenever a new report replaces the current one
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FridgeState> {
        self.tx.subscribe()
    }

    /// Replace the current report, returning the previous state
    pub(crate) fn replace(&self, report: StatusReport) -> FridgeState {
        self.tx.send_replace(FridgeState::Known(report))
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
