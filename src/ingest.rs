use crate::{
    error::Result,
    store::StateStore,
    transport::NotificationStream,
    types::StatusReport,
};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Result of ingesting one valid notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The first report since the bridge started
    Initialized,
    /// Report accepted, power state unchanged
    Accepted,
    /// Report accepted and the soft power state flipped
    PowerChanged {
        /// New power state
        on: bool,
    },
}

/// Turns raw status notifications into store updates
///
/// This is the only writer of the [`StateStore`]. Invalid frames are logged and
/// dropped without touching the store.
#[derive(Debug)]
pub struct NotificationIngest {
    store: StateStore,
    power: watch::Sender<Option<bool>>,
}

impl NotificationIngest {
    /// Create an ingest feeding `store`
    #[must_use]
    pub fn new(store: StateStore) -> Self {
        let (power, _) = watch::channel(None);
        Self { store, power }
    }

    /// Level of the soft power flag, `None` until the first report
    ///
    /// The receiver only wakes when the level actually changes.
    #[must_use]
    pub fn power_state(&self) -> watch::Receiver<Option<bool>> {
        self.power.subscribe()
    }

    /// Decode one notification and publish it
    ///
    /// # Errors
    ///
    /// Returns [`crate::FridgeError::Frame`] if the payload is not a valid status
    /// report. The store is left untouched in that case.
    pub fn on_notification(&self, raw: &[u8]) -> Result<IngestOutcome> {
        let report = match StatusReport::from_bytes(raw) {
            Ok(report) => report,
            Err(e) => {
                warn!("Discarding invalid status frame: {}", e);
                debug!("Rejected frame bytes: {:02X?}", raw);
                return Err(e.into());
            }
        };

        trace!(
            temp = report.sensors.temp,
            set_temp = report.settings.temp_set,
            on = report.settings.on,
            eco = report.settings.eco_mode,
            locked = report.settings.locked,
            input = %report.sensors.voltage_string(),
            "Fridge status update"
        );

        // ingest is the only writer, so this is the report being superseded
        let previous = self.store.report();
        let on = report.settings.on;
        self.power.send_if_modified(|level| {
            if *level == Some(on) {
                false
            } else {
                *level = Some(on);
                true
            }
        });
        self.store.replace(report);

        let outcome = match previous {
            None => {
                info!("First fridge status received: {}", report);
                IngestOutcome::Initialized
            }
            Some(prev) if prev.settings.on != on => {
                warn!(
                    on,
                    temp = report.sensors.temp,
                    set_temp = report.settings.temp_set,
                    input = %report.sensors.voltage_string(),
                    "Fridge on state changed"
                );
                IngestOutcome::PowerChanged { on }
            }
            Some(_) => IngestOutcome::Accepted,
        };

        Ok(outcome)
    }

    /// Consume notifications until the stream ends or `cancel` fires
    pub async fn run(self, mut notifications: NotificationStream, cancel: CancellationToken) {
        debug!("State updater starting");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("State updater cancelled");
                    break;
                }
                next = notifications.next() => match next {
                    Some(raw) => {
                        // errors are already logged and never fatal here
                        let _ = self.on_notification(&raw);
                    }
                    None => {
                        warn!("Notification stream ended");
                        break;
                    }
                },
            }
        }
    }
}
