use crate::{
    dispatcher::CommandSender,
    error::Result,
    store::StateStore,
    types::{BoundLayout, CycleConfig, Settings, StatusReport},
};
use std::sync::Arc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a single compressor cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Shutdown arrived before the fridge reported its state
    Cancelled,
    /// Input voltage at or above the threshold, no battery to keep awake
    SkippedHighVoltage {
        /// Whole volts reported by the fridge
        input_volts: u8,
    },
    /// The fridge is already on, nothing to force
    AlreadyOn,
    /// Another cycle is in flight
    Busy,
    /// Compressor was forced on and the previous settings were restored
    Completed,
}

/// Counts compressor cycles that still have to restore settings
///
/// Shutdown waits on [`CycleTracker::wait_idle`] before tearing the link down.
#[derive(Debug, Clone)]
pub struct CycleTracker {
    count: Arc<watch::Sender<usize>>,
}

/// Marks one cycle as in flight until dropped
#[derive(Debug)]
pub struct CycleGuard {
    count: Arc<watch::Sender<usize>>,
}

impl CycleTracker {
    /// Create an idle tracker
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Register a cycle unconditionally
    #[must_use]
    pub fn enter(&self) -> CycleGuard {
        self.count.send_modify(|n| *n += 1);
        CycleGuard {
            count: self.count.clone(),
        }
    }

    /// Register a cycle only if none is in flight
    #[must_use]
    pub fn try_enter(&self) -> Option<CycleGuard> {
        let entered = self.count.send_if_modified(|n| {
            if *n == 0 {
                *n = 1;
                true
            } else {
                false
            }
        });
        entered.then(|| CycleGuard {
            count: self.count.clone(),
        })
    }

    /// Number of cycles in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no cycle is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives in self, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Setpoint low enough to make the compressor kick in
///
/// One degree past the hysteresis band below the current cabinet temperature, kept
/// within the device limits.
#[must_use]
pub fn forced_setpoint(report: &StatusReport, layout: BoundLayout) -> i8 {
    let bounds = report.settings.bounds(layout);
    let target = i16::from(report.sensors.temp) - (i16::from(report.settings.hysteresis) + 1);
    let clamped = target
        .max(i16::from(bounds.lowest))
        .min(i16::from(bounds.highest));
    i8::try_from(clamped).unwrap_or(bounds.highest)
}

/// Keeps a power bank awake by briefly forcing the compressor on
///
/// Requests go through the same [`CommandSender`] as every other consumer; the
/// controller never writes to the link itself.
#[derive(Debug)]
pub struct CompressorCycleController {
    store: StateStore,
    sender: CommandSender,
    config: CycleConfig,
    layout: BoundLayout,
    tracker: CycleTracker,
}

impl CompressorCycleController {
    /// Create a controller
    #[must_use]
    pub fn new(
        store: StateStore,
        sender: CommandSender,
        config: CycleConfig,
        layout: BoundLayout,
    ) -> Self {
        Self {
            store,
            sender,
            config,
            layout,
            tracker: CycleTracker::new(),
        }
    }

    /// Tracker shutdown waits on
    #[must_use]
    pub fn tracker(&self) -> &CycleTracker {
        &self.tracker
    }

    /// Run one cycle
    ///
    /// `cancel` aborts the wait for the first status report. Once the compressor has
    /// been forced on, cancellation only shortens the on-window: the previous settings
    /// are always restored before this returns.
    ///
    /// Not cancel safe: dropping the future between the forced-on write and the restore
    /// leaves the fridge forced cold. Use [`CompressorCycleController::spawn_cycle`]
    /// when the caller itself may be dropped.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors from the forced-on or restore request.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        info!("Fridge quick compressor cycle");

        let Some(report) = self.wait_for_initial_state(cancel).await else {
            debug!("Compressor cycle cancelled before the fridge reported");
            return Ok(CycleOutcome::Cancelled);
        };

        let input_volts = report.sensors.input_volts;
        if input_volts >= self.config.voltage_threshold {
            info!(
                "Fridge input voltage {:.1}v at or over {}v, skipping compressor cycle",
                report.sensors.input_voltage(),
                self.config.voltage_threshold
            );
            return Ok(CycleOutcome::SkippedHighVoltage { input_volts });
        }

        if report.settings.on {
            debug!("Fridge already on, no compressor cycle needed");
            return Ok(CycleOutcome::AlreadyOn);
        }

        let Some(_guard) = self.tracker.try_enter() else {
            debug!("Compressor cycle already in flight");
            return Ok(CycleOutcome::Busy);
        };
        if cancel.is_cancelled() {
            debug!("Compressor cycle cancelled before forcing the compressor on");
            return Ok(CycleOutcome::Cancelled);
        }

        let previous = report.settings;
        let mut forced = previous;
        forced.on = true;
        forced.temp_set = forced_setpoint(&report, self.layout);
        info!(
            set_temp = forced.temp_set,
            temp = report.sensors.temp,
            "Fridge going to cold setting"
        );
        self.sender.change_settings(forced).await?;

        tokio::select! {
            () = sleep(self.config.on_duration()) => {}
            () = cancel.cancelled() => debug!("Shutdown during compressor cycle, restoring now"),
        }

        self.restore(previous).await?;
        Ok(CycleOutcome::Completed)
    }

    async fn wait_for_initial_state(&self, cancel: &CancellationToken) -> Option<StatusReport> {
        loop {
            if let Some(report) = self.store.report() {
                return Some(report);
            }
            debug!("Waiting to see fridge initialized data");
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = sleep(self.config.init_poll()) => {}
            }
        }
    }

    /// Put the captured power and setpoint back on top of whatever else is current
    ///
    /// Always written: the cached report may still show the pre-cycle settings if the
    /// fridge stopped reporting during the on-window.
    async fn restore(&self, previous: Settings) -> Result<()> {
        let mut restored = self
            .store
            .report()
            .map_or(previous, |current| current.settings);
        restored.on = previous.on;
        restored.temp_set = previous.temp_set;
        if !restored.on {
            restored.locked = false;
        }

        info!(
            set_temp = restored.temp_set,
            on = restored.on,
            "Fridge going back to previous settings"
        );
        self.sender.write_settings(restored).await?;
        Ok(())
    }

    /// Trigger cycles on startup and then periodically until `cancel` fires
    ///
    /// Each cycle runs on its own task so a slow cycle never delays the schedule.
    pub async fn run_schedule(self: Arc<Self>, cancel: CancellationToken) {
        if self.config.on_startup {
            drop(Self::spawn_cycle(&self, &cancel));
        }

        let Some(period) = self.config.interval() else {
            info!("Compressor cycle interval 0, periodic cycling is off");
            cancel.cancelled().await;
            return;
        };

        info!("Compressor cycles every {:?}", period);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => drop(Self::spawn_cycle(&self, &cancel)),
            }
        }
        debug!("Compressor cycle schedule stopped");
    }

    /// Run one cycle on its own task
    ///
    /// The cycle runs to completion, restore included, even if the handle is dropped.
    pub fn spawn_cycle(
        controller: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> JoinHandle<Result<CycleOutcome>> {
        let controller = Arc::clone(controller);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = controller.run_cycle(&cancel).await;
            match &result {
                Ok(outcome) => debug!("Compressor cycle finished: {:?}", outcome),
                Err(e) => warn!("Compressor cycle failed: {}", e),
            }
            result
        })
    }
}
