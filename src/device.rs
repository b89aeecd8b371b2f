use crate::{
    ble::BleLink,
    cycle::{CompressorCycleController, CycleOutcome, CycleTracker},
    dispatcher::{self, CommandSender, WriteOutcome},
    error::{FridgeError, Result},
    ingest::NotificationIngest,
    store::StateStore,
    transport::Link,
    types::{BridgeConfig, ConnectionParams, FridgeState, Settings, StatusReport, TemperatureUnit},
};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Tasks {
    dispatcher: JoinHandle<Result<()>>,
    ingest: JoinHandle<()>,
    schedule: JoinHandle<()>,
}

/// Bridge to one K25 fridge
///
/// `Fridge` owns the whole engine behind a connected link: the notification task
/// keeping the [`StateStore`] current, the single command writer with its keep-alive,
/// and the compressor cycle schedule. All methods take `&self` and are safe to call
/// from any number of tasks.
///
/// # Examples
///
/// ```no_run
/// use k25link::{BridgeConfig, ConnectionParams, Fridge, TemperatureUnit};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let params = ConnectionParams::for_address("D8:17:D1:F1:B9:78");
///     let fridge = Fridge::connect(&params, BridgeConfig::default()).await?;
///
///     fridge.request_temperature_change(3.0, TemperatureUnit::Celsius).await?;
///     println!("{:?}", fridge.read_state());
///
///     fridge.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Fridge {
    link: Arc<dyn Link>,
    store: StateStore,
    sender: CommandSender,
    power: watch::Receiver<Option<bool>>,
    controller: Arc<CompressorCycleController>,
    config: BridgeConfig,
    shutdown: CancellationToken,
    link_cancel: CancellationToken,
    closed: CancellationToken,
    tasks: Option<Tasks>,
}

impl Fridge {
    /// Connect to the fridge over Bluetooth and start the bridge
    ///
    /// # Errors
    ///
    /// Returns any error from [`BleLink::connect`] or [`Fridge::start`].
    pub async fn connect(params: &ConnectionParams, config: BridgeConfig) -> Result<Self> {
        let link = BleLink::connect(params).await?;
        Self::start(Arc::new(link), config).await
    }

    /// Start the bridge on an already connected link
    ///
    /// # Errors
    ///
    /// Returns an error if the link refuses to deliver notifications.
    pub async fn start(link: Arc<dyn Link>, config: BridgeConfig) -> Result<Self> {
        let notifications = link.notifications().await?;

        let store = StateStore::new();
        let shutdown = CancellationToken::new();
        let link_cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        let ingest = NotificationIngest::new(store.clone());
        let power = ingest.power_state();
        let ingest = {
            let cancel = link_cancel.clone();
            let closed = closed.clone().drop_guard();
            tokio::spawn(async move {
                let _closed = closed;
                ingest.run(notifications, cancel).await;
            })
        };

        let (writer, sender) =
            dispatcher::channel(Arc::clone(&link), store.clone(), config.dispatch.clone());
        let dispatcher = {
            let cancel = link_cancel.clone();
            let closed = closed.clone().drop_guard();
            tokio::spawn(async move {
                let _closed = closed;
                writer.run(cancel).await
            })
        };

        let controller = Arc::new(CompressorCycleController::new(
            store.clone(),
            sender.clone(),
            config.cycle.clone(),
            config.dispatch.bound_layout,
        ));
        let schedule = tokio::spawn(Arc::clone(&controller).run_schedule(shutdown.clone()));

        info!("Fridge bridge started");
        Ok(Self {
            link,
            store,
            sender,
            power,
            controller,
            config,
            shutdown,
            link_cancel,
            closed,
            tasks: Some(Tasks {
                dispatcher,
                ingest,
                schedule,
            }),
        })
    }

    /// Most recent state reported by the fridge
    #[must_use]
    pub fn read_state(&self) -> FridgeState {
        self.store.read()
    }

    /// Most recent status report, `None` until the fridge has reported
    #[must_use]
    pub fn report(&self) -> Option<StatusReport> {
        self.store.report()
    }

    /// Receiver woken on every accepted status report
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FridgeState> {
        self.store.subscribe()
    }

    /// Receiver woken only when the soft power state changes
    #[must_use]
    pub fn power_state(&self) -> watch::Receiver<Option<bool>> {
        self.power.clone()
    }

    /// Bridge configuration
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Tracker of in-flight compressor cycles
    #[must_use]
    pub fn cycle_tracker(&self) -> &CycleTracker {
        self.controller.tracker()
    }

    /// Ask the fridge to adopt `desired`
    ///
    /// # Errors
    ///
    /// See [`CommandSender::change_settings`].
    pub async fn request_settings_change(&self, desired: Settings) -> Result<WriteOutcome> {
        self.sender.change_settings(desired).await
    }

    /// Ask the fridge to change its setpoint
    ///
    /// # Errors
    ///
    /// See [`CommandSender::change_temperature`].
    pub async fn request_temperature_change(
        &self,
        value: f64,
        unit: TemperatureUnit,
    ) -> Result<WriteOutcome> {
        self.sender.change_temperature(value, unit).await
    }

    /// Switch the fridge on or off
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::Uninitialized`] before the first status report, or any
    /// error from [`Fridge::request_settings_change`].
    pub async fn set_on(&self, on: bool) -> Result<WriteOutcome> {
        info!("Setting fridge on={}", on);
        self.update_settings(|settings| settings.on = on).await
    }

    /// Enable or disable eco mode
    ///
    /// # Errors
    ///
    /// Same as [`Fridge::set_on`].
    pub async fn set_eco_mode(&self, eco_mode: bool) -> Result<WriteOutcome> {
        info!("Setting fridge eco={}", eco_mode);
        self.update_settings(|settings| settings.eco_mode = eco_mode)
            .await
    }

    /// Lock or unlock the keypad
    ///
    /// # Errors
    ///
    /// Same as [`Fridge::set_on`].
    pub async fn set_locked(&self, locked: bool) -> Result<WriteOutcome> {
        info!("Setting fridge locked={}", locked);
        self.update_settings(|settings| settings.locked = locked)
            .await
    }

    async fn update_settings(&self, change: impl FnOnce(&mut Settings)) -> Result<WriteOutcome> {
        let mut settings = self.report().ok_or(FridgeError::Uninitialized)?.settings;
        change(&mut settings);
        self.request_settings_change(settings).await
    }

    /// Run a compressor cycle now, outside the schedule
    ///
    /// The cycle runs on its own task, so dropping this future never strands the
    /// fridge in the forced-cold setting; [`Fridge::shutdown`] still waits for the
    /// restore.
    ///
    /// # Errors
    ///
    /// See [`CompressorCycleController::run_cycle`]. Returns [`FridgeError::Task`] if
    /// the cycle task panicked.
    pub async fn cycle_compressor(&self) -> Result<CycleOutcome> {
        CompressorCycleController::spawn_cycle(&self.controller, &self.shutdown)
            .await
            .map_err(|e| FridgeError::Task(e.to_string()))?
    }

    /// Whether the link has gone down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolve once the command writer or the notification task has stopped
    ///
    /// After a failed write the link is in an unknown state; callers should shut the
    /// bridge down and reconnect.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Stop the bridge and disconnect
    ///
    /// In-flight compressor cycles restore the previous settings first. If that takes
    /// longer than [`BridgeConfig::shutdown_deadline`] the link is torn down anyway.
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::Timeout`] if the deadline expired with a cycle still in
    /// flight.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Fridge bridge shutting down");
        self.shutdown.cancel();

        let deadline = self.config.shutdown_deadline();
        let drained = timeout(deadline, self.controller.tracker().wait_idle())
            .await
            .is_ok();
        if drained {
            debug!("No compressor cycle in flight");
        } else {
            error!(
                "Compressor cycle still in flight after {:?}, disconnecting anyway",
                deadline
            );
        }

        self.link_cancel.cancel();
        if let Some(tasks) = self.tasks.take() {
            Self::join(tasks).await;
        }

        if let Err(e) = self.link.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }
        info!("Fridge bridge stopped");

        if drained {
            Ok(())
        } else {
            Err(FridgeError::Timeout {
                timeout_ms: self.config.shutdown_deadline_ms,
            })
        }
    }

    async fn join(tasks: Tasks) {
        if let Err(e) = tasks.schedule.await {
            warn!("Cycle schedule task failed: {}", e);
        }
        match tasks.dispatcher.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Command writer had stopped with: {}", e),
            Err(e) => warn!("Command writer task failed: {}", e),
        }
        if let Err(e) = tasks.ingest.await {
            warn!("State updater task failed: {}", e);
        }
    }
}

impl Drop for Fridge {
    fn drop(&mut self) {
        if self.tasks.take().is_none() {
            return;
        }

        self.shutdown.cancel();
        self.link_cancel.cancel();

        let link = Arc::clone(&self.link);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = link.disconnect().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::FrameKind, sim::SimulatedFridge, test_support::fixture_report,
        types::CycleConfig,
    };
    use std::time::Duration;

    fn quiet_config() -> BridgeConfig {
        BridgeConfig {
            cycle: CycleConfig {
                on_startup: false,
                ..CycleConfig::default()
            },
            ..BridgeConfig::default()
        }
    }

    async fn start(report: StatusReport, config: BridgeConfig) -> (Arc<SimulatedFridge>, Fridge) {
        let sim = Arc::new(SimulatedFridge::new(report));
        let fridge = Fridge::start(sim.clone(), config).await.unwrap();
        let mut state = fridge.subscribe();
        state.wait_for(FridgeState::is_known).await.unwrap();
        (sim, fridge)
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_follows_fridge() {
        let (sim, fridge) = start(fixture_report(), quiet_config()).await;
        assert_eq!(fridge.report(), Some(fixture_report()));

        let mut report = fixture_report();
        report.sensors.temp = 40;
        sim.push_report(report);
        let mut state = fridge.subscribe();
        state
            .wait_for(|state| state.report().is_some_and(|r| r.sensors.temp == 40))
            .await
            .unwrap();

        fridge.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_write_settings() {
        let (sim, fridge) = start(fixture_report(), quiet_config()).await;
        let mut power = fridge.power_state();
        assert_eq!(*power.borrow_and_update(), Some(true));

        assert_eq!(fridge.set_on(false).await.unwrap(), WriteOutcome::Written);
        power.changed().await.unwrap();
        assert_eq!(*power.borrow(), Some(false));
        assert!(!sim.report().settings.on);

        let mut state = fridge.subscribe();
        fridge.set_eco_mode(false).await.unwrap();
        state
            .wait_for(|state| state.report().is_some_and(|r| !r.settings.eco_mode))
            .await
            .unwrap();
        fridge.set_locked(false).await.unwrap();
        state
            .wait_for(|state| state.report().is_some_and(|r| !r.settings.locked))
            .await
            .unwrap();
        let settings = sim.report().settings;
        assert!(!settings.on);
        assert!(!settings.eco_mode);
        assert!(!settings.locked);

        // already unlocked
        assert_eq!(
            fridge.set_locked(false).await.unwrap(),
            WriteOutcome::Unchanged
        );

        fridge.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_request() {
        let (sim, fridge) = start(fixture_report(), quiet_config()).await;

        fridge
            .request_temperature_change(2.0, TemperatureUnit::Celsius)
            .await
            .unwrap();
        // 35.6°F rounds to 36
        assert_eq!(sim.report().settings.temp_set, 36);
        assert_eq!(sim.written_of(FrameKind::SetTemp).len(), 1);

        fridge.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_cycle_restore() {
        let mut report = fixture_report();
        report.settings.on = false;
        report.sensors.input_volts = 12;
        let (sim, fridge) = start(report, BridgeConfig::default()).await;

        while !sim.report().settings.on {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fridge.cycle_tracker().in_flight(), 1);

        fridge.shutdown().await.unwrap();
        let settings = sim.report().settings;
        assert!(!settings.on);
        assert_eq!(settings.temp_set, report.settings.temp_set);
        assert!(!sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_manual_cycle_still_restores() {
        let mut report = fixture_report();
        report.settings.on = false;
        report.sensors.input_volts = 12;
        let (sim, fridge) = start(report, quiet_config()).await;

        // caller gives up half way through the on-window
        let abandoned =
            tokio::time::timeout(Duration::from_secs(2), fridge.cycle_compressor()).await;
        assert!(abandoned.is_err());
        assert!(sim.report().settings.on);
        assert_eq!(fridge.cycle_tracker().in_flight(), 1);

        fridge.shutdown().await.unwrap();
        assert!(!sim.report().settings.on);
        assert_eq!(sim.written_of(FrameKind::SetState).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_cycle_outcome() {
        let (sim, fridge) = start(fixture_report(), quiet_config()).await;

        // the fixture fridge runs from 14.3v
        assert_eq!(
            fridge.cycle_compressor().await.unwrap(),
            CycleOutcome::SkippedHighVoltage { input_volts: 14 }
        );
        assert!(sim.written_of(FrameKind::SetState).is_empty());

        fridge.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline() {
        let config = BridgeConfig {
            shutdown_deadline_ms: 1_000,
            ..quiet_config()
        };
        let (sim, fridge) = start(fixture_report(), config).await;
        let _stuck = fridge.cycle_tracker().enter();

        let result = fridge.shutdown().await;
        assert!(matches!(
            result,
            Err(FridgeError::Timeout { timeout_ms: 1_000 })
        ));
        assert!(!sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_closes_bridge() {
        let (sim, fridge) = start(fixture_report(), quiet_config()).await;
        assert!(!fridge.is_closed());

        sim.fail_writes();
        fridge.closed().await;
        assert!(fridge.is_closed());

        let result = fridge.set_on(false).await;
        assert!(matches!(result, Err(FridgeError::DispatcherClosed)));

        fridge.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_before_first_report() {
        let sim = Arc::new(SimulatedFridge::new(fixture_report()));
        sim.set_responsive(false);
        let fridge = Fridge::start(sim.clone(), quiet_config()).await.unwrap();

        assert_eq!(fridge.read_state(), FridgeState::Uninitialized);
        assert!(matches!(
            fridge.set_on(false).await,
            Err(FridgeError::Uninitialized)
        ));
        assert!(matches!(
            fridge
                .request_temperature_change(3.0, TemperatureUnit::Celsius)
                .await,
            Err(FridgeError::Uninitialized)
        ));

        fridge.shutdown().await.unwrap();
    }
}
