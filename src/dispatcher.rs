use crate::{
    error::{FridgeError, Result},
    protocol::{SetStateCommand, SetTempCommand, PING_COMMAND},
    store::StateStore,
    transport::WriteSink,
    types::{DispatchConfig, Settings, StatusReport, TemperatureUnit},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// What happened to an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A command was written to the fridge
    Written,
    /// The fridge already has the requested settings; nothing was written
    Unchanged,
}

#[derive(Debug)]
enum Request {
    Settings {
        desired: Settings,
        always_write: bool,
        reply: oneshot::Sender<Result<WriteOutcome>>,
    },
    Temperature {
        value: f64,
        unit: TemperatureUnit,
        reply: oneshot::Sender<Result<WriteOutcome>>,
    },
}

/// Handle for submitting requests to the [`CommandDispatcher`]
///
/// Submission is a handoff: the queue holds a single request, so a caller waits until
/// the dispatcher has taken it and then receives the outcome of that request.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Request>,
}

impl CommandSender {
    /// Ask the fridge to adopt `desired`
    ///
    /// The setpoint limits in `desired` are ignored; the limits last reported by the
    /// fridge are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::Uninitialized`] before the first status report,
    /// [`FridgeError::OutOfBounds`] if the setpoint is outside the device limits,
    /// [`FridgeError::LinkWrite`] if the write failed and
    /// [`FridgeError::DispatcherClosed`] once the dispatcher has stopped.
    pub async fn change_settings(&self, desired: Settings) -> Result<WriteOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.submit(
            Request::Settings {
                desired,
                always_write: false,
                reply,
            },
            outcome,
        )
        .await
    }

    /// Like [`CommandSender::change_settings`], but writes even when the last report
    /// already shows `desired`
    ///
    /// For settings that must reach the fridge although the cached report may be stale,
    /// such as the restore at the end of a compressor cycle.
    ///
    /// # Errors
    ///
    /// Same as [`CommandSender::change_settings`].
    pub async fn write_settings(&self, desired: Settings) -> Result<WriteOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.submit(
            Request::Settings {
                desired,
                always_write: true,
                reply,
            },
            outcome,
        )
        .await
    }

    /// Ask the fridge to change its setpoint to `value` expressed in `unit`
    ///
    /// The value is converted to the fridge's display unit and clamped to its limits.
    ///
    /// # Errors
    ///
    /// Same as [`CommandSender::change_settings`], except that out-of-range values are
    /// clamped instead of rejected. Non-finite values yield
    /// [`FridgeError::InvalidParameters`].
    pub async fn change_temperature(
        &self,
        value: f64,
        unit: TemperatureUnit,
    ) -> Result<WriteOutcome> {
        if !value.is_finite() {
            return Err(FridgeError::InvalidParameters(format!(
                "temperature must be finite, got {value}"
            )));
        }
        let (reply, outcome) = oneshot::channel();
        self.submit(Request::Temperature { value, unit, reply }, outcome)
            .await
    }

    /// Whether the dispatcher is still accepting requests
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(
        &self,
        request: Request,
        outcome: oneshot::Receiver<Result<WriteOutcome>>,
    ) -> Result<WriteOutcome> {
        self.tx
            .send(request)
            .await
            .map_err(|_| FridgeError::DispatcherClosed)?;
        outcome.await.map_err(|_| FridgeError::DispatcherClosed)?
    }
}

/// The single writer to the fridge
///
/// Multiplexes the keep-alive timer and queued settings/temperature requests into
/// serialized writes. At most one write is in flight at any time, and cancellation is
/// only observed between writes.
pub struct CommandDispatcher<W: WriteSink + ?Sized> {
    sink: Arc<W>,
    store: StateStore,
    config: DispatchConfig,
    rx: mpsc::Receiver<Request>,
}

/// Create a dispatcher writing to `sink` and the sender feeding it
pub fn channel<W: WriteSink + ?Sized>(
    sink: Arc<W>,
    store: StateStore,
    config: DispatchConfig,
) -> (CommandDispatcher<W>, CommandSender) {
    let (tx, rx) = mpsc::channel(1);
    let dispatcher = CommandDispatcher {
        sink,
        store,
        config,
        rx,
    };
    (dispatcher, CommandSender { tx })
}

impl<W: WriteSink + ?Sized> CommandDispatcher<W> {
    /// Run until cancelled, until every sender is gone or until a write fails
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::LinkWrite`] when the sink rejects a write. The link is in
    /// an unknown state afterwards and the dispatcher does not retry.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Command writer starting, keep-alive every {}ms",
            self.config.keepalive_interval_ms
        );

        let mut keepalive = interval(self.config.keepalive_interval());
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                _ = keepalive.tick() => {
                    trace!("Writing keep-alive ping");
                    if let Err(e) = self.write(&PING_COMMAND).await {
                        break Err(e);
                    }
                }
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if let Err(e) = self.handle(request).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
            }
        };

        self.rx.close();
        match &result {
            Ok(()) => debug!("Command writer stopped"),
            Err(e) => error!("Command writer stopped: {}", e),
        }
        result
    }

    /// Process one request; only a failed write is returned as an error
    async fn handle(&self, request: Request) -> Result<()> {
        let (frame, reply) = match request {
            Request::Settings {
                desired,
                always_write,
                reply,
            } => (self.settings_frame(desired, always_write), reply),
            Request::Temperature { value, unit, reply } => {
                (self.temperature_frame(value, unit), reply)
            }
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = reply.send(Ok(WriteOutcome::Unchanged));
                return Ok(());
            }
            Err(e) => {
                debug!("Rejected request: {}", e);
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };

        match self.write(&frame).await {
            Ok(()) => {
                let _ = reply.send(Ok(WriteOutcome::Written));
                Ok(())
            }
            Err(FridgeError::LinkWrite(reason)) => {
                let _ = reply.send(Err(FridgeError::LinkWrite(reason.clone())));
                Err(FridgeError::LinkWrite(reason))
            }
            Err(e) => Err(e),
        }
    }

    fn current_report(&self) -> Result<StatusReport> {
        self.store.report().ok_or(FridgeError::Uninitialized)
    }

    /// Build the settings frame, or `None` if the fridge already has those settings
    /// and `always_write` is not set
    fn settings_frame(&self, desired: Settings, always_write: bool) -> Result<Option<Bytes>> {
        let current = self.current_report()?.settings;

        let mut merged = desired;
        merged.setpoint_limits = current.setpoint_limits;
        if merged == current && !always_write {
            debug!("Settings unchanged, skipping write");
            return Ok(None);
        }

        let command = SetStateCommand::new(merged, self.config.bound_layout)?;
        info!(
            on = merged.on,
            set_temp = merged.temp_set,
            eco = merged.eco_mode,
            locked = merged.locked,
            "Writing set state payload"
        );
        Ok(Some(command.to_bytes()))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn temperature_frame(&self, value: f64, unit: TemperatureUnit) -> Result<Option<Bytes>> {
        let current = self.current_report()?.settings;

        let device_unit = current.unit();
        let native = unit.convert(value, device_unit);
        let bounds = current.bounds(self.config.bound_layout);
        let clamped = bounds.clamp(native).round();
        if (clamped - native.round()).abs() > f64::EPSILON {
            debug!(
                "Clamped requested {:.1}{} to {}{} (limits {}..={})",
                native, device_unit, clamped, device_unit, bounds.lowest, bounds.highest
            );
        }

        // clamped lies within two i8 limits
        let temp = clamped as i8;
        info!("Writing set temp payload: {}{}", temp, device_unit);
        Ok(Some(SetTempCommand::new(temp).to_bytes()))
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        trace!("Writing frame: {:02X?}", frame);
        self.sink.write(frame).await.map_err(|e| match e {
            FridgeError::LinkWrite(reason) => FridgeError::LinkWrite(reason),
            other => FridgeError::LinkWrite(other.to_string()),
        })
    }
}
