use crate::{
    error::{FridgeError, Result},
    protocol::{decode, Frame, FrameKind},
    transport::{Link, NotificationSource, NotificationStream, WriteSink},
    types::{Sensors, StatusReport},
};
use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct SimState {
    report: StatusReport,
    subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    written: Vec<Vec<u8>>,
}

/// In-memory fridge speaking the WT-0001 protocol
///
/// Behaves like the real device as far as the bridge can tell: every ping and every
/// accepted command is answered with a status notification reflecting the new state.
/// Used for running the bridge without hardware and in tests.
#[derive(Debug)]
pub struct SimulatedFridge {
    state: Mutex<SimState>,
    responsive: AtomicBool,
    failing: AtomicBool,
    connected: AtomicBool,
}

impl SimulatedFridge {
    /// Create a fridge starting out in `report`
    #[must_use]
    pub fn new(report: StatusReport) -> Self {
        Self {
            state: Mutex::new(SimState {
                report,
                subscribers: Vec::new(),
                written: Vec::new(),
            }),
            responsive: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // state stays consistent even if a holder panicked
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current device state
    #[must_use]
    pub fn report(&self) -> StatusReport {
        self.lock().report
    }

    /// Every frame written to the fridge so far
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Written frames of one kind
    #[must_use]
    pub fn written_of(&self, kind: FrameKind) -> Vec<Vec<u8>> {
        self.lock()
            .written
            .iter()
            .filter(|frame| FrameKind::from_header(frame) == Some(kind))
            .cloned()
            .collect()
    }

    /// Stop (or resume) answering writes with notifications
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Update the sensor readings without notifying
    pub fn set_sensors(&self, sensors: Sensors) {
        self.lock().report.sensors = sensors;
    }

    /// Replace the device state and notify subscribers
    pub fn push_report(&self, report: StatusReport) {
        let mut state = self.lock();
        state.report = report;
        Self::broadcast(&mut state, report.to_bytes().to_vec());
    }

    /// Deliver arbitrary bytes as a notification
    pub fn push_raw(&self, raw: &[u8]) {
        Self::broadcast(&mut self.lock(), raw.to_vec());
    }

    /// Whether the link is still up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn broadcast(state: &mut SimState, payload: Vec<u8>) {
        state
            .subscribers
            .retain(|tx| tx.unbounded_send(payload.clone()).is_ok());
    }

    fn apply(state: &mut SimState, frame: &[u8]) -> bool {
        let Some(kind) = FrameKind::from_header(frame) else {
            warn!("Simulated fridge ignoring unknown frame: {:02X?}", frame);
            return false;
        };

        if kind == FrameKind::Ping {
            return true;
        }

        match decode(kind, frame) {
            Ok(Frame::SetState(command)) => {
                debug!("Simulated fridge applying settings");
                state.report.settings = *command.settings();
                true
            }
            Ok(Frame::SetTemp(command)) => {
                debug!("Simulated fridge applying setpoint {}", command.temp);
                state.report.settings.temp_set = command.temp;
                true
            }
            Ok(other) => {
                warn!("Simulated fridge ignoring {:?} frame", other.kind());
                false
            }
            Err(e) => {
                warn!("Simulated fridge ignoring invalid frame: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl WriteSink for SimulatedFridge {
    async fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(FridgeError::LinkWrite("simulated link closed".to_string()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FridgeError::LinkWrite(
                "simulated write failure".to_string(),
            ));
        }

        trace!("Simulated fridge received {:02X?}", frame);
        let mut state = self.lock();
        state.written.push(frame.to_vec());
        if Self::apply(&mut state, frame) && self.responsive.load(Ordering::SeqCst) {
            let reply = state.report.to_bytes().to_vec();
            Self::broadcast(&mut state, reply);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSource for SimulatedFridge {
    async fn notifications(&self) -> Result<NotificationStream> {
        if !self.is_connected() {
            return Err(FridgeError::Disconnected);
        }
        let (tx, rx) = mpsc::unbounded();
        self.lock().subscribers.push(tx);
        Ok(rx.boxed())
    }
}

#[async_trait]
impl Link for SimulatedFridge {
    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.lock().subscribers.clear();
        debug!("Simulated fridge disconnected");
        Ok(())
    }
}
