use crate::{
    error::{FridgeError, Result},
    protocol::FrameKind,
    transport::WriteSink,
    types::StatusReport,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// Status notification captured from a real fridge
pub(crate) const STATUS_FIXTURE: [u8; 24] = [
    0xfe, 0xfe, 0x15, 0x01, 0x01, 0x01, 0x01, 0x00, 0x42, 0x44, 0xfc, 0x04, 0x00, 0x01, 0x00, 0x00,
    0xfb, 0x00, 0x41, 0x64, 0x0e, 0x03, 0x05, 0x4d,
];

pub(crate) fn fixture_report() -> StatusReport {
    StatusReport::from_bytes(&STATUS_FIXTURE).unwrap()
}

/// Write sink that keeps every frame and can be told to start failing
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames_of(&self, kind: FrameKind) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| FrameKind::from_header(frame) == Some(kind))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WriteSink for RecordingSink {
    async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FridgeError::LinkWrite("sink closed".to_string()));
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}
