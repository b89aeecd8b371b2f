use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw notification payloads in arrival order, one item per device notification
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Byte sink for the command characteristic
///
/// The bridge guarantees that only the command dispatcher calls [`WriteSink::write`],
/// one frame at a time.
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Write one complete frame
    async fn write(&self, frame: &[u8]) -> Result<()>;
}

/// Source of status notifications
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Start receiving notifications
    async fn notifications(&self) -> Result<NotificationStream>;
}

/// A connected fridge link
#[async_trait]
pub trait Link: WriteSink + NotificationSource {
    /// Tear the link down
    async fn disconnect(&self) -> Result<()>;
}
