#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # k25link
//!
//! A bridge core for the WT-0001/K25 portable 12V compressor fridge, controlled over
//! Bluetooth Low Energy.
//!
//! The fridge speaks a small binary protocol on two GATT characteristics: commands are
//! written to one, and a full status report comes back as a notification on the other
//! whenever anything changes and in reply to every keep-alive ping. The link only
//! copes with one outstanding write at a time, so this crate funnels every write
//! through a single task and keeps an authoritative copy of the last report for
//! readers.
//!
//! ## Pieces
//!
//! - [`protocol`]: frame codec with the KISS checksum
//! - [`store`]: the last accepted status report, readable from anywhere
//! - [`ingest`]: turns notifications into store updates
//! - [`dispatcher`]: the single writer, including the keep-alive ping
//! - [`cycle`]: forces the compressor on now and then so a power bank does not
//!   switch itself off
//! - [`device`]: [`Fridge`], which wires all of the above to a [`transport::Link`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use k25link::{BridgeConfig, ConnectionParams, Fridge, TemperatureUnit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = ConnectionParams::for_address("D8:17:D1:F1:B9:78");
//!     let fridge = Fridge::connect(&params, BridgeConfig::default()).await?;
//!
//!     // Cool to 4°C, whatever unit the fridge displays
//!     fridge.request_temperature_change(4.0, TemperatureUnit::Celsius).await?;
//!
//!     // Wait for ctrl-c, then restore any running compressor cycle and disconnect
//!     tokio::signal::ctrl_c().await?;
//!     fridge.shutdown().await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy link to the fridge
pub mod ble;
/// Compressor cycle controller
pub mod cycle;
/// Main fridge control interface
pub mod device;
/// Single-writer command dispatcher
pub mod dispatcher;
/// Error types and handling
pub mod error;
/// Notification ingestion
pub mod ingest;
/// Frame codec for the WT-0001 protocol
pub mod protocol;
/// In-memory fridge for running without hardware
pub mod sim;
/// Shared cache of the latest status report
pub mod store;
/// Capabilities the engine needs from a link
pub mod transport;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export the main types for convenient usage
pub use cycle::CycleOutcome;
pub use device::Fridge;
pub use dispatcher::WriteOutcome;
pub use error::{FrameError, FridgeError, Result};
pub use types::{
    BoundLayout, BridgeConfig, ConnectionParams, CycleConfig, DispatchConfig, FridgeState,
    Sensors, Settings, StatusReport, TempBounds, TemperatureUnit,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GATT service carrying the fridge characteristics
pub const K25_SERVICE_UUID: &str = "00001234-0000-1000-8000-00805f9b34fb";

/// Characteristic commands are written to
pub const K25_WRITE_CHAR_UUID: &str = "00001235-0000-1000-8000-00805f9b34fb";

/// Characteristic status reports are notified on
///
/// The fridge notifies a full 24-byte status report on this characteristic after
/// every accepted command and every keep-alive ping.
pub const K25_NOTIFY_CHAR_UUID: &str = "00001236-0000-1000-8000-00805f9b34fb";
