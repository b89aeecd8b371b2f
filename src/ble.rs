use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::{future, stream::StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{FridgeError, Result},
    transport::{Link, NotificationSource, NotificationStream, WriteSink},
    types::ConnectionParams,
};

/// GATT link to a K25 fridge
///
/// Holds the connected peripheral and the two characteristics the protocol uses.
/// Writes go to the command characteristic, status frames arrive as notifications on
/// the other one.
pub struct BleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    write_type: WriteType,
}

impl BleLink {
    /// Scan for the fridge, connect and subscribe to status notifications
    ///
    /// An empty [`ConnectionParams::address`] accepts the first device advertising the
    /// fridge service.
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::InvalidParameters`] for malformed UUIDs or addresses,
    /// [`FridgeError::DeviceNotFound`] if no adapter or matching device is found,
    /// [`FridgeError::Timeout`] if connecting takes too long,
    /// [`FridgeError::ConnectionFailed`] if the connection is refused,
    /// [`FridgeError::Protocol`] if the expected characteristics are missing,
    /// or [`FridgeError::Ble`] for other Bluetooth errors.
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let service_uuid = parse_uuid(&params.service_uuid, "service")?;
        let write_uuid = parse_uuid(&params.write_char_uuid, "write characteristic")?;
        let notify_uuid = parse_uuid(&params.notify_char_uuid, "notify characteristic")?;
        let address = parse_address(&params.address)?;

        let manager = Manager::new().await?;
        let central = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(FridgeError::DeviceNotFound)?;

        let peripheral = find_fridge(&central, params, service_uuid, address).await?;
        info!("Connecting to fridge at {}", peripheral.address());

        timeout(Duration::from_millis(params.timeout_ms), peripheral.connect())
            .await
            .map_err(|_| FridgeError::Timeout {
                timeout_ms: params.timeout_ms,
            })?
            .map_err(|e| FridgeError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid, what: &str| {
            characteristics
                .iter()
                .find(|c| c.service_uuid == service_uuid && c.uuid == uuid)
                .cloned()
                .ok_or_else(|| FridgeError::Protocol(format!("{what} characteristic not found")))
        };
        let write_char = find(write_uuid, "Write")?;
        let notify_char = find(notify_uuid, "Notify")?;
        debug!("Found writable characteristic: {}", write_char.uuid);

        peripheral.subscribe(&notify_char).await?;

        let write_type = if write_char.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        info!("Connected to fridge at {}", peripheral.address());
        Ok(Self {
            peripheral,
            write_char,
            notify_char,
            write_type,
        })
    }

    /// Check if the fridge is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Bluetooth address of the fridge
    #[must_use]
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }
}

#[async_trait]
impl WriteSink for BleLink {
    async fn write(&self, frame: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.write_char, frame, self.write_type)
            .await
            .map_err(|e| FridgeError::LinkWrite(e.to_string()))
    }
}

#[async_trait]
impl NotificationSource for BleLink {
    async fn notifications(&self) -> Result<NotificationStream> {
        let uuid = self.notify_char.uuid;
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(move |notification| {
                future::ready((notification.uuid == uuid).then_some(notification.value))
            })
            .boxed())
    }
}

#[async_trait]
impl Link for BleLink {
    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.unsubscribe(&self.notify_char).await {
            warn!("Failed to unsubscribe from status notifications: {}", e);
        }
        self.peripheral.disconnect().await?;
        info!("Disconnected from fridge at {}", self.peripheral.address());
        Ok(())
    }
}

/// Scan for a peripheral advertising the fridge service
async fn find_fridge(
    central: &Adapter,
    params: &ConnectionParams,
    service_uuid: Uuid,
    address: Option<BDAddr>,
) -> Result<Peripheral> {
    info!("Scanning for fridge for {}ms", params.scan_timeout_ms);

    central
        .start_scan(ScanFilter {
            services: vec![service_uuid],
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;
    central.stop_scan().await?;

    let peripherals = central.peripherals().await?;
    debug!("Scan found {} peripheral(s)", peripherals.len());

    peripherals
        .into_iter()
        .find(|p| address.map_or(true, |wanted| p.address() == wanted))
        .ok_or(FridgeError::DeviceNotFound)
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| FridgeError::InvalidParameters(format!("Invalid {what} UUID: {e}")))
}

fn parse_address(value: &str) -> Result<Option<BDAddr>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<BDAddr>()
        .map(Some)
        .map_err(|e| FridgeError::InvalidParameters(format!("Invalid address {value}: {e}")))
}
