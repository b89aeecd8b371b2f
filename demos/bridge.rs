use k25link::{BridgeConfig, ConnectionParams, CycleConfig, Fridge, Result};
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Usage: bridge <address> [cycle interval in minutes]
    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_default();
    let cycle_minutes: u64 = args.next().and_then(|m| m.parse().ok()).unwrap_or(0);

    let config = BridgeConfig {
        cycle: CycleConfig {
            interval_ms: cycle_minutes * 60_000,
            ..CycleConfig::default()
        },
        ..BridgeConfig::default()
    };

    let target = if address.is_empty() {
        "(any)"
    } else {
        address.as_str()
    };
    info!("Connecting to fridge {}", target);
    let fridge = match Fridge::connect(&ConnectionParams::for_address(address), config).await {
        Ok(fridge) => fridge,
        Err(e) => {
            error!("Failed to connect to fridge: {}", e);
            return Err(e);
        }
    };

    let mut power = fridge.power_state();
    let mut status = interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Got ctrl-c"),
                    Err(e) => error!("Failed to listen for ctrl-c: {}", e),
                }
                break;
            }
            () = fridge.closed() => {
                warn!("Link to the fridge went down");
                break;
            }
            Ok(()) = power.changed() => {
                if let Some(on) = *power.borrow_and_update() {
                    info!("Fridge is now {}", if on { "on" } else { "off" });
                }
            }
            _ = status.tick() => {
                if let Some(report) = fridge.report() {
                    info!(
                        "{} ({:.1}°C, set {:.1}°C)",
                        report,
                        report.temperature_celsius(),
                        report.temp_set_celsius()
                    );
                }
            }
        }
    }

    fridge.shutdown().await
}
