use k25link::{
    sim::SimulatedFridge, BridgeConfig, Fridge, Result, Sensors, Settings, StatusReport,
    TemperatureUnit,
};
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    // Switched off, running from a 12.4v power bank
    let initial = StatusReport {
        settings: Settings {
            temp_set: 4,
            setpoint_limits: [20, -20],
            hysteresis: 2,
            ..Settings::default()
        },
        sensors: Sensors {
            temp: 9,
            battery: 0x64,
            input_volts: 12,
            input_tenths: 4,
        },
    };
    let sim = Arc::new(SimulatedFridge::new(initial));

    let fridge = Fridge::start(sim.clone(), BridgeConfig::default()).await?;
    let mut state = fridge.subscribe();
    let _ = state.wait_for(|state| state.is_known()).await;
    info!("Simulated fridge reports {}", sim.report());

    // The startup compressor cycle is running now
    tokio::time::sleep(Duration::from_secs(3)).await;
    info!("During the cycle: {}", sim.report());

    fridge
        .request_temperature_change(37.0, TemperatureUnit::Fahrenheit)
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("After asking for 37°F: {}", sim.report());

    // Shutdown ends the cycle early and puts the pre-cycle power and setpoint back
    fridge.shutdown().await?;
    info!("After shutdown: {}", sim.report());
    Ok(())
}
