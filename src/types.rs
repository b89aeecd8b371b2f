use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Temperature unit of a reading or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    /// Degrees Celsius
    Celsius,
    /// Degrees Fahrenheit
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert `value` expressed in `self` into `target`
    #[must_use]
    pub fn convert(self, value: f64, target: Self) -> f64 {
        match (self, target) {
            (Self::Celsius, Self::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
            (Self::Fahrenheit, Self::Celsius) => (value - 32.0) * 5.0 / 9.0,
            _ => value,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Celsius => write!(f, "°C"),
            Self::Fahrenheit => write!(f, "°F"),
        }
    }
}

/// Which of the two setpoint-limit bytes carries the upper bound
///
/// Firmware revisions disagree on the order of the E1/E2 menu values in the settings
/// block, so the assignment is configurable instead of fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundLayout {
    /// First limit byte is the highest setpoint, second is the lowest
    #[default]
    HighestFirst,
    /// First limit byte is the lowest setpoint, second is the highest
    LowestFirst,
}

/// Setpoint limits reported by the device, in device units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBounds {
    /// Lowest allowed setpoint
    pub lowest: i8,
    /// Highest allowed setpoint
    pub highest: i8,
}

impl TempBounds {
    /// Whether `temp` lies within the limits (inclusive)
    #[must_use]
    pub const fn contains(&self, temp: i8) -> bool {
        temp >= self.lowest && temp <= self.highest
    }

    /// Clamp a value into the limits
    ///
    /// Never panics on inverted limits; the upper bound wins, as it does on the device.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(f64::from(self.lowest)).min(f64::from(self.highest))
    }
}

/// Sensor readings, only ever populated from device notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sensors {
    /// Cabinet temperature in the device's current unit
    pub temp: i8,
    /// Unknown byte, possibly battery level
    pub battery: u8,
    /// Input voltage, whole volts
    pub input_volts: u8,
    /// Input voltage, tenths of a volt
    pub input_tenths: u8,
}

impl Sensors {
    /// Input voltage in volts
    #[must_use]
    pub fn input_voltage(&self) -> f32 {
        f32::from(self.input_volts) + f32::from(self.input_tenths) / 10.0
    }

    /// Input voltage formatted for humans, e.g. `12.3v`
    #[must_use]
    pub fn voltage_string(&self) -> String {
        format!("{}.{}v", self.input_volts, self.input_tenths)
    }
}

/// User settings of the fridge
///
/// Field order matches the wire order of the 14-byte settings block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Keypad lock
    pub locked: bool,
    /// Soft power state
    pub on: bool,
    /// Power efficient mode
    pub eco_mode: bool,
    /// Input voltage cutoff level (H/M/L)
    pub voltage_cutoff: u8,
    /// Desired temperature (thermostat)
    pub temp_set: i8,
    /// E1/E2 setpoint limits in wire order, see [`BoundLayout`]
    pub setpoint_limits: [i8; 2],
    /// E3: temperature return difference
    pub hysteresis: i8,
    /// E4: soft start delay in minutes
    pub soft_start_delay: i8,
    /// E5: device displays and reports Fahrenheit
    pub fahrenheit: bool,
    /// E6..E8: compensation for the high, mid and low temperature ranges
    pub temp_compensation: [i8; 3],
    /// E9: shutdown compensation
    pub shutdown_compensation: i8,
}

impl Settings {
    /// Unit the device reports and accepts temperatures in
    #[must_use]
    pub const fn unit(&self) -> TemperatureUnit {
        if self.fahrenheit {
            TemperatureUnit::Fahrenheit
        } else {
            TemperatureUnit::Celsius
        }
    }

    /// Resolve the setpoint limits with the given layout
    #[must_use]
    pub const fn bounds(&self, layout: BoundLayout) -> TempBounds {
        let [first, second] = self.setpoint_limits;
        match layout {
            BoundLayout::HighestFirst => TempBounds {
                lowest: second,
                highest: first,
            },
            BoundLayout::LowestFirst => TempBounds {
                lowest: first,
                highest: second,
            },
        }
    }
}

/// Full device state carried by a status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// User settings
    pub settings: Settings,
    /// Sensor readings
    pub sensors: Sensors,
}

impl StatusReport {
    /// Cabinet temperature converted to Celsius
    #[must_use]
    pub fn temperature_celsius(&self) -> f64 {
        self.settings
            .unit()
            .convert(f64::from(self.sensors.temp), TemperatureUnit::Celsius)
    }

    /// Setpoint converted to Celsius
    #[must_use]
    pub fn temp_set_celsius(&self) -> f64 {
        self.settings
            .unit()
            .convert(f64::from(self.settings.temp_set), TemperatureUnit::Celsius)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.settings.unit();
        write!(
            f,
            "on={} eco={} locked={} temp={}{unit} set={}{unit} input={}",
            self.settings.on,
            self.settings.eco_mode,
            self.settings.locked,
            self.sensors.temp,
            self.settings.temp_set,
            self.sensors.voltage_string(),
        )
    }
}

/// What the bridge currently knows about the fridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FridgeState {
    /// No valid status report has arrived yet
    #[default]
    Uninitialized,
    /// Most recently accepted status report
    Known(StatusReport),
}

impl FridgeState {
    /// The current report, if any
    #[must_use]
    pub const fn report(&self) -> Option<&StatusReport> {
        match self {
            Self::Known(report) => Some(report),
            Self::Uninitialized => None,
        }
    }

    /// Whether a report has been received
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Connection parameters for the BLE link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Device address (MAC on Linux, peripheral id elsewhere)
    pub address: String,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// GATT service carrying both characteristics
    pub service_uuid: String,
    /// Characteristic commands are written to
    pub write_char_uuid: String,
    /// Characteristic status notifications arrive on
    pub notify_char_uuid: String,
}

impl ConnectionParams {
    /// Parameters for the fridge at `address` with the stock K25 UUIDs
    #[must_use]
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            address: String::new(),
            timeout_ms: 30_000,
            scan_timeout_ms: 10_000,
            service_uuid: crate::K25_SERVICE_UUID.to_string(),
            write_char_uuid: crate::K25_WRITE_CHAR_UUID.to_string(),
            notify_char_uuid: crate::K25_NOTIFY_CHAR_UUID.to_string(),
        }
    }
}

/// Command dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Interval between keep-alive pings in milliseconds
    pub keepalive_interval_ms: u64,
    /// Which limit byte is the upper setpoint bound
    pub bound_layout: BoundLayout,
}

impl DispatchConfig {
    /// Keep-alive interval as a duration
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 1_000,
            bound_layout: BoundLayout::default(),
        }
    }
}

/// Compressor cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Run one cycle when the bridge starts
    pub on_startup: bool,
    /// Interval between cycles in milliseconds, zero disables periodic cycles
    pub interval_ms: u64,
    /// How long the compressor is forced on, in milliseconds
    pub on_duration_ms: u64,
    /// Input voltage (whole volts) at or above which cycles are skipped
    pub voltage_threshold: u8,
    /// Poll interval while waiting for the first status report, in milliseconds
    pub init_poll_ms: u64,
}

impl CycleConfig {
    /// Periodic trigger interval, `None` when periodic cycling is off
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.interval_ms))
        }
    }

    /// Forced-on duration
    #[must_use]
    pub const fn on_duration(&self) -> Duration {
        Duration::from_millis(self.on_duration_ms)
    }

    /// Initial-state poll interval
    #[must_use]
    pub const fn init_poll(&self) -> Duration {
        Duration::from_millis(self.init_poll_ms)
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            interval_ms: 0,
            on_duration_ms: 8_000,
            voltage_threshold: 14,
            init_poll_ms: 2_000,
        }
    }
}

/// Top level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Command dispatcher settings
    pub dispatch: DispatchConfig,
    /// Compressor cycle settings
    pub cycle: CycleConfig,
    /// Hard limit on how long shutdown waits for in-flight cycles, in milliseconds
    pub shutdown_deadline_ms: u64,
}

impl BridgeConfig {
    /// Shutdown deadline as a duration
    #[must_use]
    pub const fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let cycle = CycleConfig::default();
        Self {
            shutdown_deadline_ms: 20_000 + cycle.on_duration_ms,
            dispatch: DispatchConfig::default(),
            cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_settings() -> Settings {
        Settings {
            locked: true,
            on: true,
            eco_mode: true,
            voltage_cutoff: 0,
            temp_set: 0x42,
            setpoint_limits: [0x44, -4],
            hysteresis: 4,
            soft_start_delay: 0,
            fahrenheit: true,
            temp_compensation: [0, 0, -5],
            shutdown_compensation: 0,
        }
    }

    #[test]
    fn test_temperature_conversion() {
        let c = TemperatureUnit::Fahrenheit.convert(38.0, TemperatureUnit::Celsius);
        assert!((c - 3.333).abs() < 0.01);

        let f = TemperatureUnit::Celsius.convert(-20.0, TemperatureUnit::Fahrenheit);
        assert!((f - -4.0).abs() < f64::EPSILON);

        let same = TemperatureUnit::Celsius.convert(5.5, TemperatureUnit::Celsius);
        assert!((same - 5.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bound_layout() {
        let settings = fixture_settings();

        let bounds = settings.bounds(BoundLayout::HighestFirst);
        assert_eq!(bounds.lowest, -4);
        assert_eq!(bounds.highest, 68);
        assert!(bounds.contains(0x42));
        assert!(!bounds.contains(69));

        let swapped = settings.bounds(BoundLayout::LowestFirst);
        assert_eq!(swapped.lowest, 68);
        assert_eq!(swapped.highest, -4);
    }

    #[test]
    fn test_bounds_clamp() {
        let bounds = TempBounds {
            lowest: -4,
            highest: 68,
        };
        assert!((bounds.clamp(100.0) - 68.0).abs() < f64::EPSILON);
        assert!((bounds.clamp(-40.0) - -4.0).abs() < f64::EPSILON);
        assert!((bounds.clamp(38.0) - 38.0).abs() < f64::EPSILON);

        let inverted = TempBounds {
            lowest: 10,
            highest: 0,
        };
        assert!((inverted.clamp(5.0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_voltage_formatting() {
        let sensors = Sensors {
            temp: 0x41,
            battery: 0x64,
            input_volts: 14,
            input_tenths: 3,
        };
        assert_eq!(sensors.voltage_string(), "14.3v");
        assert!((sensors.input_voltage() - 14.3).abs() < 0.001);
    }

    #[test]
    fn test_report_celsius_views() {
        let report = StatusReport {
            settings: fixture_settings(),
            sensors: Sensors {
                temp: 32,
                ..Sensors::default()
            },
        };
        assert!(report.temperature_celsius().abs() < f64::EPSILON);
        assert!((report.temp_set_celsius() - 18.888).abs() < 0.01);
        assert!(format!("{report}").contains("input=0.0v"));
    }

    #[test]
    fn test_state_is_uninitialized_by_default() {
        let state = FridgeState::default();
        assert!(!state.is_known());
        assert!(state.report().is_none());

        // an all-zero report is still a real report
        let zero = FridgeState::Known(StatusReport {
            settings: Settings::default(),
            sensors: Sensors::default(),
        });
        assert!(zero.is_known());
        assert_ne!(zero, state);
    }

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();

        assert_eq!(config.dispatch.keepalive_interval(), Duration::from_secs(1));
        assert_eq!(config.dispatch.bound_layout, BoundLayout::HighestFirst);
        assert!(config.cycle.on_startup);
        assert_eq!(config.cycle.interval(), None);
        assert_eq!(config.cycle.on_duration(), Duration::from_secs(8));
        assert_eq!(config.cycle.voltage_threshold, 14);
        assert_eq!(config.cycle.init_poll(), Duration::from_secs(2));
        assert_eq!(config.shutdown_deadline(), Duration::from_secs(28));
    }

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::for_address("D8:17:D1:F1:B9:78");
        assert_eq!(params.address, "D8:17:D1:F1:B9:78");
        assert_eq!(params.timeout_ms, 30_000);
        assert_eq!(params.scan_timeout_ms, 10_000);
        assert_eq!(params.write_char_uuid, crate::K25_WRITE_CHAR_UUID);
    }
}
