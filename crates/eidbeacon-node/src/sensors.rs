//! Telemetry sensors read from the host.
//!
//! Linux exposes die temperature in millidegrees and battery voltage in
//! microvolts as single-number text files under `/sys/class`. Missing or
//! unparsable files fall back to fixed readings.

use std::{
    fs,
    path::{Path, PathBuf},
};

use eidbeacon_core::{FixedSensors, Sensors};

/// Default thermal zone.
pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Default battery voltage file.
pub const BATTERY_VOLTAGE: &str = "/sys/class/power_supply/BAT0/voltage_now";

/// Sensors backed by sysfs files.
#[derive(Debug, Clone)]
pub struct HostSensors {
    thermal: PathBuf,
    battery: PathBuf,
    fallback: FixedSensors,
}

impl HostSensors {
    /// Read from explicit files.
    pub fn new(thermal: impl Into<PathBuf>, battery: impl Into<PathBuf>) -> Self {
        Self { thermal: thermal.into(), battery: battery.into(), fallback: FixedSensors::default() }
    }

    /// Readings used when a file cannot be read.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FixedSensors) -> Self {
        self.fallback = fallback;
        self
    }
}

impl Default for HostSensors {
    fn default() -> Self {
        Self::new(THERMAL_ZONE, BATTERY_VOLTAGE)
    }
}

impl Sensors for HostSensors {
    fn battery_millivolts(&self) -> u16 {
        read_number(&self.battery)
            .and_then(|microvolts| u16::try_from(microvolts / 1000).ok())
            .unwrap_or_else(|| self.fallback.battery_millivolts())
    }

    fn temperature_quarter_degrees(&self) -> i16 {
        read_number(&self.thermal)
            .and_then(|millidegrees| i16::try_from(millidegrees / 250).ok())
            .unwrap_or_else(|| self.fallback.temperature_quarter_degrees())
    }
}

fn read_number(path: &Path) -> Option<i64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_sysfs_units() {
        let dir = tempdir().expect("tempdir");
        let thermal = dir.path().join("temp");
        let battery = dir.path().join("voltage_now");
        fs::write(&thermal, "42500\n").expect("write");
        fs::write(&battery, "3012000\n").expect("write");

        let sensors = HostSensors::new(&thermal, &battery);

        assert_eq!(sensors.temperature_quarter_degrees(), 170);
        assert_eq!(sensors.battery_millivolts(), 3012);
    }

    #[test]
    fn missing_files_use_fallback() {
        let dir = tempdir().expect("tempdir");
        let fallback = FixedSensors { battery_mv: 2900, quarter_degrees: -8 };

        let sensors =
            HostSensors::new(dir.path().join("none"), dir.path().join("none")).with_fallback(fallback);

        assert_eq!(sensors.battery_millivolts(), 2900);
        assert_eq!(sensors.temperature_quarter_degrees(), -8);
    }

    #[test]
    fn garbage_uses_fallback() {
        let dir = tempdir().expect("tempdir");
        let thermal = dir.path().join("temp");
        fs::write(&thermal, "hot").expect("write");

        let sensors = HostSensors::new(&thermal, dir.path().join("none"));

        assert_eq!(sensors.temperature_quarter_degrees(), FixedSensors::default().quarter_degrees);
    }
}
