//! Beacon telemetry counters.

use std::time::Duration;

use eidbeacon_proto::TelemetryBody;

use crate::clock::TickAccumulator;

/// TLM reads between sensor samples.
pub const SENSOR_SAMPLE_PERIOD: u8 = 30;

/// Source of battery and temperature readings.
pub trait Sensors {
    /// Battery voltage in millivolts, 0 when not measured.
    fn battery_millivolts(&self) -> u16;

    /// Die temperature in quarter degrees Celsius.
    fn temperature_quarter_degrees(&self) -> i16;
}

/// Sensors returning constant readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSensors {
    /// Reported battery voltage
    pub battery_mv: u16,
    /// Reported temperature in quarter degrees Celsius
    pub quarter_degrees: i16,
}

impl Default for FixedSensors {
    fn default() -> Self {
        Self { battery_mv: 0, quarter_degrees: 80 }
    }
}

impl Sensors for FixedSensors {
    fn battery_millivolts(&self) -> u16 {
        self.battery_mv
    }

    fn temperature_quarter_degrees(&self) -> i16 {
        self.quarter_degrees
    }
}

/// Advertisement count, uptime and the latest sensor sample.
#[derive(Debug, Clone)]
pub struct Telemetry {
    advertisement_count: u32,
    uptime: TickAccumulator,
    uptime_deciseconds: u32,
    battery_mv: u16,
    temperature: [u8; 2],
    reads_since_sample: u8,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Zeroed counters; the first read samples the sensors.
    pub fn new() -> Self {
        Self {
            advertisement_count: 0,
            uptime: TickAccumulator::deciseconds(),
            uptime_deciseconds: 0,
            battery_mv: 0,
            temperature: [0; 2],
            reads_since_sample: SENSOR_SAMPLE_PERIOD - 1,
        }
    }

    /// Count one advertisement start.
    pub fn record_advertisement(&mut self) {
        self.advertisement_count = self.advertisement_count.wrapping_add(1);
    }

    /// Add elapsed time to the uptime counter.
    pub fn advance(&mut self, elapsed: Duration) {
        let ticks = u32::try_from(self.uptime.accumulate(elapsed)).unwrap_or(u32::MAX);
        self.uptime_deciseconds = self.uptime_deciseconds.wrapping_add(ticks);
    }

    /// Current telemetry, refreshing the sensor sample every
    /// [`SENSOR_SAMPLE_PERIOD`] reads.
    pub fn read<S: Sensors>(&mut self, sensors: &S) -> TelemetryBody {
        self.reads_since_sample += 1;
        if self.reads_since_sample >= SENSOR_SAMPLE_PERIOD {
            self.reads_since_sample = 0;
            self.battery_mv = sensors.battery_millivolts();
            self.temperature =
                TelemetryBody::encode_temperature(sensors.temperature_quarter_degrees());
        }
        self.snapshot()
    }

    /// Current telemetry without sampling.
    pub fn snapshot(&self) -> TelemetryBody {
        TelemetryBody {
            battery_mv: self.battery_mv,
            temperature: self.temperature,
            advertisement_count: self.advertisement_count,
            uptime_deciseconds: self.uptime_deciseconds,
        }
    }

    /// Advertisements started since boot.
    pub fn advertisement_count(&self) -> u32 {
        self.advertisement_count
    }

    /// Uptime in 0.1 s units.
    pub fn uptime_deciseconds(&self) -> u32 {
        self.uptime_deciseconds
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct CountingSensors {
        samples: Cell<u32>,
    }

    impl Sensors for CountingSensors {
        fn battery_millivolts(&self) -> u16 {
            3000
        }

        fn temperature_quarter_degrees(&self) -> i16 {
            self.samples.set(self.samples.get() + 1);
            100
        }
    }

    #[test]
    fn oversized_elapsed_time_saturates_uptime_step() {
        let mut telemetry = Telemetry::new();

        // 5e9 deciseconds does not fit one u32 step.
        telemetry.advance(Duration::from_secs(500_000_000));

        assert_eq!(telemetry.uptime_deciseconds(), u32::MAX);
    }

    #[test]
    fn first_read_samples_then_every_thirty() {
        let sensors = CountingSensors { samples: Cell::new(0) };
        let mut telemetry = Telemetry::new();

        let body = telemetry.read(&sensors);
        assert_eq!(sensors.samples.get(), 1);
        assert_eq!(body.temperature, [25, 0]);
        assert_eq!(body.battery_mv, 3000);

        for _ in 0..29 {
            telemetry.read(&sensors);
        }
        assert_eq!(sensors.samples.get(), 1);

        telemetry.read(&sensors);
        assert_eq!(sensors.samples.get(), 2);
    }

    #[test]
    fn uptime_in_deciseconds() {
        let mut telemetry = Telemetry::new();

        telemetry.advance(Duration::from_millis(1250));
        telemetry.advance(Duration::from_millis(50));

        assert_eq!(telemetry.uptime_deciseconds(), 13);
    }

    #[test]
    fn advertisement_count_wraps() {
        let mut telemetry = Telemetry::new();
        telemetry.advertisement_count = u32::MAX;

        telemetry.record_advertisement();

        assert_eq!(telemetry.advertisement_count(), 0);
    }
}
