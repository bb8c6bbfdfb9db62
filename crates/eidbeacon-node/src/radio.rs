//! Radio seam.
//!
//! The node has no BLE stack of its own; a [`Radio`] receives the
//! advertising commands. [`LoggingRadio`] traces them, which is enough to
//! watch EIDs rotate on a development host.

use std::time::Duration;

use eidbeacon_core::SlotIndex;
use eidbeacon_proto::BroadcastFrame;

/// Advertising hardware.
pub trait Radio {
    /// Broadcast `frame` non-connectably until the next command.
    fn advertise(&mut self, slot: SlotIndex, frame: &BroadcastFrame, interval_ms: u16, tx_power: i8);

    /// Advertise connectably so a peer can configure the beacon.
    fn advertise_connectable(&mut self, interval: Duration);

    /// Stop advertising.
    fn stop(&mut self);

    /// Switch to a new random device address.
    fn set_address(&mut self, address: [u8; 6]);
}

/// Radio that only emits `tracing` events.
#[derive(Debug, Default)]
pub struct LoggingRadio {
    advertisements: u64,
}

impl LoggingRadio {
    /// Create a logging radio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise commands seen so far.
    pub fn advertisements(&self) -> u64 {
        self.advertisements
    }
}

impl Radio for LoggingRadio {
    fn advertise(&mut self, slot: SlotIndex, frame: &BroadcastFrame, interval_ms: u16, tx_power: i8) {
        self.advertisements += 1;
        tracing::info!(%slot, interval_ms, tx_power, frame = ?frame, "advertise");
    }

    fn advertise_connectable(&mut self, interval: Duration) {
        tracing::info!(?interval, "advertise connectable");
    }

    fn stop(&mut self) {
        tracing::debug!("radio stopped");
    }

    fn set_address(&mut self, address: [u8; 6]) {
        tracing::debug!(?address, "new random address");
    }
}
