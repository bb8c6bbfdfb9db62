//! Observable beacon state for invariant checking.

use std::time::Duration;

use eidbeacon_core::{SchedulerState, SlotIndex, SlotState, Timer};
use eidbeacon_proto::LockStateValue;

/// Snapshot of one beacon at a point in virtual time.
#[derive(Debug, Clone)]
pub struct BeaconSnapshot {
    /// Virtual time of the snapshot.
    pub at: Duration,
    /// Every slot, in index order.
    pub slots: Vec<SlotSnapshot>,
    /// Lock state.
    pub lock_state: LockStateValue,
    /// Scheduler state.
    pub scheduler_state: SchedulerState,
    /// Timers the scheduler believes are armed.
    pub armed_timers: Vec<Timer>,
    /// Timers pending in the simulated timer wheel.
    pub wheel_timers: Vec<Timer>,
    /// Telemetry advertisement counter.
    pub advertisement_count: u32,
}

/// Snapshot of one slot.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    /// Slot index.
    pub index: SlotIndex,
    /// Configuration state.
    pub state: SlotState,
    /// Advertising interval.
    pub interval_ms: u16,
    /// Transmit power.
    pub tx_power: i8,
    /// Security engine holds key material.
    pub occupied: bool,
    /// Current EID, if occupied.
    pub eid: Option<[u8; 8]>,
    /// Time counter, if occupied.
    pub clock_seconds: Option<u32>,
}
