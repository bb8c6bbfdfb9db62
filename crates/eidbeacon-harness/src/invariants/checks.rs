//! Standard beacon invariants.

use eidbeacon_core::{
    SchedulerState, SlotState,
    slot_store::{MAX_INTERVAL_MS, MIN_INTERVAL_MS},
};
use eidbeacon_proto::{FrameType, power};

use super::{BeaconSnapshot, Invariant, InvariantResult, Violation};

/// Every slot interval lies within the supported range.
pub struct IntervalBounds;

impl Invariant for IntervalBounds {
    fn name(&self) -> &'static str {
        "interval_bounds"
    }

    fn check(&self, state: &BeaconSnapshot) -> InvariantResult {
        for slot in &state.slots {
            if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&slot.interval_ms) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("slot {}: interval {} ms", slot.index, slot.interval_ms),
                });
            }
        }
        Ok(())
    }
}

/// Every slot transmits at a supported power.
pub struct SupportedTxPower;

impl Invariant for SupportedTxPower {
    fn name(&self) -> &'static str {
        "supported_tx_power"
    }

    fn check(&self, state: &BeaconSnapshot) -> InvariantResult {
        match state.slots.iter().find(|slot| !power::is_supported(slot.tx_power)) {
            Some(slot) => Err(Violation {
                invariant: self.name(),
                message: format!("slot {}: {} dBm", slot.index, slot.tx_power),
            }),
            None => Ok(()),
        }
    }
}

/// A slot broadcasting EIDs has key material and a current EID.
pub struct EidKeyMaterial;

impl Invariant for EidKeyMaterial {
    fn name(&self) -> &'static str {
        "eid_key_material"
    }

    fn check(&self, state: &BeaconSnapshot) -> InvariantResult {
        for slot in &state.slots {
            let is_eid = slot.state == SlotState::Configured(FrameType::Eid);
            if is_eid && (!slot.occupied || slot.eid.is_none() || slot.clock_seconds.is_none()) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("slot {} broadcasts EIDs without key material", slot.index),
                });
            }
        }
        Ok(())
    }
}

/// Nothing is scheduled before the beacon starts.
pub struct IdleIsSilent;

impl Invariant for IdleIsSilent {
    fn name(&self) -> &'static str {
        "idle_is_silent"
    }

    fn check(&self, state: &BeaconSnapshot) -> InvariantResult {
        if state.scheduler_state == SchedulerState::Idle && !state.armed_timers.is_empty() {
            return Err(Violation {
                invariant: self.name(),
                message: format!("idle with timers {:?}", state.armed_timers),
            });
        }
        Ok(())
    }
}

/// The scheduler's view of armed timers matches the timers actually pending.
///
/// A mismatch means a stale expiry could reach the scheduler or a pass could
/// stall.
pub struct TimerWheelAgrees;

impl Invariant for TimerWheelAgrees {
    fn name(&self) -> &'static str {
        "timer_wheel_agrees"
    }

    fn check(&self, state: &BeaconSnapshot) -> InvariantResult {
        let (armed, wheel) = (&state.armed_timers, &state.wheel_timers);
        let agrees = armed.len() == wheel.len() && armed.iter().all(|timer| wheel.contains(timer));
        if !agrees {
            return Err(Violation {
                invariant: self.name(),
                message: format!("scheduler {armed:?}, wheel {wheel:?}"),
            });
        }
        Ok(())
    }
}
