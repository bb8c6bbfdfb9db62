//! Fuzz target for whole-beacon operation sequences
//!
//! Drives a simulated beacon with arbitrary peer, clock and power-cycle
//! operations while a model phone registers EID slots.
//!
//! # Invariants
//!
//! - The standard invariant registry holds after every operation
//! - Every slot the phone registered broadcasts the EID the phone predicts

#![no_main]

use arbitrary::Arbitrary;
use eidbeacon_core::{DEFAULT_LOCK_KEY, SlotIndex, SlotState};
use eidbeacon_harness::{InvariantRegistry, ModelPhone, Operation, SimBeacon};
use eidbeacon_proto::FrameType;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    operations: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let registry = InvariantRegistry::standard();
    let mut beacon = SimBeacon::new(scenario.seed);
    let mut phone = ModelPhone::new(beacon.env());
    beacon.start();

    for (step, op) in scenario.operations.iter().take(64).enumerate() {
        let outcome = op.apply(&mut beacon, &mut phone, &DEFAULT_LOCK_KEY);
        let context = format!("step {step} {op:?} -> {outcome:?}");
        registry.assert_all(&beacon.snapshot(), &context);

        let core = beacon.core();
        for slot in SlotIndex::all() {
            if phone.registration(slot).is_none()
                || core.slot_store().slot(slot).state() != SlotState::Configured(FrameType::Eid)
            {
                continue;
            }
            let Some(clock) = core.security().clock_seconds(slot) else { continue };
            assert_eq!(core.security().eid(slot), phone.predict_eid(slot, clock), "{context}");
        }
    }
});
