//! Deterministic simulation harness for the EID beacon.
//!
//! Runs [`eidbeacon_core::BeaconCore`] against virtual time and seeded
//! randomness, so multi-day scenarios (EID rotations, temporary-key rollover,
//! daily clock persistence) execute in milliseconds and reproduce exactly.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and ChaCha20 RNG behind the `Environment` trait
//! - [`SimBeacon`]: timer wheel, recording radio and in-memory storage
//! - [`ModelPhone`]: independent peer that registers slots and predicts EIDs
//! - [`Operation`]: arbitrary peer, button and power operations
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every
//! event. Use [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_beacon;
pub mod sim_env;

pub use invariants::{
    BeaconSnapshot, EidKeyMaterial, IdleIsSilent, IntervalBounds, Invariant, InvariantRegistry,
    InvariantResult, SlotSnapshot, SupportedTxPower, TimerWheelAgrees, Violation,
};
pub use model::{ModelPhone, Operation, OperationOutcome, Registration, SlotContent};
pub use sim_beacon::{RadioCommand, RadioRecord, SimBeacon, SimStorage};
pub use sim_env::SimEnv;
