//! Beacon Core
//!
//! Sans-IO state machines for an Eddystone beacon with rotating ephemeral
//! identifiers (EID) and encrypted telemetry (eTLM).
//!
//! # Architecture
//!
//! Three subsystems, each depending only on the ones before it:
//!
//! ```text
//! SecurityEngine ──events──> SlotStore ──frames──> Scheduler
//!  (keys, clocks)            (5 slots)             (timers, radio)
//! ```
//!
//! [`BeaconCore`] composes them with [`Telemetry`] and a [`WorkQueue`]. It
//! receives [`BeaconEvent`]s, processes them through pure state machine logic
//! and returns [`BeaconAction`]s for the driver to execute. Time comes in as
//! elapsed [`Duration`](std::time::Duration)s and randomness through the
//! [`Environment`] trait, so the same code runs under a seeded simulation and
//! in production.
//!
//! # Components
//!
//! - [`SecurityEngine`]: identity keys, temporary keys, EIDs, the lock
//! - [`SlotStore`]: slot configuration, frame encoding, persistence records
//! - [`Scheduler`]: slot cycling, eTLM pairing, connectable windows
//! - [`config_service`]: lock-gated configuration resources
//! - [`persist`]: storage keys and CBOR records

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod beacon;
pub mod clock;
pub mod config_service;
pub mod env;
pub mod error;
pub mod lock;
pub mod persist;
pub mod scheduler;
pub mod security;
pub mod slot;
pub mod slot_store;
pub mod telemetry;
pub mod work;

#[cfg(test)]
mod test_env;

pub use beacon::{BeaconAction, BeaconConfig, BeaconCore, BeaconEvent, LogLevel};
pub use clock::TickAccumulator;
pub use config_service::{Access, ConfigSession, check_access};
pub use env::Environment;
pub use error::BeaconError;
pub use lock::{DEFAULT_LOCK_KEY, LockState};
pub use persist::{StorageKey, StoredContent, StoredSlot};
pub use scheduler::{
    AdvertisingIntervals, Scheduler, SchedulerAction, SchedulerConfig, SchedulerState, Timer,
    compute_intervals,
};
pub use security::{SecurityEngine, SecurityEvent};
pub use slot::{MAX_SLOTS, SlotIndex};
pub use slot_store::{AdvertisingSlot, SlotState, SlotStore, SlotStoreConfig};
pub use telemetry::{FixedSensors, Sensors, Telemetry};
pub use work::{WorkItem, WorkQueue};
