//! EID beacon node.
//!
//! Production glue around [`eidbeacon_core`]'s action-based state machines:
//! durable storage, the OS clock and entropy source, host sensors, and a
//! tokio loop that turns timer and radio actions into real effects.
//!
//! # Components
//!
//! - [`BeaconDriver`]: executes storage and log actions, restores state at
//!   boot
//! - [`Node`]: tokio event loop owning the driver, timers and a [`Radio`]
//! - [`Storage`]: key-value persistence with memory, redb and chaotic
//!   backends
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod radio;
mod runtime;
mod sensors;
pub mod storage;
mod system_env;

pub use driver::{BeaconDriver, DEFAULT_TICK, NodeConfig};
pub use error::NodeError;
pub use radio::{LoggingRadio, Radio};
pub use runtime::{Node, NodeCommand, PeerReply, TimerWheel};
pub use sensors::{BATTERY_VOLTAGE, HostSensors, THERMAL_ZONE};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
