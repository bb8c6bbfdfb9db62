//! Eddystone wire formats.
//!
//! Byte layouts for everything the beacon puts on the air or exchanges with
//! a configuring peer. Nothing here performs I/O or cryptography: frames are
//! plain data holders, and parsing only checks structure (lengths, type
//! bytes, versions).
//!
//! # Broadcast frames
//!
//! ```text
//! UID   00 | ranging | namespace[10] | instance[6] | rfu[2]        20 bytes
//! URL   10 | ranging | scheme | encoded_url[..=17]                3-20 bytes
//! TLM   20 | 00 | vbatt | temp | adv_cnt | sec_cnt                14 bytes
//! eTLM  20 | 01 | encrypted[12] | salt[2] | tag[2] | rfu           19 bytes
//! EID   30 | ranging | eid[8]                                     10 bytes
//! ```
//!
//! Multi-byte counters are big-endian.
//!
//! # Configuration resources
//!
//! [`config`] holds the peer-facing formats: slot writes, lock commands,
//! broadcast capabilities and the EID read-back. [`power`] holds the
//! supported transmit powers and their calibrated 0 m ranging values.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod adv;
pub mod config;
pub mod errors;
pub mod frame;
pub mod power;
pub mod url;

pub use config::{
    BroadcastCapabilities, Characteristic, EidReadback, LockCommand, LockStateValue, SlotWrite,
};
pub use errors::{ProtocolError, Result};
pub use frame::{
    BroadcastFrame, EidFrame, EtlmFrame, FrameType, TelemetryBody, TlmFrame, UidFrame, UrlFrame,
};
