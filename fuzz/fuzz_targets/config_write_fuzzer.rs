//! Fuzz target for configuration write parsing
//!
//! Every resource a peer can write is parsed from untrusted bytes.
//!
//! # Invariants
//!
//! - No parser panics
//! - An accepted slot write never exceeds the long-write buffer
//! - An accepted interval or power write is exactly its fixed length
//! - A URL that decodes re-encodes within the frame budget

#![no_main]

use arbitrary::Arbitrary;
use eidbeacon_proto::{
    EidReadback, LockCommand, SlotWrite,
    config::{MAX_SLOT_WRITE_LEN, parse_dbm, parse_interval},
    url::{decode_url, encode_url},
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum ConfigWrite {
    SlotData(Vec<u8>),
    LockState(Vec<u8>),
    Interval(Vec<u8>),
    TxPower(Vec<u8>),
    Readback(Vec<u8>),
    Url { scheme: u8, encoded: Vec<u8> },
}

fuzz_target!(|write: ConfigWrite| {
    match write {
        ConfigWrite::SlotData(bytes) => {
            if SlotWrite::parse(&bytes).is_ok() {
                assert!(bytes.len() <= MAX_SLOT_WRITE_LEN);
            }
        }
        ConfigWrite::LockState(bytes) => {
            let _ = LockCommand::parse(&bytes).resulting_state();
        }
        ConfigWrite::Interval(bytes) => {
            if parse_interval(&bytes).is_ok() {
                assert_eq!(bytes.len(), 2);
            }
        }
        ConfigWrite::TxPower(bytes) => {
            if parse_dbm(&bytes).is_ok() {
                assert_eq!(bytes.len(), 1);
            }
        }
        ConfigWrite::Readback(bytes) => {
            let _ = EidReadback::parse(&bytes);
        }
        ConfigWrite::Url { scheme, encoded } => {
            if let Ok(url) = decode_url(scheme, &encoded) {
                let _ = encode_url(&url);
            }
        }
    }
});
