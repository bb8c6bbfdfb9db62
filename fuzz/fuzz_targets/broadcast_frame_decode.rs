//! Fuzz target for BroadcastFrame::decode
//!
//! Arbitrary bytes as an advertised frame. Decoding should NEVER panic; a
//! frame that decodes must re-encode to exactly the bytes it came from.

#![no_main]

use eidbeacon_proto::BroadcastFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = BroadcastFrame::decode(data) {
        assert_eq!(frame.encoded_len(), data.len());
        assert_eq!(frame.to_vec(), data);
    }
});
