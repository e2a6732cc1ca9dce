//! Random bytes through the frame decoder.
//!
//! Any input must either decode to a frame that re-encodes to the same bytes
//! or be rejected with an error. Never panic.

#![no_main]

use havoc_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut encoded = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut encoded).expect("decoded frame must re-encode");
    assert_eq!(&encoded[..], &data[..encoded.len()]);
});
