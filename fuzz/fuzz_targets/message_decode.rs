//! Arbitrary plaintext through the message parser and variable splitter.

#![no_main]

use havoc_proto::ChaosMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = ChaosMessage::from_json(data) {
        let _ = message.variable();
        let json = message.to_json().expect("parsed message must serialize");
        assert_eq!(ChaosMessage::from_json(&json).expect("round trip").token, message.token);
    }
});
