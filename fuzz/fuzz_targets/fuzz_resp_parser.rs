//! RESP frame parsing must never panic, and a parsed frame survives an
//! encode and reparse.

#![no_main]

use fm_protocol::resp::{frame_to_argv, split_lines};
use fm_protocol::parse_frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = split_lines(data);
    if let Ok(parsed) = parse_frame(data) {
        assert!(parsed.consumed <= data.len());
        let encoded = parsed.frame.to_bytes();
        let reparsed = parse_frame(&encoded).expect("encoded frame parses");
        assert_eq!(reparsed.frame, parsed.frame);
        assert_eq!(reparsed.consumed, encoded.len());
        let _ = frame_to_argv(&parsed.frame);
    }
});
