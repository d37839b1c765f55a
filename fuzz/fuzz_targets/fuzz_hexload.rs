//! Capture files are hand-edited; loading arbitrary text must fail cleanly,
//! and anything that loads must survive a dump and reload.

#![no_main]

use fm_protocol::{hexdump, hexload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    if let Ok(bytes) = hexload(&text) {
        let dumped = hexdump(&bytes);
        assert_eq!(hexload(&dumped).ok(), Some(bytes));
    }
    assert_eq!(hexload(&hexdump(data)).ok().as_deref(), Some(data));
});
