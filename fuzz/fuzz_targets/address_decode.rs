#![no_main]

use libfuzzer_sys::fuzz_target;
use shield_derive::decode_p2sh;

fuzz_target!(|data: &[u8]| {
    // decode_p2sh returns Ok or Err for any string, never panics.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = decode_p2sh(s);
    }
});
