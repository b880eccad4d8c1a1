#![no_main]

use libfuzzer_sys::fuzz_target;
use shield_derive::script::{push_data_len, witness_program};
use shield_derive::push_data;

fuzz_target!(|data: &[u8]| {
    // Encoded length always matches the advertised prefix + payload length
    let encoded = push_data(data).unwrap();
    assert_eq!(encoded.len(), push_data_len(data.len()));
    assert!(encoded.ends_with(data));

    if let Some((&version, program)) = data.split_first() {
        let _ = witness_program(version, program);
    }
});
