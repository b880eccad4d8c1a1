#![no_main]

use libfuzzer_sys::fuzz_target;
use shield_derive::TweakContext;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(ctx) = serde_json::from_str::<TweakContext>(s) {
            // A parsed context always re-serializes and yields a full message
            let json = serde_json::to_string(&ctx).unwrap();
            assert_eq!(serde_json::from_str::<TweakContext>(&json).unwrap(), ctx);
            let _ = ctx.message();
        }
    }

    // Raw fields: split the input into id and nonce, counter and threshold come from the edge bytes
    if data.len() >= 2 {
        let mid = data.len() / 2;
        let counter = u64::from(data[0]) << 28;
        let threshold = u64::from(data[data.len() - 1]) << 1;
        let _ = TweakContext::from_raw(&data[..mid], counter, threshold, &data[mid..]);
    }
});
