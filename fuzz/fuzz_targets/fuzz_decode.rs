#![no_main]

use libfuzzer_sys::fuzz_target;

use pof_core::codec::{decode, encode};
use pof_core::SimplePofContext;

fuzz_target!(|data: &[u8]| {
    let mut ctx = SimplePofContext::new();
    let _ = ctx.register_record_type(0);
    let _ = ctx.register_evolvable_type(1);
    ctx.set_reference_enabled(true);

    // anything that decodes must re-encode without panicking
    if let Ok(value) = decode(&ctx, data) {
        let _ = encode(&ctx, &value);
    }
});
