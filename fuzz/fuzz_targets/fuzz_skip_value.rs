#![no_main]

use libfuzzer_sys::fuzz_target;

use pof_core::decode::PofDecoder;

fuzz_target!(|data: &[u8]| {
    let mut dec = PofDecoder::new(data);
    let _ = dec.skip_value();
});
