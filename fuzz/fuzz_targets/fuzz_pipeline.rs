#![no_main]

use libfuzzer_sys::fuzz_target;
use veil::Options;
use veil_vmgen::serialize::{deserialize, serialize};

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);
    let Ok(out) = veil::obfuscate(&source, &Options::default().with_seed(0)) else {
        return;
    };
    // The embedded chunk must read back exactly.
    let bytes = serialize(&out.chunk, &out.mapping).expect("chunk serialized once already");
    let back = deserialize(&bytes, &out.mapping).expect("serialized chunk reads back");
    assert_eq!(back.code, out.chunk.code);
    assert_eq!(back.constants.len(), out.chunk.constants.len());
});
