#![no_main]

use libfuzzer_sys::fuzz_target;
use veil_compiler::compile_source;
use veil_vmgen::interp::Interpreter;

fuzz_target!(|data: &[u8]| {
    // Compiling must never panic, and neither may running what compiled.
    let Ok(chunk) = compile_source(data) else {
        return;
    };
    let _ = Interpreter::new().with_step_limit(10_000).run(&chunk, &[]);
});
