use veil_compiler::chunk::BytecodeChunk;
use veil_compiler::compile_source;
use veil_vmgen::interp::{Interpreter, RuntimeError, Value};
use veil_vmgen::serialize::{deserialize, serialize};
use veil_vmgen::{OpcodeMapping, Rng};

/// Compile a source string, panicking with the source on failure.
pub fn compile_str(source: &str) -> BytecodeChunk {
    compile_source(source.as_bytes()).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile, serialize with a seeded mapping, read back and execute.
/// Running the deserialized chunk checks the wire format as well.
pub fn run_lua(source: &str) -> Interpreter {
    let chunk = compile_str(source);
    let mapping = OpcodeMapping::build(&mut Rng::seeded(0x5eed));
    let bytes = serialize(&chunk, &mapping).unwrap_or_else(|e| panic!("serialize: {e}"));
    let loaded = deserialize(&bytes, &mapping).unwrap_or_else(|e| panic!("deserialize: {e}"));

    let mut vm = Interpreter::new();
    vm.run(&loaded, &[])
        .unwrap_or_else(|e| panic!("runtime error: {e}\nsource:\n{source}"));
    vm
}

/// Execute a source string and return its results.
pub fn run_results(source: &str) -> Vec<Value> {
    Interpreter::new()
        .run(&compile_str(source), &[])
        .unwrap_or_else(|e| panic!("runtime error: {e}\nsource:\n{source}"))
}

/// Execute a source string, expecting a runtime error.
pub fn run_lua_err(source: &str) -> RuntimeError {
    match Interpreter::new().run(&compile_str(source), &[]) {
        Err(e) => e,
        Ok(vals) => panic!("expected error, got {} results: {vals:?}", vals.len()),
    }
}

/// Execute and compare the printed lines.
pub fn check_output(source: &str, expected: &[&str]) {
    let vm = run_lua(source);
    assert_eq!(vm.output(), expected, "source:\n{source}");
}
