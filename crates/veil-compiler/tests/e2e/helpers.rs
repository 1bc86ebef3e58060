use veil_compiler::chunk::{BytecodeChunk, Constant};
use veil_compiler::compile_source;
use veil_compiler::opcode::{Instruction, OpCode};

/// Compile a source string, panicking with the source on failure.
pub fn compile_str(source: &str) -> BytecodeChunk {
    compile_source(source.as_bytes()).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a source string and expect an error; returns its message.
pub fn compile_str_err(source: &str) -> String {
    match compile_source(source.as_bytes()) {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Check if a chunk contains a specific opcode.
pub fn has_opcode(chunk: &BytecodeChunk, op: OpCode) -> bool {
    chunk.code.iter().any(|i| i.opcode() == op)
}

/// Count occurrences of an opcode in a chunk.
pub fn count_opcode(chunk: &BytecodeChunk, op: OpCode) -> usize {
    chunk.code.iter().filter(|i| i.opcode() == op).count()
}

/// All instructions with a given opcode.
pub fn find_all(chunk: &BytecodeChunk, op: OpCode) -> Vec<Instruction> {
    chunk.code.iter().copied().filter(|i| i.opcode() == op).collect()
}

/// Index of a string constant.
pub fn string_index(chunk: &BytecodeChunk, s: &str) -> Option<usize> {
    chunk.constants.get_index_of(&Constant::Str(s.as_bytes().to_vec()))
}

/// Source of the only closure factory in a chunk.
#[allow(dead_code)]
pub fn only_factory(chunk: &BytecodeChunk) -> String {
    let factories: Vec<&str> = chunk.function_constants().map(|(_, s)| s).collect();
    assert_eq!(factories.len(), 1, "factories: {factories:?}");
    factories[0].to_string()
}
