//! Veil compiler: lexer, parser and register bytecode compiler for a Lua subset.

pub mod ast;
pub mod chunk;
pub mod compiler;
pub mod disasm;
pub mod lexer;
pub mod opcode;
pub mod parser;
pub mod render;
pub mod token;

use chunk::BytecodeChunk;
use thiserror::Error;

/// Any failure turning source text into bytecode.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    #[error("syntax error: {0}")]
    Parse(#[from] parser::ParseError),
    #[error("compile error: {0}")]
    Compile(#[from] compiler::CompileError),
}

/// Parse and compile a source chunk.
pub fn compile_source(source: &[u8]) -> Result<BytecodeChunk, Error> {
    let ast = parser::parse(source)?;
    Ok(compiler::compile(&ast)?)
}
