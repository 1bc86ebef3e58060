/// Single-frame compiler: syntax tree → register bytecode.
///
/// Only the top-level chunk becomes bytecode. Function literals are rendered
/// back to source (see [`crate::render`]) and instantiated with CLOSURE.
pub mod capture;
pub mod expr;
pub mod scope;
pub mod stat;

use crate::ast::Chunk;
use crate::chunk::{BytecodeChunk, Constant, MAX_CONSTANTS};
use crate::opcode::{Instruction, OpCode, MAX_SBX};
use log::debug;
use capture::Captures;
use scope::{ScopeError, ScopeManager};
use thiserror::Error;

/// Compiler error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{line}: {message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

/// The compiler: the chunk being built plus the register/scope state.
pub struct Compiler {
    chunk: BytecodeChunk,
    scope: ScopeManager,
    captures: Captures,
    /// Named locals declared so far; numbers them the way [`Captures`] does.
    declared: usize,
    last_line: u32,
}

impl Compiler {
    fn new(captures: Captures) -> Self {
        Compiler {
            chunk: BytecodeChunk::new(),
            scope: ScopeManager::new(),
            captures,
            declared: 0,
            last_line: 1,
        }
    }

    fn error_at(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError {
            message: msg.into(),
            line,
        }
    }

    fn scoped<T>(&self, result: Result<T, ScopeError>, line: u32) -> Result<T, CompileError> {
        result.map_err(|e| self.error_at(line, e.to_string()))
    }

    // ---- Register helpers ----

    fn alloc_reg(&mut self, line: u32) -> Result<u8, CompileError> {
        let result = self.scope.alloc_reg();
        self.scoped(result, line)
    }

    fn reserve_to(&mut self, top: usize, line: u32) -> Result<(), CompileError> {
        let result = self.scope.reserve_to(top);
        self.scoped(result, line)
    }

    fn add_local(&mut self, name: &str, line: u32) -> Result<u8, CompileError> {
        let result = self.scope.add_local(name);
        self.scoped(result, line)
    }

    /// Bring a local named in the source into scope. A captured local is
    /// boxed into a fresh cell right away, so each declaration (and each
    /// loop iteration) gets its own.
    fn declare_local(&mut self, name: &str, line: u32) -> Result<u8, CompileError> {
        let decl = self.declared;
        self.declared += 1;
        if !self.captures.contains(decl) {
            return self.add_local(name, line);
        }
        let result = self.scope.add_captured_local(name);
        let reg = self.scoped(result, line)?;
        self.emit_abc(OpCode::Close, reg, 0, 0, line);
        Ok(reg)
    }

    // ---- Code generation helpers ----

    fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        self.chunk.emit(inst, line)
    }

    fn emit_abc(&mut self, op: OpCode, a: u8, b: u16, c: u16, line: u32) -> usize {
        self.emit(Instruction::abc(op, a, b, c), line)
    }

    fn emit_abx(&mut self, op: OpCode, a: u8, bx: u16, line: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx), line)
    }

    fn emit_asbx(&mut self, op: OpCode, a: u8, sbx: i32, line: u32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx), line)
    }

    fn current_pc(&self) -> usize {
        self.chunk.code_len()
    }

    fn emit_jump(&mut self, line: u32) -> usize {
        self.emit_asbx(OpCode::Jmp, 0, 0, line) // placeholder, to be patched
    }

    fn patch_jump(&mut self, jump_pc: usize) {
        let target = self.current_pc();
        self.patch_jump_to(jump_pc, target);
    }

    fn patch_jump_to(&mut self, jump_pc: usize, target: usize) {
        let offset = target as i32 - jump_pc as i32 - 1;
        if let Some(inst) = self.chunk.get_mut(jump_pc) {
            inst.set_sbx(offset);
        }
    }

    /// Add a constant to the pool, returning its index.
    fn add_constant(&mut self, k: Constant, line: u32) -> Result<u16, CompileError> {
        if !self.chunk.constants.contains(&k) && self.chunk.constants.len() >= MAX_CONSTANTS {
            return Err(self.error_at(line, "too many constants"));
        }
        Ok(self.chunk.add_constant(k) as u16)
    }

    fn string_constant(&mut self, s: &str, line: u32) -> Result<u16, CompileError> {
        self.add_constant(Constant::Str(s.as_bytes().to_vec()), line)
    }
}

/// Compile a parsed chunk.
pub fn compile(chunk: &Chunk) -> Result<BytecodeChunk, CompileError> {
    let mut compiler = Compiler::new(Captures::analyze(&chunk.block));

    compiler.scope.enter_block(false);
    compiler.block(&chunk.block)?;
    compiler.scope.leave_block();

    let line = compiler.last_line;
    compiler.emit_abc(OpCode::Return, 0, 1, 0, line);

    // Every jump offset is bounded by the code length.
    if compiler.chunk.code_len() > MAX_SBX as usize {
        return Err(compiler.error_at(line, "chunk has too many instructions"));
    }

    compiler.chunk.max_stack = compiler.scope.max_reg;
    debug!(
        "compiled chunk: {} instructions, {} constants, {} registers, {} captured locals",
        compiler.chunk.code.len(),
        compiler.chunk.constants.len(),
        compiler.chunk.max_stack,
        compiler.captures.count()
    );
    Ok(compiler.chunk)
}
