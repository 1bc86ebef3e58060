//! Register allocation and lexical scoping for one chunk.
//!
//! Locals live in the low registers in declaration order; temporaries are
//! stacked above them and released by resetting `free_reg`.
use thiserror::Error;

/// Maximum number of simultaneously active locals.
pub const MAX_LOCALS: usize = 200;
/// Registers available to the chunk.
pub const MAX_REGISTERS: usize = 250;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("too many local variables")]
    TooManyLocals,
    #[error("function or expression needs too many registers")]
    RegisterOverflow,
}

#[derive(Clone, Debug)]
pub struct Local {
    pub name: String,
    pub reg: u8,
    /// Closures refer to it, so its register holds a cell, not the value.
    pub captured: bool,
}

/// State saved when a block opens and restored when it closes.
#[derive(Clone, Debug, Default)]
pub struct Block {
    locals_mark: usize,
    reg_mark: u8,
    pub is_loop: bool,
    /// Pending `break` jumps, patched to the loop exit.
    pub breaks: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ScopeManager {
    pub locals: Vec<Local>,
    blocks: Vec<Block>,
    pub free_reg: u8,
    /// Highest register count seen; becomes the chunk's stack size.
    pub max_reg: u8,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        let mark = Block {
            locals_mark: self.locals.len(),
            reg_mark: self.free_reg,
            is_loop,
            breaks: Vec::new(),
        };
        self.blocks.push(mark);
    }

    /// Close the innermost block, dropping the locals and registers it
    /// introduced. The block is handed back so its breaks can be patched.
    pub fn leave_block(&mut self) -> Option<Block> {
        let block = self.blocks.pop()?;
        self.locals.truncate(block.locals_mark);
        self.free_reg = block.reg_mark;
        Some(block)
    }

    /// Bind `name` to the next free register.
    pub fn add_local(&mut self, name: impl Into<String>) -> Result<u8, ScopeError> {
        self.push_local(name.into(), false)
    }

    /// Like [`ScopeManager::add_local`], for a local some closure captures.
    pub fn add_captured_local(&mut self, name: impl Into<String>) -> Result<u8, ScopeError> {
        self.push_local(name.into(), true)
    }

    fn push_local(&mut self, name: String, captured: bool) -> Result<u8, ScopeError> {
        if self.locals.len() == MAX_LOCALS {
            return Err(ScopeError::TooManyLocals);
        }
        let reg = self.alloc_reg()?;
        self.locals.push(Local {
            name,
            reg,
            captured,
        });
        Ok(reg)
    }

    pub fn alloc_reg(&mut self) -> Result<u8, ScopeError> {
        self.alloc_regs(1)
    }

    /// Reserve `count` adjacent registers and return the lowest.
    pub fn alloc_regs(&mut self, count: usize) -> Result<u8, ScopeError> {
        let base = self.free_reg;
        let top = usize::from(base) + count;
        let top = u8::try_from(top)
            .ok()
            .filter(|&t| usize::from(t) <= MAX_REGISTERS)
            .ok_or(ScopeError::RegisterOverflow)?;
        self.free_reg = top;
        self.max_reg = self.max_reg.max(top);
        Ok(base)
    }

    /// Grow the register stack so everything below `top` is reserved.
    pub fn reserve_to(&mut self, top: usize) -> Result<(), ScopeError> {
        match top.checked_sub(usize::from(self.free_reg)) {
            Some(extra) if extra > 0 => self.alloc_regs(extra).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Release temporaries at or above `level`. Never grows the stack.
    pub fn free_reg_to(&mut self, level: u8) {
        self.free_reg = self.free_reg.min(level);
    }

    /// Innermost local called `name`.
    pub fn resolve_local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rfind(|local| local.name == name)
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    pub fn find_loop_block(&mut self) -> Option<&mut Block> {
        self.blocks.iter_mut().rev().find(|block| block.is_loop)
    }
}
