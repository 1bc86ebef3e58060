/// Compiled top-level chunk: bytecode, constants, and line info.
use crate::ast::Number;
use crate::opcode::Instruction;
use indexmap::IndexSet;

/// Maximum number of constants (the serialized count is one byte).
pub const MAX_CONSTANTS: usize = 255;

/// A constant value in the constant pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Round-trip text of a number; see [`Number::text`].
    Number(String),
    Str(Vec<u8>),
    /// Source of a closure factory `function(R) ... end`.
    Function(String),
}

impl Constant {
    pub fn number(n: f64) -> Self {
        Number::Float(n).into()
    }

    pub fn integer(i: i64) -> Self {
        Number::Int(i).into()
    }

    /// Short printable form for listings.
    pub fn describe(&self) -> String {
        match self {
            Constant::Number(text) => text.clone(),
            Constant::Str(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
            Constant::Function(src) => format!("<function: {} bytes>", src.len()),
        }
    }
}

impl From<Number> for Constant {
    fn from(n: Number) -> Self {
        Constant::Number(n.text())
    }
}

/// A compiled chunk.
#[derive(Clone, Debug, Default)]
pub struct BytecodeChunk {
    /// Bytecode instructions.
    pub code: Vec<Instruction>,
    /// Source line per instruction.
    pub lines: Vec<u32>,
    /// Constant pool, deduplicated by kind and text.
    pub constants: IndexSet<Constant>,
    /// Registers needed by the chunk.
    pub max_stack: u8,
}

impl BytecodeChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction at the given source line.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.lines.push(line);
        pc
    }

    /// Add a constant to the pool, returning its index. Deduplicates.
    pub fn add_constant(&mut self, k: Constant) -> usize {
        self.constants.insert_full(k).0
    }

    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get_index(index)
    }

    /// Get the line number for a given PC.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn get_mut(&mut self, pc: usize) -> Option<&mut Instruction> {
        self.code.get_mut(pc)
    }

    /// Indexes of the closure factories, in pool order.
    pub fn function_constants(&self) -> impl Iterator<Item = (usize, &str)> {
        self.constants
            .iter()
            .enumerate()
            .filter_map(|(i, k)| match k {
                Constant::Function(src) => Some((i, src.as_str())),
                _ => None,
            })
    }
}
