//! Per-build opcode numbering.
use crate::rng::Rng;
use log::trace;
use veil_compiler::opcode::OpCode;

/// Smallest byte an opcode can be assigned. 0 stays reserved.
pub const FIRST_OPCODE_BYTE: u8 = 1;
/// Largest byte an opcode can be assigned. 251..=255 stay reserved.
pub const LAST_OPCODE_BYTE: u8 = 250;

/// Bijection between canonical opcodes and their shuffled wire bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpcodeMapping {
    /// Wire byte per canonical opcode index.
    forward: [u8; OpCode::COUNT],
    /// Canonical opcode per wire byte.
    reverse: [Option<OpCode>; 256],
}

impl OpcodeMapping {
    /// Shuffle the usable byte range and hand the first 38 values to the opcodes.
    pub fn build(rng: &mut Rng) -> Self {
        let mut bytes: Vec<u8> = (FIRST_OPCODE_BYTE..=LAST_OPCODE_BYTE).collect();
        rng.shuffle(&mut bytes);

        let mut forward = [0u8; OpCode::COUNT];
        let mut reverse = [None; 256];
        for (op, &byte) in OpCode::ALL.iter().zip(&bytes) {
            forward[*op as usize] = byte;
            reverse[usize::from(byte)] = Some(*op);
            trace!("opcode {} -> {byte}", op.name());
        }
        OpcodeMapping { forward, reverse }
    }

    /// Wire byte of a canonical opcode.
    pub fn byte(&self, op: OpCode) -> u8 {
        self.forward[op as usize]
    }

    /// Canonical opcode of a wire byte, if one is assigned to it.
    pub fn opcode(&self, byte: u8) -> Option<OpCode> {
        self.reverse[usize::from(byte)]
    }

    /// `(opcode, byte)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (OpCode, u8)> + '_ {
        OpCode::ALL.iter().map(move |op| (*op, self.byte(*op)))
    }
}
