//! Binary layout of a compiled chunk.
//!
//! ```text
//! u8   version
//! u8   constant count
//! per constant:    u16 LE length, payload
//! per instruction: u8 shuffled opcode, u8 A, u16 LE B, u16 LE C
//! ```
//!
//! The instruction stream runs to the end of the buffer.
use crate::shuffle::OpcodeMapping;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Error as IoError, ErrorKind, Read, Write};
use thiserror::Error;
use veil_compiler::chunk::{BytecodeChunk, Constant, MAX_CONSTANTS};
use veil_compiler::opcode::Instruction;

pub const FORMAT_VERSION: u8 = 0x01;
/// Bytes per serialized instruction.
pub const INSTRUCTION_WIDTH: usize = 6;

/// Marks a string payload that must not go through `tonumber`.
pub const TAG_STRING: u8 = 0x00;
/// Marks a closure factory reference.
pub const TAG_FUNCTION: u8 = 0x01;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("too many constants: {0}")]
    TooManyConstants(usize),

    #[error("constant {index} is too long ({len} bytes)")]
    ConstantTooLong { index: usize, len: usize },

    #[error("unknown opcode byte {byte} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },

    #[error("unsupported bytecode version: {0}")]
    BadVersion(u8),

    #[error("truncated bytecode")]
    Truncated,
}

/// Whether a Lua runtime's `tonumber` might accept this text. Errs on the
/// side of yes: a needless tag costs one byte.
pub fn looks_numeric(bytes: &[u8]) -> bool {
    let is_space = |b: &u8| matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c);
    let start = bytes.iter().position(|b| !is_space(b));
    let end = bytes.iter().rposition(|b| !is_space(b));
    let trimmed = match (start, end) {
        (Some(s), Some(e)) => &bytes[s..=e],
        _ => return false,
    };
    let unsigned = match trimmed.first() {
        Some(b'+' | b'-') => &trimmed[1..],
        _ => trimmed,
    };
    // strtod also takes `inf`, `infinity`, `nan` and `nan(chars)` in any case.
    let special = |word: &[u8]| unsigned.get(..3).is_some_and(|p| p.eq_ignore_ascii_case(word));
    if special(b"inf") || special(b"nan") {
        return true;
    }
    match unsigned.first() {
        Some(b) if b.is_ascii_digit() || *b == b'.' => true,
        Some(_) => std::str::from_utf8(trimmed).is_ok_and(|s| s.parse::<f64>().is_ok()),
        None => false,
    }
}

/// Payload bytes of one constant. `factory_slot` is the 1-based side-table
/// index of a closure factory.
fn constant_payload(k: &Constant, factory_slot: usize) -> Vec<u8> {
    match k {
        Constant::Number(text) => text.as_bytes().to_vec(),
        Constant::Str(bytes) => {
            let needs_tag = looks_numeric(bytes)
                || matches!(bytes.first(), Some(&TAG_STRING | &TAG_FUNCTION));
            let mut out = Vec::with_capacity(bytes.len() + 1);
            if needs_tag {
                out.push(TAG_STRING);
            }
            out.extend_from_slice(bytes);
            out
        }
        Constant::Function(_) => {
            let mut out = vec![TAG_FUNCTION];
            out.extend_from_slice(factory_slot.to_string().as_bytes());
            out
        }
    }
}

/// Serialize a chunk with the build's opcode numbering.
pub fn serialize(chunk: &BytecodeChunk, mapping: &OpcodeMapping) -> Result<Vec<u8>, SerializeError> {
    let count = chunk.constants.len();
    if count > MAX_CONSTANTS {
        return Err(SerializeError::TooManyConstants(count));
    }

    let mut out = Vec::with_capacity(2 + chunk.code.len() * INSTRUCTION_WIDTH);
    out.write_u8(FORMAT_VERSION)?;
    out.write_u8(count as u8)?;

    let mut factory_slot = 0;
    for (index, k) in chunk.constants.iter().enumerate() {
        if matches!(k, Constant::Function(_)) {
            factory_slot += 1;
        }
        let payload = constant_payload(k, factory_slot);
        let len = u16::try_from(payload.len())
            .map_err(|_| SerializeError::ConstantTooLong { index, len: payload.len() })?;
        out.write_u16::<LittleEndian>(len)?;
        out.write_all(&payload)?;
    }

    for inst in &chunk.code {
        out.write_u8(mapping.byte(inst.opcode()))?;
        out.write_u8(inst.a())?;
        out.write_u16::<LittleEndian>(inst.b())?;
        out.write_u16::<LittleEndian>(inst.c())?;
    }
    Ok(out)
}

fn truncated(e: IoError) -> SerializeError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SerializeError::Truncated
    } else {
        SerializeError::Io(e)
    }
}

/// Read a serialized chunk back. Closure factories come back as
/// `Constant::Function` holding their side-table slot; line info is not
/// serialized and reads back as zero.
pub fn deserialize(bytes: &[u8], mapping: &OpcodeMapping) -> Result<BytecodeChunk, SerializeError> {
    let mut reader = Cursor::new(bytes);

    let version = reader.read_u8().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(SerializeError::BadVersion(version));
    }

    let mut chunk = BytecodeChunk::new();
    let count = reader.read_u8().map_err(truncated)?;
    for _ in 0..count {
        let len = reader.read_u16::<LittleEndian>().map_err(truncated)?;
        let mut payload = vec![0u8; usize::from(len)];
        reader.read_exact(&mut payload).map_err(truncated)?;
        let k = match payload.first() {
            Some(&TAG_STRING) => Constant::Str(payload[1..].to_vec()),
            Some(&TAG_FUNCTION) => {
                Constant::Function(String::from_utf8_lossy(&payload[1..]).into_owned())
            }
            _ if looks_numeric(&payload) => {
                Constant::Number(String::from_utf8_lossy(&payload).into_owned())
            }
            _ => Constant::Str(payload),
        };
        chunk.add_constant(k);
    }

    while bytes.len() - reader.position() as usize >= INSTRUCTION_WIDTH {
        let offset = reader.position() as usize;
        let byte = reader.read_u8()?;
        let op = mapping
            .opcode(byte)
            .ok_or(SerializeError::UnknownOpcode { byte, offset })?;
        let a = reader.read_u8()?;
        let b = reader.read_u16::<LittleEndian>()?;
        let c = reader.read_u16::<LittleEndian>()?;
        chunk.emit(Instruction::abc(op, a, b, c), 0);
    }
    Ok(chunk)
}
