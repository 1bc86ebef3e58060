/// Bytecode listing (luac -l style output).
use crate::chunk::{BytecodeChunk, Constant};
use crate::opcode::{is_constant, Instruction, InstructionFormat, OpCode, RK_BIAS};
use std::fmt::Write;

/// Disassemble a chunk into a human-readable string.
pub fn disassemble(chunk: &BytecodeChunk) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "main ({} instructions, {} slots, {} constants)",
        chunk.code.len(),
        chunk.max_stack,
        chunk.constants.len(),
    );

    for (pc, inst) in chunk.code.iter().enumerate() {
        let line = chunk.get_line(pc);
        let line_str = if line > 0 {
            format!("[{line}]")
        } else {
            "[-]".to_string()
        };
        let _ = write!(out, "\t{pc}\t{line_str:>5}\t");
        disasm_instruction(&mut out, pc, inst, chunk);
        out.push('\n');
    }

    if !chunk.constants.is_empty() {
        let _ = writeln!(out, "constants ({}):", chunk.constants.len());
        for (i, k) in chunk.constants.iter().enumerate() {
            let _ = writeln!(out, "\t{i}\t{}", k.describe());
        }
    }
    out
}

/// Disassemble one instruction at `pc`, with a comment naming constants and jump targets.
pub fn disasm_instruction(out: &mut String, pc: usize, inst: &Instruction, chunk: &BytecodeChunk) {
    let op = inst.opcode();
    let _ = write!(out, "{:<10}", op.name());

    match op.format() {
        InstructionFormat::IABC => {
            let _ = write!(out, "{} {} {}", inst.a(), inst.b(), inst.c());
            let mut notes = Vec::new();
            if takes_rk_b(op) && is_constant(inst.b()) {
                notes.push(constant_note(chunk, inst.b() - RK_BIAS));
            }
            if takes_rk_c(op) && is_constant(inst.c()) {
                notes.push(constant_note(chunk, inst.c() - RK_BIAS));
            }
            if !notes.is_empty() {
                let _ = write!(out, "\t; {}", notes.join(" "));
            }
        }
        InstructionFormat::IABx => {
            let _ = write!(out, "{} {}", inst.a(), inst.b());
            match chunk.constant(usize::from(inst.b())) {
                Some(Constant::Function(_)) => {
                    let _ = write!(out, "\t; function k{}", inst.b());
                }
                Some(k) => {
                    let _ = write!(out, "\t; {}", k.describe());
                }
                None => {}
            }
        }
        InstructionFormat::IAsBx => {
            let target = pc as i64 + 1 + i64::from(inst.sbx());
            let _ = write!(out, "{} {}\t; to {target}", inst.a(), inst.sbx());
        }
    }
}

fn constant_note(chunk: &BytecodeChunk, idx: u16) -> String {
    chunk
        .constant(usize::from(idx))
        .map_or_else(|| format!("k{idx}?"), Constant::describe)
}

fn takes_rk_b(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        SetTable | Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le
    )
}

fn takes_rk_c(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        GetTable | SetTable | Self_ | Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le
    )
}
