//! Bytecode disassembler.
//!
//! Produces listings of the form
//!
//! ```text
//! == main ==
//! 0000    1 iconst_2
//! 0001    | istore_0
//! 0002    2 jmp                2 -> 12
//! ```
//!
//! with the byte offset, the source line (`|` when unchanged, `.` for
//! synthesized code), the mnemonic, and a decoded operand.

use crate::chunk::Chunk;
use crate::opcode::{OpCode, Shape};
use std::fmt::Write;

/// Disassembles a whole chunk.
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", chunk.name);
    let mut offset = 0;
    let mut prev_line = None;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, &mut prev_line, &mut out);
    }
    out
}

/// Disassembles one instruction, returning the next offset.
pub fn disassemble_instruction(
    chunk: &Chunk,
    offset: usize,
    prev_line: &mut Option<u32>,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{offset:04} ");

    let line = chunk.lines[offset];
    if line == Chunk::NO_LINE {
        let _ = write!(out, "   . ");
    } else if *prev_line == Some(line) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{line:4} ");
        *prev_line = Some(line);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        let _ = writeln!(out, "invalid 0x{:02x}", chunk.code[offset]);
        return offset + 1;
    };

    let shape = op.shape();
    let operand_at = offset + 1;
    if operand_at + shape.operand_len() > chunk.len() {
        let _ = writeln!(out, "{} <truncated>", op.mnemonic());
        return chunk.len();
    }

    match shape {
        Shape::Simple => {
            let _ = writeln!(out, "{}", op.mnemonic());
        }
        Shape::U8 => {
            let _ = writeln!(out, "{:<16} {:4}", op.mnemonic(), chunk.code[operand_at]);
        }
        Shape::U16 => {
            let _ = writeln!(out, "{:<16} {:4}", op.mnemonic(), chunk.read_u16(operand_at));
        }
        Shape::U32 => {
            let _ = writeln!(out, "{:<16} {:4}", op.mnemonic(), chunk.read_u32(operand_at));
        }
        Shape::U64 => {
            let _ = writeln!(out, "{:<16} {:4}", op.mnemonic(), chunk.read_u64(operand_at));
        }
        Shape::F32 => {
            let value = f32::from_bits(chunk.read_u32(operand_at));
            let _ = writeln!(out, "{:<16} {value}", op.mnemonic());
        }
        Shape::F64 => {
            let value = f64::from_bits(chunk.read_u64(operand_at));
            let _ = writeln!(out, "{:<16} {value}", op.mnemonic());
        }
        Shape::BranchShort => {
            let jump = chunk.code[operand_at] as usize;
            let target = operand_at + 1 + jump;
            let _ = writeln!(out, "{:<16} {offset} -> {target}", op.mnemonic());
        }
        Shape::LoopShort => {
            let jump = chunk.code[operand_at] as usize;
            let target = (operand_at + 1).wrapping_sub(jump);
            let _ = writeln!(out, "{:<16} {offset} -> {target}", op.mnemonic());
        }
        Shape::Branch => {
            let jump = chunk.read_u32(operand_at) as usize;
            let target = operand_at + 4 + jump;
            let _ = writeln!(out, "{:<16} {offset} -> {target}", op.mnemonic());
        }
        Shape::LoopLong => {
            let jump = chunk.read_u32(operand_at) as usize;
            let target = (operand_at + 4).wrapping_sub(jump);
            let _ = writeln!(out, "{:<16} {offset} -> {target}", op.mnemonic());
        }
        Shape::Str => {
            let index = chunk.read_u32(operand_at);
            let _ = writeln!(out, "{:<16} {index:4}", op.mnemonic());
        }
    }

    offset + 1 + shape.operand_len()
}
