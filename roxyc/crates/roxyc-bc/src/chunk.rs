//! Compiled chunk model.
//!
//! A chunk is one compiled function body (or a module's top level): the
//! bytecode bytes, one source line per byte for runtime error reporting,
//! the local-variable table in 32-bit slot units, and the set of
//! reference-local slot offsets the VM must release when the frame exits.
//!
//! Operand bytes written alongside an opcode carry the line marker
//! [`Chunk::NO_LINE`]; the disassembler shows them folded into their
//! opcode's line.

use crate::opcode::OpCode;
use roxyc_util::{ModuleId, PrimKind};

/// Broad classification of a local's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalKind {
    Primitive,
    Struct,
    Function,
}

/// One local variable's slot assignment.
#[derive(Clone, Debug)]
pub struct LocalTableEntry {
    /// First slot, in 32-bit units from the frame base.
    pub start: u16,
    /// Width in 32-bit units.
    pub size: u16,
    pub kind: LocalKind,
    /// Primitive kind when `kind` is `Primitive`; `Void` otherwise.
    pub prim: PrimKind,
    pub name: String,
}

impl LocalTableEntry {
    /// True for locals whose slots hold a reference-counted pointer.
    pub fn is_reference(&self) -> bool {
        self.kind == LocalKind::Primitive && self.prim.is_reference()
    }
}

pub struct Chunk {
    pub name: String,
    /// The module this chunk belongs to; `call`/`callnative`/`ldstr`
    /// operands index that module's tables.
    pub module: ModuleId,
    pub code: Vec<u8>,
    /// Source line per bytecode byte; same length as `code`.
    pub lines: Vec<u32>,
    pub local_table: Vec<LocalTableEntry>,
    /// Total slot size of the parameters (a prefix of the local table).
    pub param_slots: u16,
    /// Slot offsets of reference locals; populated by the link step.
    pub ref_local_offsets: Vec<u16>,
}

impl Chunk {
    /// Line marker for operand bytes.
    pub const NO_LINE: u32 = u32::MAX;

    pub fn new(name: impl Into<String>, module: ModuleId) -> Self {
        Self {
            name: name.into(),
            module,
            code: Vec::new(),
            lines: Vec::new(),
            local_table: Vec::new(),
            param_slots: 0,
            ref_local_offsets: Vec::new(),
        }
    }

    /// Current length of the bytecode, the target of forward patches.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op as u8, line);
    }

    pub fn write_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_u16(&mut self, value: u16) {
        for byte in value.to_le_bytes() {
            self.write_byte(byte, Self::NO_LINE);
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.write_byte(byte, Self::NO_LINE);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        for byte in value.to_le_bytes() {
            self.write_byte(byte, Self::NO_LINE);
        }
    }

    /// Overwrites four bytes in place; used to patch forward jumps.
    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes(self.code[at..at + 2].try_into().unwrap())
    }

    pub fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.code[at..at + 4].try_into().unwrap())
    }

    pub fn read_u64(&self, at: usize) -> u64 {
        u64::from_le_bytes(self.code[at..at + 8].try_into().unwrap())
    }

    /// The source line of the byte at `at`, skipping back over operand
    /// bytes to their opcode.
    pub fn line_at(&self, at: usize) -> u32 {
        let mut at = at.min(self.lines.len().saturating_sub(1));
        loop {
            match self.lines.get(at) {
                Some(&line) if line != Self::NO_LINE => return line,
                _ if at == 0 => return 0,
                _ => at -= 1,
            }
        }
    }

    /// Total frame size in 32-bit slots.
    pub fn locals_slot_size(&self) -> u16 {
        self.local_table.iter().map(|entry| entry.start + entry.size).max().unwrap_or(0)
    }

    /// Records the slot offsets of all reference locals; the VM releases
    /// these when the frame unwinds.
    pub fn find_ref_local_offsets(&mut self) {
        self.ref_local_offsets =
            self.local_table.iter().filter(|e| e.is_reference()).map(|e| e.start).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chunk() -> Chunk {
        Chunk::new("test", ModuleId(0))
    }

    #[test]
    fn test_write_keeps_lines_in_step() {
        let mut chunk = test_chunk();
        chunk.write_op(OpCode::Iconst, 3);
        chunk.write_u32(1234);
        assert_eq!(chunk.code.len(), 5);
        assert_eq!(chunk.lines.len(), chunk.code.len());
        assert_eq!(chunk.line_at(0), 3);
        // Operand bytes fold back to the opcode's line.
        assert_eq!(chunk.line_at(4), 3);
    }

    #[test]
    fn test_little_endian_operands() {
        let mut chunk = test_chunk();
        chunk.write_op(OpCode::Iconst, 1);
        chunk.write_u32(0x0102_0304);
        assert_eq!(&chunk.code[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(chunk.read_u32(1), 0x0102_0304);

        chunk.write_op(OpCode::Lconst, 1);
        chunk.write_u64(0x1122_3344_5566_7788);
        assert_eq!(chunk.read_u64(6), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_patching() {
        let mut chunk = test_chunk();
        chunk.write_op(OpCode::Jmp, 1);
        let at = chunk.len();
        chunk.write_u32(0xFFFF_FFFF);
        chunk.patch_u32(at, 42);
        assert_eq!(chunk.read_u32(at), 42);
    }

    #[test]
    fn test_locals_slot_size_and_refs() {
        let mut chunk = test_chunk();
        chunk.local_table = vec![
            LocalTableEntry {
                start: 0,
                size: 1,
                kind: LocalKind::Primitive,
                prim: PrimKind::I32,
                name: "a".into(),
            },
            LocalTableEntry {
                start: 2,
                size: 2,
                kind: LocalKind::Primitive,
                prim: PrimKind::String,
                name: "s".into(),
            },
        ];
        assert_eq!(chunk.locals_slot_size(), 4);
        chunk.find_ref_local_offsets();
        assert_eq!(chunk.ref_local_offsets, vec![2]);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = test_chunk();
        assert!(chunk.is_empty());
        assert_eq!(chunk.locals_slot_size(), 0);
    }
}
