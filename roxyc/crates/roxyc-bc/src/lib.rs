//! roxyc-bc - Bytecode model for the Roxy language.
//!
//! The shared vocabulary between the bytecode compiler and the VM: the
//! instruction set ([`opcode`]), compiled chunks with their line maps and
//! local tables ([`chunk`]), modules with their constant and callable
//! tables plus the linked [`Program`] ([`module`]), and a disassembler
//! ([`disasm`]).

pub mod chunk;
pub mod disasm;
pub mod module;
pub mod opcode;

pub use chunk::{Chunk, LocalKind, LocalTableEntry};
pub use disasm::{disassemble_chunk, disassemble_instruction};
pub use module::{FunctionTableEntry, Module, NativeTableEntry, Program};
pub use opcode::{arith_opcode, flag_branch, float_cmp, int_cmp_branch, ArithOp, CmpOp, OpCode,
    Shape};
