//! The bytecode instruction set.
//!
//! Opcodes are one byte; operands follow little-endian. Families:
//!
//! - local load/store per width class (`i` = one slot, `l` = two slots,
//!   `r` = reference), each with fast forms for slots 0..3, a one-byte
//!   operand form (`_s`) and a two-byte general form. Two-slot and
//!   reference operands count in 8-byte units; one-slot operands in 4-byte
//!   units.
//! - constants with the narrowest available encoding
//! - typed arithmetic with signed/unsigned variants where division and
//!   remainder semantics differ
//! - comparisons pushing a -1/0/1 flag (`l`/`g` variants differ only in
//!   NaN handling)
//! - branches in short (1-byte offset) and long (4-byte offset) forms;
//!   `loop` variants jump backwards
//! - calls indexing the owning module's function and native tables
//!
//! `brk` and `swch` are reserved: `brk` executes as a no-op, `swch` traps.

use roxyc_util::PrimKind;

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal,)*) => {
        /// One-byte operation codes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(u8)]
        pub enum OpCode {
            $($variant,)*
        }

        impl OpCode {
            pub const COUNT: usize = [$($mnemonic),*].len();

            const TABLE: [OpCode; OpCode::COUNT] = [$(OpCode::$variant),*];

            /// Decodes a byte; `None` for out-of-range bytes.
            #[inline]
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                OpCode::TABLE.get(byte as usize).copied()
            }

            /// The assembler mnemonic.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop",
    Brk => "brk",
    Iload0 => "iload_0",
    Iload1 => "iload_1",
    Iload2 => "iload_2",
    Iload3 => "iload_3",
    Istore0 => "istore_0",
    Istore1 => "istore_1",
    Istore2 => "istore_2",
    Istore3 => "istore_3",
    Iload => "iload",
    IloadS => "iload_s",
    Istore => "istore",
    IstoreS => "istore_s",
    Lload0 => "lload_0",
    Lload1 => "lload_1",
    Lload2 => "lload_2",
    Lload3 => "lload_3",
    Lstore0 => "lstore_0",
    Lstore1 => "lstore_1",
    Lstore2 => "lstore_2",
    Lstore3 => "lstore_3",
    Lload => "lload",
    LloadS => "lload_s",
    Lstore => "lstore",
    LstoreS => "lstore_s",
    Rload0 => "rload_0",
    Rload1 => "rload_1",
    Rload2 => "rload_2",
    Rload3 => "rload_3",
    Rstore0 => "rstore_0",
    Rstore1 => "rstore_1",
    Rstore2 => "rstore_2",
    Rstore3 => "rstore_3",
    Rload => "rload",
    RloadS => "rload_s",
    Rstore => "rstore",
    RstoreS => "rstore_s",
    IconstNil => "iconst_nil",
    IconstM1 => "iconst_m1",
    Iconst0 => "iconst_0",
    Iconst1 => "iconst_1",
    Iconst2 => "iconst_2",
    Iconst3 => "iconst_3",
    Iconst4 => "iconst_4",
    Iconst5 => "iconst_5",
    Iconst6 => "iconst_6",
    Iconst7 => "iconst_7",
    Iconst8 => "iconst_8",
    IconstS => "iconst_s",
    Iconst => "iconst",
    Lconst => "lconst",
    Fconst => "fconst",
    Dconst => "dconst",
    Dup => "dup",
    Pop => "pop",
    Call => "call",
    CallNative => "callnative",
    Ret => "ret",
    Iret => "iret",
    Lret => "lret",
    Rret => "rret",
    JmpS => "jmp_s",
    LoopS => "loop_s",
    BrFalseS => "br_false_s",
    BrTrueS => "br_true_s",
    BrIcmpEqS => "br_icmpeq_s",
    BrIcmpNeS => "br_icmpne_s",
    BrIcmpGeS => "br_icmpge_s",
    BrIcmpGtS => "br_icmpgt_s",
    BrIcmpLeS => "br_icmple_s",
    BrIcmpLtS => "br_icmplt_s",
    BrEqS => "br_eq_s",
    BrNeS => "br_ne_s",
    BrGeS => "br_ge_s",
    BrGtS => "br_gt_s",
    BrLeS => "br_le_s",
    BrLtS => "br_lt_s",
    Jmp => "jmp",
    Loop => "loop",
    BrFalse => "br_false",
    BrTrue => "br_true",
    BrIcmpEq => "br_icmpeq",
    BrIcmpNe => "br_icmpne",
    BrIcmpGe => "br_icmpge",
    BrIcmpGt => "br_icmpgt",
    BrIcmpLe => "br_icmple",
    BrIcmpLt => "br_icmplt",
    BrEq => "br_eq",
    BrNe => "br_ne",
    BrGe => "br_ge",
    BrGt => "br_gt",
    BrLe => "br_le",
    BrLt => "br_lt",
    Swch => "swch",
    Iadd => "iadd",
    Isub => "isub",
    Imul => "imul",
    Uimul => "uimul",
    Idiv => "idiv",
    Uidiv => "uidiv",
    Irem => "irem",
    Uirem => "uirem",
    Ladd => "ladd",
    Lsub => "lsub",
    Lmul => "lmul",
    Ulmul => "ulmul",
    Ldiv => "ldiv",
    Uldiv => "uldiv",
    Lrem => "lrem",
    Ulrem => "ulrem",
    Fadd => "fadd",
    Fsub => "fsub",
    Fmul => "fmul",
    Fdiv => "fdiv",
    Dadd => "dadd",
    Dsub => "dsub",
    Dmul => "dmul",
    Ddiv => "ddiv",
    Lcmp => "lcmp",
    Fcmpl => "fcmpl",
    Fcmpg => "fcmpg",
    Dcmpl => "dcmpl",
    Dcmpg => "dcmpg",
    Band => "band",
    Bor => "bor",
    Bxor => "bxor",
    Bshl => "bshl",
    Bshr => "bshr",
    BshrUn => "bshr_un",
    Bneg => "bneg",
    Bnot => "bnot",
    Ldstr => "ldstr",
}

/// Operand layout of an instruction, for decoding and disassembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// No operand.
    Simple,
    /// One-byte operand.
    U8,
    /// Two-byte operand.
    U16,
    /// Four-byte operand.
    U32,
    /// Eight-byte operand.
    U64,
    /// Four-byte float operand.
    F32,
    /// Eight-byte float operand.
    F64,
    /// One-byte forward branch offset.
    BranchShort,
    /// Four-byte forward branch offset.
    Branch,
    /// One-byte backward branch offset.
    LoopShort,
    /// Four-byte backward branch offset.
    LoopLong,
    /// Four-byte string table index.
    Str,
}

impl Shape {
    /// Operand size in bytes.
    pub fn operand_len(self) -> usize {
        match self {
            Shape::Simple => 0,
            Shape::U8 | Shape::BranchShort | Shape::LoopShort => 1,
            Shape::U16 => 2,
            Shape::U32 | Shape::F32 | Shape::Branch | Shape::LoopLong | Shape::Str => 4,
            Shape::U64 | Shape::F64 => 8,
        }
    }
}

impl OpCode {
    pub fn shape(self) -> Shape {
        use OpCode::*;
        match self {
            IloadS | IstoreS | LloadS | LstoreS | RloadS | RstoreS | IconstS => Shape::U8,
            Iload | Istore | Lload | Lstore | Rload | Rstore | Call | CallNative => Shape::U16,
            Iconst => Shape::U32,
            Lconst => Shape::U64,
            Fconst => Shape::F32,
            Dconst => Shape::F64,
            JmpS | BrFalseS | BrTrueS | BrIcmpEqS | BrIcmpNeS | BrIcmpGeS | BrIcmpGtS
            | BrIcmpLeS | BrIcmpLtS | BrEqS | BrNeS | BrGeS | BrGtS | BrLeS | BrLtS => {
                Shape::BranchShort
            }
            LoopS => Shape::LoopShort,
            Jmp | BrFalse | BrTrue | BrIcmpEq | BrIcmpNe | BrIcmpGe | BrIcmpGt | BrIcmpLe
            | BrIcmpLt | BrEq | BrNe | BrGe | BrGt | BrLe | BrLt => Shape::Branch,
            Loop => Shape::LoopLong,
            Ldstr => Shape::Str,
            _ => Shape::Simple,
        }
    }
}

/// Arithmetic operator selector for [`arith_opcode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Comparison operator selector for the branch helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The negation, used to branch over a body when a condition fails.
    pub fn opposite(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

/// The typed arithmetic opcode for a primitive operand type, or `None`
/// when the operation is not defined for it (e.g. float remainder).
pub const fn arith_opcode(kind: PrimKind, op: ArithOp) -> Option<OpCode> {
    use PrimKind::*;
    let class = match kind {
        I8 | I16 | I32 => 0u8,
        U8 | U16 | U32 => 1,
        I64 => 2,
        U64 => 3,
        F32 => 4,
        F64 => 5,
        _ => return None,
    };
    Some(match (op, class) {
        (ArithOp::Add, 0 | 1) => OpCode::Iadd,
        (ArithOp::Add, 2 | 3) => OpCode::Ladd,
        (ArithOp::Add, 4) => OpCode::Fadd,
        (ArithOp::Add, _) => OpCode::Dadd,
        (ArithOp::Sub, 0 | 1) => OpCode::Isub,
        (ArithOp::Sub, 2 | 3) => OpCode::Lsub,
        (ArithOp::Sub, 4) => OpCode::Fsub,
        (ArithOp::Sub, _) => OpCode::Dsub,
        (ArithOp::Mul, 0) => OpCode::Imul,
        (ArithOp::Mul, 1) => OpCode::Uimul,
        (ArithOp::Mul, 2) => OpCode::Lmul,
        (ArithOp::Mul, 3) => OpCode::Ulmul,
        (ArithOp::Mul, 4) => OpCode::Fmul,
        (ArithOp::Mul, _) => OpCode::Dmul,
        (ArithOp::Div, 0) => OpCode::Idiv,
        (ArithOp::Div, 1) => OpCode::Uidiv,
        (ArithOp::Div, 2) => OpCode::Ldiv,
        (ArithOp::Div, 3) => OpCode::Uldiv,
        (ArithOp::Div, 4) => OpCode::Fdiv,
        (ArithOp::Div, _) => OpCode::Ddiv,
        (ArithOp::Rem, 0) => OpCode::Irem,
        (ArithOp::Rem, 1) => OpCode::Uirem,
        (ArithOp::Rem, 2) => OpCode::Lrem,
        (ArithOp::Rem, 3) => OpCode::Ulrem,
        (ArithOp::Rem, _) => return None,
    })
}

/// The pairwise integer compare-and-branch opcode (branch taken when the
/// comparison holds).
pub const fn int_cmp_branch(op: CmpOp, short: bool) -> OpCode {
    match (op, short) {
        (CmpOp::Eq, false) => OpCode::BrIcmpEq,
        (CmpOp::Ne, false) => OpCode::BrIcmpNe,
        (CmpOp::Lt, false) => OpCode::BrIcmpLt,
        (CmpOp::Le, false) => OpCode::BrIcmpLe,
        (CmpOp::Gt, false) => OpCode::BrIcmpGt,
        (CmpOp::Ge, false) => OpCode::BrIcmpGe,
        (CmpOp::Eq, true) => OpCode::BrIcmpEqS,
        (CmpOp::Ne, true) => OpCode::BrIcmpNeS,
        (CmpOp::Lt, true) => OpCode::BrIcmpLtS,
        (CmpOp::Le, true) => OpCode::BrIcmpLeS,
        (CmpOp::Gt, true) => OpCode::BrIcmpGtS,
        (CmpOp::Ge, true) => OpCode::BrIcmpGeS,
    }
}

/// The compare-flag branch opcode (branch taken when the -1/0/1 flag on
/// the stack satisfies the comparison against zero).
pub const fn flag_branch(op: CmpOp, short: bool) -> OpCode {
    match (op, short) {
        (CmpOp::Eq, false) => OpCode::BrEq,
        (CmpOp::Ne, false) => OpCode::BrNe,
        (CmpOp::Lt, false) => OpCode::BrLt,
        (CmpOp::Le, false) => OpCode::BrLe,
        (CmpOp::Gt, false) => OpCode::BrGt,
        (CmpOp::Ge, false) => OpCode::BrGe,
        (CmpOp::Eq, true) => OpCode::BrEqS,
        (CmpOp::Ne, true) => OpCode::BrNeS,
        (CmpOp::Lt, true) => OpCode::BrLtS,
        (CmpOp::Le, true) => OpCode::BrLeS,
        (CmpOp::Gt, true) => OpCode::BrGtS,
        (CmpOp::Ge, true) => OpCode::BrGeS,
    }
}

/// The float comparison opcode. The `g` variant pushes +1 for NaN, the
/// `l` variant -1; callers pick the variant whose NaN result fails their
/// branch.
pub const fn float_cmp(kind: PrimKind, greater: bool) -> Option<OpCode> {
    match (kind, greater) {
        (PrimKind::F32, true) => Some(OpCode::Fcmpg),
        (PrimKind::F32, false) => Some(OpCode::Fcmpl),
        (PrimKind::F64, true) => Some(OpCode::Dcmpg),
        (PrimKind::F64, false) => Some(OpCode::Dcmpl),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_round_trip() {
        for byte in 0..OpCode::COUNT as u8 {
            let op = OpCode::from_byte(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(OpCode::from_byte(OpCode::COUNT as u8), None);
        assert_eq!(OpCode::from_byte(255), None);
    }

    #[test]
    fn test_mnemonics_match_families() {
        assert_eq!(OpCode::Iload2.mnemonic(), "iload_2");
        assert_eq!(OpCode::LstoreS.mnemonic(), "lstore_s");
        assert_eq!(OpCode::BrIcmpLt.mnemonic(), "br_icmplt");
        assert_eq!(OpCode::CallNative.mnemonic(), "callnative");
    }

    #[test]
    fn test_shapes() {
        assert_eq!(OpCode::Nop.shape(), Shape::Simple);
        assert_eq!(OpCode::IconstS.shape(), Shape::U8);
        assert_eq!(OpCode::Call.shape(), Shape::U16);
        assert_eq!(OpCode::Lconst.shape(), Shape::U64);
        assert_eq!(OpCode::Jmp.shape(), Shape::Branch);
        assert_eq!(OpCode::LoopS.shape(), Shape::LoopShort);
        assert_eq!(OpCode::Ldstr.shape(), Shape::Str);
        assert_eq!(Shape::Branch.operand_len(), 4);
    }

    #[test]
    fn test_arith_selection() {
        assert_eq!(arith_opcode(PrimKind::I32, ArithOp::Add), Some(OpCode::Iadd));
        assert_eq!(arith_opcode(PrimKind::U32, ArithOp::Div), Some(OpCode::Uidiv));
        assert_eq!(arith_opcode(PrimKind::I64, ArithOp::Mul), Some(OpCode::Lmul));
        assert_eq!(arith_opcode(PrimKind::U64, ArithOp::Rem), Some(OpCode::Ulrem));
        assert_eq!(arith_opcode(PrimKind::F32, ArithOp::Sub), Some(OpCode::Fsub));
        assert_eq!(arith_opcode(PrimKind::F64, ArithOp::Rem), None);
        assert_eq!(arith_opcode(PrimKind::Bool, ArithOp::Add), None);
    }

    #[test]
    fn test_branch_selection() {
        assert_eq!(int_cmp_branch(CmpOp::Lt, false), OpCode::BrIcmpLt);
        assert_eq!(int_cmp_branch(CmpOp::Lt.opposite(), false), OpCode::BrIcmpGe);
        assert_eq!(int_cmp_branch(CmpOp::Eq, true), OpCode::BrIcmpEqS);
        assert_eq!(flag_branch(CmpOp::Ge, false), OpCode::BrGe);
        assert_eq!(float_cmp(PrimKind::F32, true), Some(OpCode::Fcmpg));
        assert_eq!(float_cmp(PrimKind::F64, false), Some(OpCode::Dcmpl));
        assert_eq!(float_cmp(PrimKind::I32, false), None);
    }
}
