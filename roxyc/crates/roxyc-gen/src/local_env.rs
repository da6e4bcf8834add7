//! Frame slot layout for one function.
//!
//! `FnLocalEnv` materializes a function's local table from the analyzer's
//! flat ordered local list (parameters first). Slots are 32-bit units;
//! each local starts at an offset aligned to its type (two-slot values are
//! two-slot aligned, which keeps their operands encodable in 8-byte
//! units) and spans `ceil(size / 4)` slots.

use roxyc_bc::{LocalKind, LocalTableEntry};
use roxyc_par::{Ast, Type, VarDeclId};
use roxyc_util::PrimKind;

pub struct FnLocalEnv {
    /// Slot start per `local_index`.
    offsets: Vec<u16>,
    table: Vec<LocalTableEntry>,
    /// Total slot size of the parameter prefix.
    param_slots: u16,
}

impl FnLocalEnv {
    pub fn new(ast: &Ast, source: &[u8], locals: &[VarDeclId], param_count: usize) -> Self {
        let mut offsets = Vec::with_capacity(locals.len());
        let mut table = Vec::with_capacity(locals.len());
        let mut offset: u16 = 0;
        let mut param_slots = 0;

        for (index, &local) in locals.iter().enumerate() {
            let decl = &ast.var_decls[local];
            let ty = decl.ty;
            let (kind, prim) = match &ast.types[ty] {
                Type::Primitive(prim) => (LocalKind::Primitive, *prim),
                Type::Struct(_) => (LocalKind::Struct, PrimKind::Void),
                _ => (LocalKind::Function, PrimKind::Void),
            };
            let (size_bytes, align_bytes) = ast.type_layout(ty);
            let slot_size = (size_bytes.div_ceil(4)).max(1) as u16;
            let slot_align = (align_bytes.div_ceil(4)).max(1) as u16;

            offset = offset.next_multiple_of(slot_align);
            let name = if decl.name.len == 0 {
                "$tmp".to_string()
            } else {
                decl.name.text(source).into_owned()
            };
            offsets.push(offset);
            table.push(LocalTableEntry { start: offset, size: slot_size, kind, prim, name });
            offset += slot_size;

            if index + 1 == param_count {
                param_slots = offset;
            }
        }

        Self { offsets, table, param_slots }
    }

    /// The slot start of the local with the given analyzer-assigned index.
    pub fn offset_of(&self, local_index: u32) -> u16 {
        self.offsets[local_index as usize]
    }

    pub fn param_slots(&self) -> u16 {
        self.param_slots
    }

    /// Hands the finished table to a chunk.
    pub fn into_table(self) -> (Vec<LocalTableEntry>, u16) {
        (self.table, self.param_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxyc_lex::{Token, TokenKind};
    use roxyc_par::VarDecl;

    fn local(ast: &mut Ast, kind: PrimKind) -> VarDeclId {
        let ty = ast.primitive(kind);
        ast.var_decls.alloc(VarDecl::new(Token::new(0, 1, TokenKind::Identifier), ty))
    }

    #[test]
    fn test_mixed_width_layout() {
        let mut ast = Ast::new();
        let locals = vec![
            local(&mut ast, PrimKind::I32),
            local(&mut ast, PrimKind::I64),
            local(&mut ast, PrimKind::Bool),
            local(&mut ast, PrimKind::String),
        ];
        let env = FnLocalEnv::new(&ast, b"x", &locals, 0);
        // i32 at 0; i64 aligned to 2, spans 2-3; bool at 4; string
        // aligned to 6, spans 6-7.
        assert_eq!(env.offset_of(0), 0);
        assert_eq!(env.offset_of(1), 2);
        assert_eq!(env.offset_of(2), 4);
        assert_eq!(env.offset_of(3), 6);

        let (table, _) = env.into_table();
        assert_eq!(table[1].size, 2);
        assert_eq!(table[3].size, 2);
        assert!(table[3].is_reference());
    }

    #[test]
    fn test_param_slots_cover_parameter_prefix() {
        let mut ast = Ast::new();
        let locals = vec![
            local(&mut ast, PrimKind::I32),
            local(&mut ast, PrimKind::F64),
            local(&mut ast, PrimKind::I32),
        ];
        let env = FnLocalEnv::new(&ast, b"x", &locals, 2);
        // Params: i32 at 0, f64 at 2-3 -> 4 slots.
        assert_eq!(env.param_slots(), 4);
        assert_eq!(env.offset_of(2), 4);
    }

    #[test]
    fn test_sub_word_locals_take_whole_slots() {
        let mut ast = Ast::new();
        let locals = vec![local(&mut ast, PrimKind::U8), local(&mut ast, PrimKind::I16)];
        let env = FnLocalEnv::new(&ast, b"x", &locals, 0);
        assert_eq!(env.offset_of(0), 0);
        assert_eq!(env.offset_of(1), 1);
    }

    #[test]
    fn test_no_locals() {
        let ast = Ast::new();
        let env = FnLocalEnv::new(&ast, b"", &[], 0);
        assert_eq!(env.param_slots(), 0);
        let (table, _) = env.into_table();
        assert!(table.is_empty());
    }
}
