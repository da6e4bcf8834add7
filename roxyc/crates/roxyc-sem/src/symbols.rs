//! Per-module callable symbol tables.
//!
//! Every callable symbol visible in a module, imported or locally
//! declared, gets a slot in one of two ordered tables: the function table
//! (targets of `call`) or the native table (targets of `callnative`). The
//! table position is the `u16` operand the compiler emits, so registration
//! order is part of the module's bytecode contract: import-map entries
//! first, then local declarations in source order.
//!
//! The link step later resolves each entry to a chunk or a native function
//! pointer by (defining module, symbol name).

use roxyc_par::{Ast, FunDeclId};
use rustc_hash::FxHashMap;

/// Where a callable symbol landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolIndex {
    Function(u16),
    Native(u16),
}

/// The ordered callable tables of one module.
#[derive(Default)]
pub struct ModuleSymbols {
    /// `call` operand space, in registration order.
    pub functions: Vec<FunDeclId>,
    /// `callnative` operand space, in registration order.
    pub natives: Vec<FunDeclId>,
    index: FxHashMap<FunDeclId, SymbolIndex>,
    /// Visible name per slot; later registrations of a name shadow
    /// earlier ones, mirroring the scope rules.
    by_name: FxHashMap<String, SymbolIndex>,
}

impl ModuleSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable declaration under its visible name, returning
    /// its table slot. Re-registering a declaration returns the existing
    /// slot. Fails once a table outgrows the 16-bit operand space.
    pub fn register(&mut self, ast: &Ast, name: &str, decl: FunDeclId) -> Result<SymbolIndex, ()> {
        if let Some(&index) = self.index.get(&decl) {
            return Ok(index);
        }
        let index = if ast.fun_decls[decl].is_native {
            if self.natives.len() > u16::MAX as usize {
                return Err(());
            }
            let slot = SymbolIndex::Native(self.natives.len() as u16);
            self.natives.push(decl);
            slot
        } else {
            if self.functions.len() > u16::MAX as usize {
                return Err(());
            }
            let slot = SymbolIndex::Function(self.functions.len() as u16);
            self.functions.push(decl);
            slot
        };
        self.index.insert(decl, index);
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    /// The table slot of a registered declaration.
    pub fn index_of(&self, decl: FunDeclId) -> Option<SymbolIndex> {
        self.index.get(&decl).copied()
    }

    /// The table slot currently visible under `name`.
    pub fn lookup_name(&self, name: &str) -> Option<SymbolIndex> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxyc_lex::{Token, TokenKind};
    use roxyc_par::FunDecl;
    use roxyc_util::{ModuleId, PrimKind};

    fn make_decl(ast: &mut Ast, is_native: bool) -> FunDeclId {
        let void = ast.primitive(PrimKind::Void);
        ast.fun_decls.alloc(FunDecl {
            name: Token::new(0, 0, TokenKind::Identifier),
            module: ModuleId(0),
            params: Vec::new(),
            ret: void,
            is_native,
            is_pub: false,
        })
    }

    #[test]
    fn test_separate_index_spaces() {
        let mut ast = Ast::new();
        let mut symbols = ModuleSymbols::new();
        let native = make_decl(&mut ast, true);
        let fun_a = make_decl(&mut ast, false);
        let fun_b = make_decl(&mut ast, false);

        assert_eq!(symbols.register(&ast, "native_fn", native), Ok(SymbolIndex::Native(0)));
        assert_eq!(symbols.register(&ast, "fun_a", fun_a), Ok(SymbolIndex::Function(0)));
        assert_eq!(symbols.register(&ast, "fun_b", fun_b), Ok(SymbolIndex::Function(1)));
        assert_eq!(symbols.lookup_name("fun_b"), Some(SymbolIndex::Function(1)));
        assert_eq!(symbols.lookup_name("missing"), None);
    }

    #[test]
    fn test_reregistration_is_stable() {
        let mut ast = Ast::new();
        let mut symbols = ModuleSymbols::new();
        let decl = make_decl(&mut ast, false);
        let first = symbols.register(&ast, "f", decl).unwrap();
        let second = symbols.register(&ast, "f", decl).unwrap();
        assert_eq!(first, second);
        assert_eq!(symbols.functions.len(), 1);
    }
}
