//! Lexical scope environments for name resolution.
//!
//! A stack of scopes, each mapping a name to what it binds: a local
//! variable declaration or a callable function symbol. Lookup walks from
//! the innermost scope outward; exiting a scope drops its frame and every
//! binding in it.

use roxyc_par::{FunDeclId, VarDeclId};
use rustc_hash::FxHashMap;

/// What a name resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Local(VarDeclId),
    Function(FunDeclId),
}

pub struct SemaEnv {
    scopes: Vec<FxHashMap<String, Binding>>,
}

impl SemaEnv {
    pub fn new() -> Self {
        Self { scopes: vec![FxHashMap::default()] }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the root scope");
        self.scopes.pop();
    }

    /// Defines a name in the innermost scope, shadowing outer bindings.
    pub fn define(&mut self, name: String, binding: Binding) {
        self.scopes.last_mut().unwrap().insert(name, binding);
    }

    /// Resolves a name, walking from the innermost scope outward.
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for SemaEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxyc_util::Idx;

    #[test]
    fn test_define_and_resolve() {
        let mut env = SemaEnv::new();
        let var = VarDeclId::from_usize(0);
        env.define("x".to_string(), Binding::Local(var));
        assert_eq!(env.resolve("x"), Some(Binding::Local(var)));
        assert_eq!(env.resolve("y"), None);
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut env = SemaEnv::new();
        let outer = VarDeclId::from_usize(0);
        let inner = VarDeclId::from_usize(1);
        env.define("x".to_string(), Binding::Local(outer));
        env.push_scope();
        env.define("x".to_string(), Binding::Local(inner));
        assert_eq!(env.resolve("x"), Some(Binding::Local(inner)));
        env.pop_scope();
        assert_eq!(env.resolve("x"), Some(Binding::Local(outer)));
    }

    #[test]
    fn test_pop_drops_bindings() {
        let mut env = SemaEnv::new();
        env.push_scope();
        env.define("temp".to_string(), Binding::Local(VarDeclId::from_usize(0)));
        env.pop_scope();
        assert_eq!(env.resolve("temp"), None);
    }

    #[test]
    fn test_outer_scope_visible_from_inner() {
        let mut env = SemaEnv::new();
        let f = FunDeclId::from_usize(3);
        env.define("helper".to_string(), Binding::Function(f));
        env.push_scope();
        env.push_scope();
        assert_eq!(env.resolve("helper"), Some(Binding::Function(f)));
    }
}
