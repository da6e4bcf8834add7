//! roxyc-sem - Semantic analysis for the Roxy language.
//!
//! Analysis runs in two phases over the parsed AST:
//!
//! - **Phase A** ([`scan_exports`]): walks only the top-level declarations
//!   of each module and records its exported (`pub`) functions. No bodies
//!   are inspected, so every module can be scanned before any is checked.
//! - **Phase B** ([`SemaAnalyzer::typecheck`]): full typechecking of one
//!   module under an import map supplied by the driver (built-ins
//!   unconditionally, plus wildcard and selective imports).
//!
//! Typechecking mutates the AST in place: every expression receives its
//! resolved type, variable references receive a back-edge to the local or
//! function declaration they name, and each function receives a flat
//! ordered list of its locals (parameters first) with stable
//! `local_index`es assigned in source order. It also builds the module's
//! ordered callable symbol tables, which define the operand space of
//! `call` and `callnative`.
//!
//! Errors are collected, not short-circuited: a failed statement aborts
//! only itself, and all errors in a module are reported together.

pub mod env;
pub mod symbols;

pub use env::{Binding, SemaEnv};
pub use symbols::{ModuleSymbols, SymbolIndex};

use indexmap::IndexMap;
use roxyc_lex::{Token, TokenKind};
use roxyc_par::{
    Ast, ExprId, ExprKind, FunDeclId, FunctionType, Literal, Stmt, StmtId, Type, TypeId, VarDecl,
    VarDeclId, TYPE_INFERRED,
};
use roxyc_util::{PrimKind, SourceLocation};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Maps each imported symbol name to the declaration it resolves to.
/// Insertion order is significant: it fixes the imported entries' positions
/// in the module's callable tables.
pub type ImportMap = IndexMap<String, FunDeclId>;

#[derive(Debug, Error)]
pub enum SemaErrorKind {
    #[error("Undefined variable.")]
    UndefinedVariable,
    #[error("{0}")]
    IncompatibleTypes(String),
    #[error("Cannot infer type of variable without an initializer.")]
    CannotInferType,
    #[error("{0}")]
    Misc(String),
}

#[derive(Debug)]
pub struct SemaError {
    pub kind: SemaErrorKind,
    pub loc: SourceLocation,
}

/// The outcome of checking one module.
pub struct Analysis {
    pub errors: Vec<SemaError>,
    pub symbols: ModuleSymbols,
}

/// Phase A: records the exported function declarations of a module without
/// looking at any bodies.
pub fn scan_exports(ast: &mut Ast, root: StmtId) {
    let statements = match &ast.stmts[root] {
        Stmt::Module(m) => m.statements.clone(),
        _ => return,
    };
    let mut exports = Vec::new();
    for stmt in statements {
        if let Stmt::Function(f) = &ast.stmts[stmt] {
            if ast.fun_decls[f.decl].is_pub {
                exports.push(f.decl);
            }
        }
    }
    if let Stmt::Module(m) = &mut ast.stmts[root] {
        m.exports = exports;
    }
}

/// State of the function (or module top level) currently being checked.
struct FnCtx {
    ret: TypeId,
    locals: Vec<VarDeclId>,
    /// Set when the body discards a reference-typed expression result; the
    /// compiler then needs a scratch reference slot to keep the refcount
    /// law intact.
    needs_ref_discard: bool,
}

pub struct SemaAnalyzer<'a> {
    ast: &'a mut Ast,
    source: &'a [u8],
    errors: Vec<SemaError>,
    env: SemaEnv,
    symbols: ModuleSymbols,
    /// Struct names declared so far in this module.
    struct_types: FxHashMap<String, TypeId>,
    /// Cached `Type::Function` nodes per declaration.
    fn_types: FxHashMap<FunDeclId, TypeId>,
    fn_stack: Vec<FnCtx>,
}

impl<'a> SemaAnalyzer<'a> {
    pub fn new(ast: &'a mut Ast, source: &'a [u8]) -> Self {
        Self {
            ast,
            source,
            errors: Vec::new(),
            env: SemaEnv::new(),
            symbols: ModuleSymbols::new(),
            struct_types: FxHashMap::default(),
            fn_types: FxHashMap::default(),
            fn_stack: Vec::new(),
        }
    }

    /// Phase B: typechecks one module under the given import map.
    pub fn typecheck(mut self, root: StmtId, import_map: &ImportMap) -> Analysis {
        // Imported symbols come first in the callable tables and are
        // visible in the module's root scope.
        for (name, &decl) in import_map {
            if self.symbols.register(self.ast, name, decl).is_err() {
                let loc = self.ast.fun_decls[decl].name.location();
                self.error(SemaErrorKind::Misc("Too many functions in module.".into()), loc);
                continue;
            }
            self.env.define(name.clone(), Binding::Function(decl));
        }

        let statements = match &self.ast.stmts[root] {
            Stmt::Module(m) => m.statements.clone(),
            _ => {
                return Analysis { errors: self.errors, symbols: self.symbols };
            }
        };

        let void = self.ast.primitive(PrimKind::Void);
        self.fn_stack.push(FnCtx { ret: void, locals: Vec::new(), needs_ref_discard: false });
        for stmt in statements {
            let _ = self.check_stmt(stmt);
        }
        let ctx = self.fn_stack.pop().unwrap();
        let locals = self.finish_locals(ctx);
        if let Stmt::Module(m) = &mut self.ast.stmts[root] {
            m.locals = locals;
        }

        Analysis { errors: self.errors, symbols: self.symbols }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn check_stmt(&mut self, id: StmtId) -> Result<(), ()> {
        match &self.ast.stmts[id] {
            Stmt::Error | Stmt::Import(_) | Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
            Stmt::Block { statements } => {
                let statements = statements.clone();
                self.env.push_scope();
                for stmt in statements {
                    let _ = self.check_stmt(stmt);
                }
                self.env.pop_scope();
                Ok(())
            }
            Stmt::Module(_) => Ok(()),
            Stmt::Expression { expr } => {
                let expr = *expr;
                let ty = self.infer_expr(expr)?;
                // A discarded reference result needs a scratch slot so the
                // frame-exit decrement reaches it.
                if self.ast.is_string(ty)
                    && !matches!(self.ast.exprs[expr].kind, ExprKind::Assign { .. })
                {
                    if let Some(ctx) = self.fn_stack.last_mut() {
                        ctx.needs_ref_discard = true;
                    }
                }
                Ok(())
            }
            Stmt::Struct { name, ty } => {
                let (name, ty) = (*name, *ty);
                self.declare_struct(name, ty)
            }
            Stmt::Function(f) => {
                let decl = f.decl;
                let body = f.body.clone();
                self.declare_function(id, decl, body)
            }
            Stmt::If { condition, then_branch, else_branch } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);
                let cond_ty = self.infer_expr(condition)?;
                if !self.ast.is_bool(cond_ty) {
                    let loc = self.ast.exprs[condition].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Condition of 'if' must be a bool.".into(),
                        ),
                        loc,
                    );
                }
                let _ = self.check_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    let _ = self.check_stmt(else_branch);
                }
                Ok(())
            }
            Stmt::Var { var, initializer } => {
                let (var, initializer) = (*var, *initializer);
                self.declare_var(var, initializer)
            }
            Stmt::While { condition, body } => {
                let (condition, body) = (*condition, *body);
                let cond_ty = self.infer_expr(condition)?;
                if !self.ast.is_bool(cond_ty) {
                    let loc = self.ast.exprs[condition].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Condition of 'while' must be a bool.".into(),
                        ),
                        loc,
                    );
                }
                self.check_stmt(body)
            }
            Stmt::Return { keyword, expr } => {
                let (keyword, expr) = (*keyword, *expr);
                self.check_return(keyword, expr)
            }
        }
    }

    fn declare_var(&mut self, var: VarDeclId, initializer: Option<ExprId>) -> Result<(), ()> {
        let name_tok = self.ast.var_decls[var].name;
        let mut declared = self.ast.var_decls[var].ty;
        if declared != TYPE_INFERRED {
            declared = self.resolve_type(declared)?;
            self.ast.var_decls[var].ty = declared;
        }

        match initializer {
            Some(init) => {
                let init_ty = self.infer_expr(init)?;
                if declared == TYPE_INFERRED {
                    self.ast.var_decls[var].ty = init_ty;
                } else if !self.ast.type_same(declared, init_ty) {
                    let loc = self.ast.exprs[init].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Initializer of type '{}' does not match declared type '{}'.",
                            self.ast.type_name(init_ty, self.source),
                            self.ast.type_name(declared, self.source),
                        )),
                        loc,
                    );
                }
            }
            None => {
                if declared == TYPE_INFERRED {
                    return self.err(SemaErrorKind::CannotInferType, name_tok.location());
                }
            }
        }

        let ty = self.ast.var_decls[var].ty;
        if self.ast.is_void(ty) {
            return self.err(
                SemaErrorKind::IncompatibleTypes(
                    "Cannot declare a variable of type 'void'.".into(),
                ),
                name_tok.location(),
            );
        }

        let ctx = self.fn_stack.last_mut().expect("variable outside any function context");
        self.ast.var_decls[var].local_index = Some(ctx.locals.len() as u32);
        ctx.locals.push(var);
        let name = name_tok.text(self.source).into_owned();
        self.env.define(name, Binding::Local(var));
        Ok(())
    }

    fn declare_struct(&mut self, name: Token, ty: TypeId) -> Result<(), ()> {
        let fields = match &self.ast.types[ty] {
            Type::Struct(st) => st.fields.clone(),
            _ => return Ok(()),
        };
        for field in fields {
            let field_ty = self.ast.var_decls[field].ty;
            let resolved = self.resolve_type(field_ty)?;
            if self.ast.is_void(resolved) {
                let loc = self.ast.var_decls[field].name.location();
                return self.err(
                    SemaErrorKind::IncompatibleTypes(
                        "Struct fields cannot have type 'void'.".into(),
                    ),
                    loc,
                );
            }
            self.ast.var_decls[field].ty = resolved;
        }
        let name = name.text(self.source).into_owned();
        self.struct_types.insert(name, ty);
        Ok(())
    }

    fn declare_function(
        &mut self,
        stmt: StmtId,
        decl: FunDeclId,
        body: Vec<StmtId>,
    ) -> Result<(), ()> {
        let name_tok = self.ast.fun_decls[decl].name;
        let params = self.ast.fun_decls[decl].params.clone();
        let is_native = self.ast.fun_decls[decl].is_native;

        for &param in &params {
            let ty = self.ast.var_decls[param].ty;
            let resolved = self.resolve_type(ty)?;
            if self.ast.is_void(resolved) {
                let loc = self.ast.var_decls[param].name.location();
                return self.err(
                    SemaErrorKind::IncompatibleTypes(
                        "Parameters cannot have type 'void'.".into(),
                    ),
                    loc,
                );
            }
            self.ast.var_decls[param].ty = resolved;
        }
        let ret = self.ast.fun_decls[decl].ret;
        let ret = self.resolve_type(ret)?;
        self.ast.fun_decls[decl].ret = ret;

        let name = name_tok.text(self.source).into_owned();
        if self.symbols.register(self.ast, &name, decl).is_err() {
            return self.err(
                SemaErrorKind::Misc("Too many functions in module.".into()),
                name_tok.location(),
            );
        }
        self.env.define(name, Binding::Function(decl));

        if is_native {
            return Ok(());
        }

        self.fn_stack.push(FnCtx { ret, locals: Vec::new(), needs_ref_discard: false });
        self.env.push_scope();
        for (index, &param) in params.iter().enumerate() {
            self.ast.var_decls[param].local_index = Some(index as u32);
            self.fn_stack.last_mut().unwrap().locals.push(param);
            let param_name = self.ast.var_decls[param].name.text(self.source).into_owned();
            self.env.define(param_name, Binding::Local(param));
        }
        for body_stmt in body {
            let _ = self.check_stmt(body_stmt);
        }
        self.env.pop_scope();
        let ctx = self.fn_stack.pop().unwrap();
        let locals = self.finish_locals(ctx);
        if let Stmt::Function(f) = &mut self.ast.stmts[stmt] {
            f.locals = locals;
        }
        Ok(())
    }

    /// Appends the synthetic scratch reference local if the body needs one.
    fn finish_locals(&mut self, ctx: FnCtx) -> Vec<VarDeclId> {
        let mut locals = ctx.locals;
        if ctx.needs_ref_discard {
            let string_ty = self.ast.primitive(PrimKind::String);
            let mut scratch =
                VarDecl::new(Token::new(0, 0, TokenKind::Identifier), string_ty);
            scratch.local_index = Some(locals.len() as u32);
            locals.push(self.ast.var_decls.alloc(scratch));
        }
        locals
    }

    fn check_return(&mut self, keyword: Token, expr: Option<ExprId>) -> Result<(), ()> {
        let ret = self.fn_stack.last().expect("return outside any function context").ret;
        match expr {
            Some(expr) => {
                let ty = self.infer_expr(expr)?;
                if !self.ast.type_same(ret, ty) {
                    let loc = self.ast.exprs[expr].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Cannot return '{}' from a function declared to return '{}'.",
                            self.ast.type_name(ty, self.source),
                            self.ast.type_name(ret, self.source),
                        )),
                        loc,
                    );
                }
            }
            None => {
                if !self.ast.is_void(ret) {
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Non-void function must return a value.".into(),
                        ),
                        keyword.location(),
                    );
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Infers and records the type of an expression.
    fn infer_expr(&mut self, id: ExprId) -> Result<TypeId, ()> {
        let loc = self.ast.exprs[id].loc;
        match &self.ast.exprs[id].kind {
            ExprKind::Error => {
                self.err(SemaErrorKind::Misc("Cannot typecheck an error expression.".into()), loc)
            }
            ExprKind::Literal(lit) => {
                let lit = *lit;
                let ty = match lit {
                    Literal::Nil => self.ast.primitive(PrimKind::String),
                    Literal::Bool(_) => self.ast.primitive(PrimKind::Bool),
                    Literal::Int { kind, .. } | Literal::Float { kind, .. } => {
                        self.ast.primitive(kind)
                    }
                    Literal::Str(_) => self.ast.primitive(PrimKind::String),
                };
                self.finish(id, ty)
            }
            ExprKind::Grouping { expr } => {
                let inner = *expr;
                let ty = self.infer_expr(inner)?;
                self.finish(id, ty)
            }
            ExprKind::Variable { name, .. } => {
                let name = *name;
                self.infer_variable(id, name)
            }
            ExprKind::Assign { name, value, .. } => {
                let (name, value) = (*name, *value);
                self.infer_assign(id, name, value)
            }
            ExprKind::Unary { op, right } => {
                let (op, right) = (*op, *right);
                self.infer_unary(id, op, right)
            }
            ExprKind::Binary { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.infer_binary(id, op, left, right)
            }
            ExprKind::Ternary { cond, left, right } => {
                let (cond, left, right) = (*cond, *left, *right);
                let cond_ty = self.infer_expr(cond)?;
                if !self.ast.is_bool(cond_ty) {
                    let cond_loc = self.ast.exprs[cond].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Condition of '?:' must be a bool.".into(),
                        ),
                        cond_loc,
                    );
                }
                let left_ty = self.infer_expr(left)?;
                let right_ty = self.infer_expr(right)?;
                if !self.ast.type_same(left_ty, right_ty) {
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Branches of '?:' must have the same type.".into(),
                        ),
                        loc,
                    );
                }
                self.finish(id, left_ty)
            }
            ExprKind::Call { callee, args, .. } => {
                let (callee, args) = (*callee, args.clone());
                self.infer_call(id, callee, args)
            }
            ExprKind::Get { object, name } => {
                let (object, name) = (*object, *name);
                let field_ty = self.field_type(object, name)?;
                self.finish(id, field_ty)
            }
            ExprKind::Set { object, name, value } => {
                let (object, name, value) = (*object, *name, *value);
                let field_ty = self.field_type(object, name)?;
                let value_ty = self.infer_expr(value)?;
                if !self.ast.type_same(field_ty, value_ty) {
                    let value_loc = self.ast.exprs[value].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Assigned value does not match field type.".into(),
                        ),
                        value_loc,
                    );
                }
                self.finish(id, field_ty)
            }
        }
    }

    fn infer_variable(&mut self, id: ExprId, name: Token) -> Result<TypeId, ()> {
        let text = name.text(self.source).into_owned();
        match self.env.resolve(&text) {
            Some(Binding::Local(var)) => {
                let ty = self.ast.var_decls[var].ty;
                self.set_resolution(id, roxyc_par::Resolution::Local(var));
                self.finish(id, ty)
            }
            Some(Binding::Function(decl)) => {
                let ty = self.fn_type_of(decl);
                self.set_resolution(id, roxyc_par::Resolution::Function(decl));
                self.finish(id, ty)
            }
            None => self.err(SemaErrorKind::UndefinedVariable, name.location()),
        }
    }

    fn infer_assign(&mut self, id: ExprId, name: Token, value: ExprId) -> Result<TypeId, ()> {
        let text = name.text(self.source).into_owned();
        match self.env.resolve(&text) {
            Some(Binding::Local(var)) => {
                let var_ty = self.ast.var_decls[var].ty;
                let value_ty = self.infer_expr(value)?;
                if !self.ast.type_same(var_ty, value_ty) {
                    let loc = self.ast.exprs[value].loc;
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Cannot assign '{}' to a variable of type '{}'.",
                            self.ast.type_name(value_ty, self.source),
                            self.ast.type_name(var_ty, self.source),
                        )),
                        loc,
                    );
                }
                if let ExprKind::Assign { origin, .. } = &mut self.ast.exprs[id].kind {
                    *origin = Some(var);
                }
                self.finish(id, var_ty)
            }
            Some(Binding::Function(_)) => self.err(
                SemaErrorKind::IncompatibleTypes("Cannot assign to a function.".into()),
                name.location(),
            ),
            None => self.err(SemaErrorKind::UndefinedVariable, name.location()),
        }
    }

    fn infer_unary(&mut self, id: ExprId, op: Token, right: ExprId) -> Result<TypeId, ()> {
        let right_ty = self.infer_expr(right)?;
        match op.kind {
            TokenKind::Minus => {
                if self.ast.is_numeric(right_ty) {
                    self.finish(id, right_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Operand of unary '-' must be numeric.".into(),
                        ),
                        op.location(),
                    )
                }
            }
            TokenKind::Bang => {
                if self.ast.is_bool(right_ty) {
                    self.finish(id, right_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(
                            "Operand of '!' must be a bool.".into(),
                        ),
                        op.location(),
                    )
                }
            }
            _ => self.err(SemaErrorKind::Misc("Unsupported unary operator.".into()), op.location()),
        }
    }

    fn infer_binary(
        &mut self,
        id: ExprId,
        op: Token,
        left: ExprId,
        right: ExprId,
    ) -> Result<TypeId, ()> {
        let left_ty = self.infer_expr(left)?;
        let right_ty = self.infer_expr(right)?;
        let op_text = op.text(self.source).into_owned();
        let loc = op.location();
        let bool_ty = self.ast.primitive(PrimKind::Bool);

        match op.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => {
                if !self.ast.type_same(left_ty, right_ty) {
                    return self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Operands of '{op_text}' must have the same type.",
                        )),
                        loc,
                    );
                }
                if self.ast.is_numeric(left_ty) {
                    // Remainder is integer-only; the others cover floats.
                    if op.kind == TokenKind::Percent
                        && !self.ast.prim_kind(left_ty).is_some_and(|k| k.is_integer())
                    {
                        return self.err(
                            SemaErrorKind::IncompatibleTypes(
                                "Operator '%' requires integer operands.".into(),
                            ),
                            loc,
                        );
                    }
                    self.finish(id, left_ty)
                } else if self.ast.is_string(left_ty) && op.kind == TokenKind::Plus {
                    // String '+' lowers to the concat native.
                    self.finish(id, left_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Operands of '{op_text}' must be numeric.",
                        )),
                        loc,
                    )
                }
            }
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                if self.ast.type_same(left_ty, right_ty) && self.ast.is_numeric(left_ty) {
                    self.finish(id, bool_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Operands of '{op_text}' must be the same numeric type.",
                        )),
                        loc,
                    )
                }
            }
            TokenKind::EqualEqual | TokenKind::BangEqual => {
                if self.ast.type_same(left_ty, right_ty) && !self.ast.is_void(left_ty) {
                    self.finish(id, bool_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Operands of '{op_text}' must have the same type.",
                        )),
                        loc,
                    )
                }
            }
            TokenKind::AmpAmp | TokenKind::BarBar => {
                if self.ast.is_bool(left_ty) && self.ast.is_bool(right_ty) {
                    self.finish(id, bool_ty)
                } else {
                    self.err(
                        SemaErrorKind::IncompatibleTypes(format!(
                            "Operands of '{op_text}' must be bools.",
                        )),
                        loc,
                    )
                }
            }
            _ => self.err(SemaErrorKind::Misc("Unsupported binary operator.".into()), loc),
        }
    }

    fn infer_call(&mut self, id: ExprId, callee: ExprId, args: Vec<ExprId>) -> Result<TypeId, ()> {
        let callee_loc = self.ast.exprs[callee].loc;

        // Only direct calls of named function symbols are supported; the
        // callee must resolve to a function declaration.
        let ExprKind::Variable { name, .. } = self.ast.exprs[callee].kind else {
            return self.err(
                SemaErrorKind::IncompatibleTypes("Can only call named functions.".into()),
                callee_loc,
            );
        };
        self.infer_expr(callee)?;
        let resolution = match self.ast.exprs[callee].kind {
            ExprKind::Variable { resolution, .. } => resolution,
            _ => None,
        };
        let Some(roxyc_par::Resolution::Function(decl)) = resolution else {
            return self.err(
                SemaErrorKind::IncompatibleTypes(format!(
                    "'{}' is not a function.",
                    name.text(self.source),
                )),
                callee_loc,
            );
        };

        let params = self.ast.fun_decls[decl].params.clone();
        if params.len() != args.len() {
            return self.err(
                SemaErrorKind::IncompatibleTypes(format!(
                    "Expected {} arguments but got {}.",
                    params.len(),
                    args.len(),
                )),
                self.ast.exprs[id].loc,
            );
        }
        for (&param, &arg) in params.iter().zip(&args) {
            let param_ty = self.ast.var_decls[param].ty;
            let arg_ty = self.infer_expr(arg)?;
            if !self.ast.type_same(param_ty, arg_ty) {
                let arg_loc = self.ast.exprs[arg].loc;
                return self.err(
                    SemaErrorKind::IncompatibleTypes(format!(
                        "Argument of type '{}' does not match parameter type '{}'.",
                        self.ast.type_name(arg_ty, self.source),
                        self.ast.type_name(param_ty, self.source),
                    )),
                    arg_loc,
                );
            }
        }

        let ret = self.ast.fun_decls[decl].ret;
        self.finish(id, ret)
    }

    /// Looks up a struct field's type for `Get`/`Set` expressions.
    fn field_type(&mut self, object: ExprId, name: Token) -> Result<TypeId, ()> {
        let object_ty = self.infer_expr(object)?;
        let fields = match &self.ast.types[object_ty] {
            Type::Struct(st) => st.fields.clone(),
            _ => {
                let loc = self.ast.exprs[object].loc;
                return self.err(
                    SemaErrorKind::IncompatibleTypes(
                        "Only struct values have fields.".into(),
                    ),
                    loc,
                );
            }
        };
        let name_text = name.lexeme(self.source).to_vec();
        for field in fields {
            if self.ast.var_decls[field].name.lexeme(self.source) == name_text.as_slice() {
                return Ok(self.ast.var_decls[field].ty);
            }
        }
        self.err(
            SemaErrorKind::Misc(format!("No field '{}' on struct.", name.text(self.source))),
            name.location(),
        )
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn finish(&mut self, id: ExprId, ty: TypeId) -> Result<TypeId, ()> {
        self.ast.exprs[id].ty = Some(ty);
        Ok(ty)
    }

    fn set_resolution(&mut self, id: ExprId, resolution: roxyc_par::Resolution) {
        if let ExprKind::Variable { resolution: slot, .. } = &mut self.ast.exprs[id].kind {
            *slot = Some(resolution);
        }
    }

    fn error(&mut self, kind: SemaErrorKind, loc: SourceLocation) {
        self.errors.push(SemaError { kind, loc });
    }

    fn err<T>(&mut self, kind: SemaErrorKind, loc: SourceLocation) -> Result<T, ()> {
        self.error(kind, loc);
        Err(())
    }

    /// Resolves named type references against the structs declared so far.
    fn resolve_type(&mut self, ty: TypeId) -> Result<TypeId, ()> {
        match &self.ast.types[ty] {
            Type::Unassigned(token) => {
                let token = *token;
                let name = token.text(self.source).into_owned();
                match self.struct_types.get(&name) {
                    Some(&resolved) => Ok(resolved),
                    None => {
                        self.err(SemaErrorKind::Misc(format!("Unknown type '{name}'.")), token.location())
                    }
                }
            }
            _ => Ok(ty),
        }
    }

    /// The `Type::Function` node for a declaration, built on first use.
    fn fn_type_of(&mut self, decl: FunDeclId) -> TypeId {
        if let Some(&ty) = self.fn_types.get(&decl) {
            return ty;
        }
        let params = self.ast.fun_decls[decl]
            .params
            .iter()
            .map(|&p| self.ast.var_decls[p].ty)
            .collect();
        let ret = self.ast.fun_decls[decl].ret;
        let ty = self.ast.types.alloc(Type::Function(FunctionType { ret, params }));
        self.fn_types.insert(decl, ty);
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxyc_par::{Parser, Resolution};
    use roxyc_util::{Handler, ModuleId};

    /// Parses and typechecks one module with an empty import map.
    fn analyze(source: &str) -> (Ast, StmtId, Analysis) {
        let mut ast = Ast::new();
        let handler = Handler::new();
        let parsed = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler).parse_module();
        assert!(!handler.has_errors(), "unexpected parse errors in {source:?}");
        scan_exports(&mut ast, parsed.root);
        let analysis =
            SemaAnalyzer::new(&mut ast, source.as_bytes()).typecheck(parsed.root, &ImportMap::new());
        (ast, parsed.root, analysis)
    }

    fn assert_clean(analysis: &Analysis) {
        assert!(
            analysis.errors.is_empty(),
            "unexpected sema errors: {:?}",
            analysis.errors
        );
    }

    #[test]
    fn test_local_inference() {
        let (ast, _, analysis) = analyze("var a = 2; var b = a + 1;");
        assert_clean(&analysis);
        // Every expression received a type and every variable a resolution.
        for (_, expr) in ast.exprs.iter() {
            assert!(expr.ty.is_some(), "untyped expr {expr:?}");
            if let ExprKind::Variable { resolution, .. } = &expr.kind {
                assert!(resolution.is_some());
            }
        }
    }

    #[test]
    fn test_no_unresolved_types_remain() {
        let (ast, root, analysis) = analyze(
            "struct Pair { a: i32; b: i32; }\nfun id(x: i32): i32 { return x; }\nvar v = id(3);",
        );
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        for &var in &m.locals {
            let ty = ast.var_decls[var].ty;
            assert!(!matches!(ast.types[ty], Type::Unassigned(_) | Type::Inferred));
        }
    }

    #[test]
    fn test_local_indices_in_source_order() {
        let (ast, root, analysis) =
            analyze("fun f(p: i32, q: i32): i32 { var a = 1; var b = 2; return p; }");
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        let Stmt::Function(f) = &ast.stmts[m.statements[0]] else { panic!() };
        assert_eq!(f.locals.len(), 4);
        for (i, &local) in f.locals.iter().enumerate() {
            assert_eq!(ast.var_decls[local].local_index, Some(i as u32));
        }
    }

    #[test]
    fn test_undefined_variable() {
        let (_, _, analysis) = analyze("var a = missing;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::UndefinedVariable));
    }

    #[test]
    fn test_cannot_infer_type() {
        let (_, _, analysis) = analyze("var a;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::CannotInferType));
    }

    #[test]
    fn test_incompatible_initializer() {
        let (_, _, analysis) = analyze("var a: i64 = 2;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("var a: i64 = 2l;");
        assert_clean(&analysis);
    }

    #[test]
    fn test_mixed_arithmetic_rejected() {
        let (_, _, analysis) = analyze("var a: i32 = 1; var b: i64 = 2l; var c = a + b;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
    }

    #[test]
    fn test_float_remainder_rejected() {
        let (_, _, analysis) = analyze("var a = 1.0 % 2.0;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
    }

    #[test]
    fn test_string_concat_types_as_string() {
        let (ast, root, analysis) = analyze("var s = \"a\" + \"b\";");
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        assert!(ast.is_string(ast.var_decls[m.locals[0]].ty));
    }

    #[test]
    fn test_logical_operators_require_bool() {
        let (_, _, analysis) = analyze("var a = 1 && true;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("var a = true && false || true;");
        assert_clean(&analysis);
    }

    #[test]
    fn test_comparison_yields_bool() {
        let (ast, root, analysis) = analyze("var a = 1 < 2;");
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        assert!(ast.is_bool(ast.var_decls[m.locals[0]].ty));
    }

    #[test]
    fn test_ternary_branches_must_match() {
        let (_, _, analysis) = analyze("var a = true ? 1 : 2.0;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("var a = true ? 1 : 2;");
        assert_clean(&analysis);
    }

    #[test]
    fn test_call_arity_and_types() {
        let (_, _, analysis) = analyze("fun f(x: i32): i32 { return x; } var a = f();");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("fun f(x: i32): i32 { return x; } var a = f(true);");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("fun f(x: i32): i32 { return x; } var a = f(41);");
        assert_clean(&analysis);
    }

    #[test]
    fn test_return_type_checked() {
        let (_, _, analysis) = analyze("fun f(): i32 { return true; }");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("fun f(): i32 { return; }");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("fun f() { return; }");
        assert_clean(&analysis);
    }

    #[test]
    fn test_condition_must_be_bool() {
        let (_, _, analysis) = analyze("if (1) {}");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
        let (_, _, analysis) = analyze("while (0) {}");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::IncompatibleTypes(_)));
    }

    #[test]
    fn test_scoping_drops_inner_locals() {
        let (_, _, analysis) = analyze("{ var inner = 1; } var a = inner;");
        assert!(matches!(analysis.errors[0].kind, SemaErrorKind::UndefinedVariable));
    }

    #[test]
    fn test_errors_are_collected_not_short_circuited() {
        let (_, _, analysis) = analyze("var a = missing1; var b = missing2;");
        assert_eq!(analysis.errors.len(), 2);
    }

    #[test]
    fn test_exports_scan() {
        let source = "pub fun visible() {}\nfun hidden() {}\npub native fun n(): i32;";
        let mut ast = Ast::new();
        let handler = Handler::new();
        let parsed = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler).parse_module();
        scan_exports(&mut ast, parsed.root);
        let Stmt::Module(m) = &ast.stmts[parsed.root] else { panic!() };
        assert_eq!(m.exports.len(), 2);
    }

    #[test]
    fn test_import_map_symbols_are_visible_and_ordered() {
        // Build a fake "builtin" declaration in the shared arena, then
        // check a module that calls it through the import map.
        let mut ast = Ast::new();
        let handler = Handler::new();

        let builtin_src = b"pub native fun print_i32(value: i32);";
        let builtin =
            Parser::new(builtin_src, ModuleId(0), &mut ast, &handler).parse_module();
        scan_exports(&mut ast, builtin.root);
        let Stmt::Module(m) = &ast.stmts[builtin.root] else { panic!() };
        let decl = m.exports[0];
        // The import map uses the builtin module's source for names, but
        // the analyzer below runs over the importing module's source; the
        // map key is the already-rendered name.
        let mut import_map = ImportMap::new();
        import_map.insert("print_i32".to_string(), decl);

        let main_src = b"print_i32(42);";
        let parsed = Parser::new(main_src, ModuleId(1), &mut ast, &handler).parse_module();
        assert!(!handler.has_errors());
        let analysis = SemaAnalyzer::new(&mut ast, main_src).typecheck(parsed.root, &import_map);
        assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
        assert_eq!(analysis.symbols.natives, vec![decl]);
        assert_eq!(analysis.symbols.index_of(decl), Some(SymbolIndex::Native(0)));
    }

    #[test]
    fn test_variable_resolves_to_function_decl() {
        let (ast, root, analysis) = analyze("fun f() {}\nf();");
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        let Stmt::Expression { expr } = ast.stmts[m.statements[1]] else { panic!() };
        let ExprKind::Call { callee, .. } = ast.exprs[expr].kind else { panic!() };
        let ExprKind::Variable { resolution, .. } = ast.exprs[callee].kind else { panic!() };
        assert!(matches!(resolution, Some(Resolution::Function(_))));
    }

    #[test]
    fn test_discarded_string_result_gets_scratch_local() {
        let (ast, root, analysis) = analyze("\"a\" + \"b\";");
        assert_clean(&analysis);
        let Stmt::Module(m) = &ast.stmts[root] else { panic!() };
        assert_eq!(m.locals.len(), 1);
        assert!(ast.is_string(ast.var_decls[m.locals[0]].ty));
    }
}
