//! The bytecode compiler.
//!
//! Walks the typed AST produced by semantic analysis and emits
//! size-specialized, typed instructions into chunks. One [`ChunkCtx`]
//! (chunk plus frame layout) exists per function being compiled; function
//! statements open a nested context and attach the finished chunk to the
//! module's function table slot that the analyzer assigned.
//!
//! Forward jumps are emitted as a long-form opcode followed by a
//! placeholder 4-byte offset, recorded, and patched with
//! `target - (operand_pos + 4)` once the target is known; every jump is
//! patched before its enclosing statement finishes. Backward jumps use
//! `loop`, whose operand counts back from the end of the instruction.
//!
//! Constructs without a designed lowering (struct and function-pointer
//! load/store, `break`/`continue`, field access, string equality) fail
//! with [`CompileError::Unimplemented`] rather than emitting wrong code.

use crate::local_env::FnLocalEnv;
use crate::{CompileError, CompileResult};
use roxyc_bc::{
    arith_opcode, flag_branch, float_cmp, int_cmp_branch, ArithOp, Chunk, CmpOp, Module, OpCode,
};
use roxyc_lex::{LineMap, TokenKind};
use roxyc_par::{Ast, ExprId, ExprKind, Literal, Resolution, Stmt, StmtId, Type, VarDeclId};
use roxyc_runtime::StringInterner;
use roxyc_sem::{ModuleSymbols, SymbolIndex};
use roxyc_util::PrimKind;
use std::rc::Rc;

/// Width family of a primitive on the operand stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotFamily {
    /// One slot: bool, sub-word and 32-bit integers, f32.
    Single,
    /// Two slots: 64-bit integers and f64.
    Wide,
    /// Two slots holding a reference-counted pointer.
    Reference,
}

fn family_of(prim: PrimKind) -> Option<SlotFamily> {
    match prim {
        PrimKind::Void => None,
        PrimKind::String => Some(SlotFamily::Reference),
        PrimKind::U64 | PrimKind::I64 | PrimKind::F64 => Some(SlotFamily::Wide),
        _ => Some(SlotFamily::Single),
    }
}

/// The chunk being emitted plus its frame layout.
struct ChunkCtx {
    chunk: Chunk,
    env: FnLocalEnv,
    locals: Vec<VarDeclId>,
}

pub struct Compiler<'a> {
    ast: &'a Ast,
    source: &'a [u8],
    line_map: &'a LineMap,
    symbols: &'a ModuleSymbols,
    interner: &'a mut StringInterner,
    module: &'a mut Module,
}

impl<'a> Compiler<'a> {
    pub fn new(
        ast: &'a Ast,
        source: &'a [u8],
        line_map: &'a LineMap,
        symbols: &'a ModuleSymbols,
        interner: &'a mut StringInterner,
        module: &'a mut Module,
    ) -> Self {
        Self { ast, source, line_map, symbols, interner, module }
    }

    /// Compiles a module's top level and every function in it. The
    /// module's function table entries must already exist; this fills in
    /// their chunks.
    pub fn compile(mut self, root: StmtId) -> CompileResult<()> {
        let (statements, locals) = match &self.ast.stmts[root] {
            Stmt::Module(m) => (m.statements.clone(), m.locals.clone()),
            _ => return Err(CompileError::Unreachable("module root is not a module statement")),
        };

        let env = FnLocalEnv::new(self.ast, self.source, &locals, 0);
        let mut ctx = ChunkCtx {
            chunk: Chunk::new(self.module.name.clone(), self.module.id),
            env,
            locals,
        };
        for stmt in statements {
            self.stmt(&mut ctx, stmt)?;
        }
        ctx.chunk.write_op(OpCode::Ret, Chunk::NO_LINE);

        let (table, param_slots) = ctx.env.into_table();
        ctx.chunk.local_table = table;
        ctx.chunk.param_slots = param_slots;
        self.module.chunk = Some(Rc::new(ctx.chunk));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn stmt(&mut self, ctx: &mut ChunkCtx, id: StmtId) -> CompileResult<()> {
        match &self.ast.stmts[id] {
            Stmt::Error => Err(CompileError::Unreachable("error statement survived parsing")),
            Stmt::Module(_) => Err(CompileError::Unreachable("nested module statement")),
            Stmt::Import(_) | Stmt::Struct { .. } => Ok(()),
            Stmt::Block { statements } => {
                let statements = statements.clone();
                for stmt in statements {
                    self.stmt(ctx, stmt)?;
                }
                Ok(())
            }
            Stmt::Expression { expr } => {
                let expr = *expr;
                self.expr_discard(ctx, expr)
            }
            Stmt::Function(f) => {
                let decl = f.decl;
                let body = f.body.clone();
                let locals = f.locals.clone();
                self.function(decl, body, locals)
            }
            Stmt::If { condition, then_branch, else_branch } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);
                let cond_line = self.line_of_expr(condition);

                let then_jump = self.branch_on_false(ctx, condition)?;
                self.stmt(ctx, then_branch)?;
                let else_jump = self.emit_jump(ctx, OpCode::Jmp, cond_line);
                self.patch_jump(ctx, then_jump)?;
                if let Some(else_branch) = else_branch {
                    self.stmt(ctx, else_branch)?;
                }
                self.patch_jump(ctx, else_jump)?;
                Ok(())
            }
            Stmt::Var { var, initializer } => {
                let (var, initializer) = (*var, *initializer);
                self.var_stmt(ctx, var, initializer)
            }
            Stmt::While { condition, body } => {
                let (condition, body) = (*condition, *body);
                let cond_line = self.line_of_expr(condition);

                let loop_start = ctx.chunk.len();
                let exit_jump = self.branch_on_false(ctx, condition)?;
                self.stmt(ctx, body)?;
                self.emit_loop(ctx, loop_start, cond_line);
                self.patch_jump(ctx, exit_jump)?;
                Ok(())
            }
            Stmt::Return { keyword, expr } => {
                let (keyword, expr) = (*keyword, *expr);
                let line = self.line_map.line_of(keyword.offset);
                match expr {
                    Some(expr) => {
                        self.expr(ctx, expr)?;
                        let prim = self.prim_of(expr)?;
                        let op = match family_of(prim) {
                            None => OpCode::Ret,
                            Some(SlotFamily::Single) => OpCode::Iret,
                            Some(SlotFamily::Wide) => OpCode::Lret,
                            Some(SlotFamily::Reference) => OpCode::Rret,
                        };
                        ctx.chunk.write_op(op, line);
                    }
                    None => ctx.chunk.write_op(OpCode::Ret, line),
                }
                Ok(())
            }
            Stmt::Break { .. } => Err(CompileError::Unimplemented("'break' statements")),
            Stmt::Continue { .. } => Err(CompileError::Unimplemented("'continue' statements")),
        }
    }

    fn function(
        &mut self,
        decl: roxyc_par::FunDeclId,
        body: Vec<StmtId>,
        locals: Vec<VarDeclId>,
    ) -> CompileResult<()> {
        let fun = &self.ast.fun_decls[decl];
        if fun.is_native {
            // Declaration only; the link step supplies the trampoline.
            return Ok(());
        }
        let name = fun.name.text(self.source).into_owned();
        let param_count = fun.params.len();

        let env = FnLocalEnv::new(self.ast, self.source, &locals, param_count);
        let mut ctx =
            ChunkCtx { chunk: Chunk::new(name, self.module.id), env, locals };
        for stmt in body {
            self.stmt(&mut ctx, stmt)?;
        }
        // Fallthrough return for void functions; dead code otherwise.
        ctx.chunk.write_op(OpCode::Ret, Chunk::NO_LINE);

        let (table, param_slots) = ctx.env.into_table();
        ctx.chunk.local_table = table;
        ctx.chunk.param_slots = param_slots;

        let Some(SymbolIndex::Function(index)) = self.symbols.index_of(decl) else {
            return Err(CompileError::Unreachable("function missing from symbol table"));
        };
        let Some(entry) = self.module.functions.get_mut(index as usize) else {
            return Err(CompileError::Unreachable("function table slot missing"));
        };
        entry.chunk = Some(Rc::new(ctx.chunk));
        Ok(())
    }

    fn var_stmt(
        &mut self,
        ctx: &mut ChunkCtx,
        var: VarDeclId,
        initializer: Option<ExprId>,
    ) -> CompileResult<()> {
        let decl = &self.ast.var_decls[var];
        let line = self.line_map.line_of(decl.name.offset);
        let ty = decl.ty;
        let Some(local_index) = decl.local_index else {
            return Err(CompileError::Unreachable("local without an index"));
        };

        let prim = match &self.ast.types[ty] {
            Type::Primitive(prim) => *prim,
            Type::Struct(_) => {
                return Err(CompileError::Unimplemented("struct locals"));
            }
            Type::Function(_) => {
                return Err(CompileError::Unimplemented("function-pointer locals"));
            }
            _ => return Err(CompileError::Other("cannot compile an unresolved type".into())),
        };

        match initializer {
            Some(init) => self.expr(ctx, init)?,
            None => self.push_zero(ctx, prim, line)?,
        }

        let offset = ctx.env.offset_of(local_index);
        self.emit_store(ctx, prim, offset, line)
    }

    /// Pushes the zero value of a primitive (the implicit initializer).
    fn push_zero(&mut self, ctx: &mut ChunkCtx, prim: PrimKind, line: u32) -> CompileResult<()> {
        match prim {
            PrimKind::Void => Err(CompileError::Unreachable("void local")),
            PrimKind::String => {
                ctx.chunk.write_op(OpCode::IconstNil, line);
                Ok(())
            }
            PrimKind::U64 | PrimKind::I64 => {
                ctx.chunk.write_op(OpCode::Lconst, line);
                ctx.chunk.write_u64(0);
                Ok(())
            }
            PrimKind::F32 => {
                ctx.chunk.write_op(OpCode::Fconst, line);
                ctx.chunk.write_u32(0);
                Ok(())
            }
            PrimKind::F64 => {
                ctx.chunk.write_op(OpCode::Dconst, line);
                ctx.chunk.write_u64(0);
                Ok(())
            }
            _ => {
                ctx.chunk.write_op(OpCode::Iconst0, line);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Emits an expression for its value.
    fn expr(&mut self, ctx: &mut ChunkCtx, id: ExprId) -> CompileResult<()> {
        let line = self.line_of_expr(id);
        match &self.ast.exprs[id].kind {
            ExprKind::Error => Err(CompileError::Unreachable("error expression survived parsing")),
            ExprKind::Grouping { expr } => {
                let expr = *expr;
                self.expr(ctx, expr)
            }
            ExprKind::Literal(lit) => {
                let lit = *lit;
                self.literal(ctx, lit, line)
            }
            ExprKind::Variable { resolution, .. } => {
                let resolution = *resolution;
                match resolution {
                    Some(Resolution::Local(var)) => {
                        let decl = &self.ast.var_decls[var];
                        let prim = self
                            .ast
                            .prim_kind(decl.ty)
                            .ok_or(CompileError::Unimplemented("struct loads"))?;
                        let Some(index) = decl.local_index else {
                            return Err(CompileError::Unreachable("local without an index"));
                        };
                        let offset = ctx.env.offset_of(index);
                        self.emit_load(ctx, prim, offset, line)
                    }
                    Some(Resolution::Function(_)) => {
                        Err(CompileError::Unimplemented("function-pointer loads"))
                    }
                    None => Err(CompileError::Unreachable("unresolved variable reference")),
                }
            }
            ExprKind::Assign { value, origin, .. } => {
                let (value, origin) = (*value, *origin);
                self.assign(ctx, value, origin, line, false)
            }
            ExprKind::Unary { op, right } => {
                let (op, right) = (*op, *right);
                match op.kind {
                    TokenKind::Minus => self.negate(ctx, id, right, line),
                    TokenKind::Bang => {
                        self.expr(ctx, right)?;
                        self.branch_push_bool(ctx, OpCode::BrTrue, false, line)
                    }
                    _ => Err(CompileError::Unreachable("unknown unary operator")),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.binary(ctx, id, op.kind, left, right, line)
            }
            ExprKind::Ternary { cond, left, right } => {
                let (cond, left, right) = (*cond, *left, *right);
                let else_jump = self.branch_on_false(ctx, cond)?;
                self.expr(ctx, left)?;
                let end_jump = self.emit_jump(ctx, OpCode::Jmp, line);
                self.patch_jump(ctx, else_jump)?;
                self.expr(ctx, right)?;
                self.patch_jump(ctx, end_jump)
            }
            ExprKind::Call { callee, args, .. } => {
                let (callee, args) = (*callee, args.clone());
                self.call(ctx, callee, &args, line)
            }
            ExprKind::Get { .. } | ExprKind::Set { .. } => {
                Err(CompileError::Unimplemented("struct field access"))
            }
        }
    }

    /// Emits an expression in statement position, leaving the stack as it
    /// was: assignments skip the reload, other results are popped, and
    /// discarded references go through the scratch reference slot so the
    /// frame-exit decrement covers them.
    fn expr_discard(&mut self, ctx: &mut ChunkCtx, id: ExprId) -> CompileResult<()> {
        let line = self.line_of_expr(id);
        if let ExprKind::Assign { value, origin, .. } = &self.ast.exprs[id].kind {
            let (value, origin) = (*value, *origin);
            return self.assign(ctx, value, origin, line, true);
        }

        self.expr(ctx, id)?;
        let prim = self.prim_of(id)?;
        match family_of(prim) {
            None => Ok(()),
            Some(SlotFamily::Single) => {
                ctx.chunk.write_op(OpCode::Pop, line);
                Ok(())
            }
            Some(SlotFamily::Wide) => {
                ctx.chunk.write_op(OpCode::Pop, line);
                ctx.chunk.write_op(OpCode::Pop, line);
                Ok(())
            }
            Some(SlotFamily::Reference) => {
                let offset = self.scratch_ref_offset(ctx)?;
                self.emit_store(ctx, PrimKind::String, offset, line)
            }
        }
    }

    fn assign(
        &mut self,
        ctx: &mut ChunkCtx,
        value: ExprId,
        origin: Option<VarDeclId>,
        line: u32,
        as_stmt: bool,
    ) -> CompileResult<()> {
        let Some(origin) = origin else {
            return Err(CompileError::Unreachable("unresolved assignment target"));
        };
        let decl = &self.ast.var_decls[origin];
        let prim =
            self.ast.prim_kind(decl.ty).ok_or(CompileError::Unimplemented("struct stores"))?;
        let Some(index) = decl.local_index else {
            return Err(CompileError::Unreachable("local without an index"));
        };
        let offset = ctx.env.offset_of(index);

        self.expr(ctx, value)?;
        self.emit_store(ctx, prim, offset, line)?;
        if !as_stmt {
            // An assignment used as a value reloads the stored local.
            self.emit_load(ctx, prim, offset, line)?;
        }
        Ok(())
    }

    fn literal(&mut self, ctx: &mut ChunkCtx, lit: Literal, line: u32) -> CompileResult<()> {
        match lit {
            Literal::Nil => {
                ctx.chunk.write_op(OpCode::IconstNil, line);
                Ok(())
            }
            Literal::Bool(value) => {
                ctx.chunk.write_op(if value { OpCode::Iconst1 } else { OpCode::Iconst0 }, line);
                Ok(())
            }
            Literal::Int { kind, bits } => match kind {
                PrimKind::I64 | PrimKind::U64 => {
                    ctx.chunk.write_op(OpCode::Lconst, line);
                    ctx.chunk.write_u64(bits);
                    Ok(())
                }
                _ => {
                    self.push_small_int(ctx, bits as u32, line);
                    Ok(())
                }
            },
            Literal::Float { kind, bits } => {
                if kind == PrimKind::F32 {
                    ctx.chunk.write_op(OpCode::Fconst, line);
                    ctx.chunk.write_u32(bits as u32);
                } else {
                    ctx.chunk.write_op(OpCode::Dconst, line);
                    ctx.chunk.write_u64(bits);
                }
                Ok(())
            }
            Literal::Str(token) => {
                let lexeme = token.lexeme(self.source);
                // Strip the surrounding quotes; no escape processing.
                let contents = &lexeme[1..lexeme.len() - 1];
                let string = self.interner.intern(contents);
                let index = self.module.add_string(string);
                ctx.chunk.write_op(OpCode::Ldstr, line);
                ctx.chunk.write_u32(index);
                Ok(())
            }
        }
    }

    /// The narrowest one-slot integer constant encoding.
    fn push_small_int(&mut self, ctx: &mut ChunkCtx, value: u32, line: u32) {
        if value <= 8 {
            let op = OpCode::from_byte(OpCode::Iconst0 as u8 + value as u8).unwrap();
            ctx.chunk.write_op(op, line);
        } else if value < 256 {
            ctx.chunk.write_op(OpCode::IconstS, line);
            ctx.chunk.write_byte(value as u8, Chunk::NO_LINE);
        } else {
            ctx.chunk.write_op(OpCode::Iconst, line);
            ctx.chunk.write_u32(value);
        }
    }

    /// Unary minus: push a typed zero, the operand, then subtract.
    fn negate(
        &mut self,
        ctx: &mut ChunkCtx,
        id: ExprId,
        right: ExprId,
        line: u32,
    ) -> CompileResult<()> {
        let prim = self.prim_of(id)?;
        match family_of(prim) {
            Some(SlotFamily::Single) => {
                if prim == PrimKind::F32 {
                    ctx.chunk.write_op(OpCode::Fconst, line);
                    ctx.chunk.write_u32(0);
                    self.expr(ctx, right)?;
                    ctx.chunk.write_op(OpCode::Fsub, line);
                } else {
                    ctx.chunk.write_op(OpCode::Iconst0, line);
                    self.expr(ctx, right)?;
                    ctx.chunk.write_op(OpCode::Isub, line);
                }
                Ok(())
            }
            Some(SlotFamily::Wide) => {
                if prim == PrimKind::F64 {
                    ctx.chunk.write_op(OpCode::Dconst, line);
                    ctx.chunk.write_u64(0);
                    self.expr(ctx, right)?;
                    ctx.chunk.write_op(OpCode::Dsub, line);
                } else {
                    ctx.chunk.write_op(OpCode::Lconst, line);
                    ctx.chunk.write_u64(0);
                    self.expr(ctx, right)?;
                    ctx.chunk.write_op(OpCode::Lsub, line);
                }
                Ok(())
            }
            _ => Err(CompileError::Unreachable("negation of a non-numeric type")),
        }
    }

    fn binary(
        &mut self,
        ctx: &mut ChunkCtx,
        id: ExprId,
        op: TokenKind,
        left: ExprId,
        right: ExprId,
        line: u32,
    ) -> CompileResult<()> {
        match op {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => {
                let prim = self.prim_of(id)?;
                self.expr(ctx, left)?;
                self.expr(ctx, right)?;
                if prim == PrimKind::String {
                    // String '+' is a concat call.
                    let Some(SymbolIndex::Native(index)) = self.symbols.lookup_name("concat")
                    else {
                        return Err(CompileError::Unreachable("concat native not in scope"));
                    };
                    ctx.chunk.write_op(OpCode::CallNative, line);
                    ctx.chunk.write_u16(index);
                    return Ok(());
                }
                let arith = match op {
                    TokenKind::Plus => ArithOp::Add,
                    TokenKind::Minus => ArithOp::Sub,
                    TokenKind::Star => ArithOp::Mul,
                    TokenKind::Slash => ArithOp::Div,
                    _ => ArithOp::Rem,
                };
                let Some(opcode) = arith_opcode(prim, arith) else {
                    return Err(CompileError::Unreachable("arithmetic on a non-numeric type"));
                };
                ctx.chunk.write_op(opcode, line);
                Ok(())
            }
            TokenKind::AmpAmp => {
                // Short-circuit: a false left operand skips the right.
                self.expr(ctx, left)?;
                let false_jump = self.emit_jump(ctx, OpCode::BrFalse, line);
                self.expr(ctx, right)?;
                let end_jump = self.emit_jump(ctx, OpCode::Jmp, line);
                self.patch_jump(ctx, false_jump)?;
                ctx.chunk.write_op(OpCode::Iconst0, line);
                self.patch_jump(ctx, end_jump)
            }
            TokenKind::BarBar => {
                self.expr(ctx, left)?;
                let true_jump = self.emit_jump(ctx, OpCode::BrTrue, line);
                self.expr(ctx, right)?;
                let end_jump = self.emit_jump(ctx, OpCode::Jmp, line);
                self.patch_jump(ctx, true_jump)?;
                ctx.chunk.write_op(OpCode::Iconst1, line);
                self.patch_jump(ctx, end_jump)
            }
            TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let cmp = cmp_of(op);
                let prim = self.prim_of(left)?;
                if prim == PrimKind::String {
                    return Err(CompileError::Unimplemented("string equality"));
                }
                self.expr(ctx, left)?;
                self.expr(ctx, right)?;
                let branch = self.comparison_branch(ctx, prim, cmp, line)?;
                self.branch_push_bool(ctx, branch, true, line)
            }
            _ => Err(CompileError::Unreachable("unknown binary operator")),
        }
    }

    /// Emits the compare stage of a comparison whose operands are already
    /// on the stack, returning the branch opcode that jumps when the
    /// comparison holds.
    fn comparison_branch(
        &mut self,
        ctx: &mut ChunkCtx,
        prim: PrimKind,
        cmp: CmpOp,
        line: u32,
    ) -> CompileResult<OpCode> {
        match family_of(prim) {
            Some(SlotFamily::Single) if prim != PrimKind::F32 => Ok(int_cmp_branch(cmp, false)),
            Some(SlotFamily::Wide) if prim != PrimKind::F64 => {
                ctx.chunk.write_op(OpCode::Lcmp, line);
                Ok(flag_branch(cmp, false))
            }
            Some(_) if prim.is_float() => {
                // The variant's NaN result must fail the comparison.
                let greater = matches!(cmp, CmpOp::Lt | CmpOp::Le);
                let Some(fcmp) = float_cmp(prim, greater) else {
                    return Err(CompileError::Unreachable("float compare on non-float"));
                };
                ctx.chunk.write_op(fcmp, line);
                Ok(flag_branch(cmp, false))
            }
            _ => Err(CompileError::Unreachable("comparison on an unsupported type")),
        }
    }

    /// Materializes a branch into a 0/1 value: `branch` jumps to the
    /// `taken_value` push, fallthrough pushes the other value.
    fn branch_push_bool(
        &mut self,
        ctx: &mut ChunkCtx,
        branch: OpCode,
        taken_value: bool,
        line: u32,
    ) -> CompileResult<()> {
        let taken_jump = self.emit_jump(ctx, branch, line);
        ctx.chunk
            .write_op(if taken_value { OpCode::Iconst0 } else { OpCode::Iconst1 }, line);
        let end_jump = self.emit_jump(ctx, OpCode::Jmp, line);
        self.patch_jump(ctx, taken_jump)?;
        ctx.chunk
            .write_op(if taken_value { OpCode::Iconst1 } else { OpCode::Iconst0 }, line);
        self.patch_jump(ctx, end_jump)
    }

    fn call(
        &mut self,
        ctx: &mut ChunkCtx,
        callee: ExprId,
        args: &[ExprId],
        line: u32,
    ) -> CompileResult<()> {
        let ExprKind::Variable { resolution: Some(Resolution::Function(decl)), .. } =
            self.ast.exprs[callee].kind
        else {
            return Err(CompileError::Unimplemented("calls through function pointers"));
        };
        for &arg in args {
            self.expr(ctx, arg)?;
        }
        match self.symbols.index_of(decl) {
            Some(SymbolIndex::Function(index)) => {
                ctx.chunk.write_op(OpCode::Call, line);
                ctx.chunk.write_u16(index);
                Ok(())
            }
            Some(SymbolIndex::Native(index)) => {
                ctx.chunk.write_op(OpCode::CallNative, line);
                ctx.chunk.write_u16(index);
                Ok(())
            }
            None => Err(CompileError::Unreachable("callee missing from symbol table")),
        }
    }

    // ------------------------------------------------------------------
    // Condition lowering
    // ------------------------------------------------------------------

    /// Lowers a condition into a branch taken when the condition is
    /// false, returning the patch position. Recognizes `!x` and
    /// `a cmp b` patterns, choosing the opposite-sense comparison so the
    /// jump semantics stay uniform; everything else evaluates the
    /// condition and branches on the value.
    fn branch_on_false(&mut self, ctx: &mut ChunkCtx, cond: ExprId) -> CompileResult<usize> {
        let line = self.line_of_expr(cond);
        match &self.ast.exprs[cond].kind {
            ExprKind::Grouping { expr } => {
                let expr = *expr;
                self.branch_on_false(ctx, expr)
            }
            ExprKind::Unary { op, right } if op.kind == TokenKind::Bang => {
                let right = *right;
                self.expr(ctx, right)?;
                Ok(self.emit_jump(ctx, OpCode::BrTrue, line))
            }
            ExprKind::Binary { op, left, right } if is_comparison(op.kind) => {
                let (op, left, right) = (op.kind, *left, *right);
                let prim = self.prim_of(left)?;
                if prim == PrimKind::String {
                    return Err(CompileError::Unimplemented("string equality"));
                }
                self.expr(ctx, left)?;
                self.expr(ctx, right)?;
                // Branch when the comparison does NOT hold.
                let opposite = cmp_of(op).opposite();
                match family_of(prim) {
                    Some(SlotFamily::Single) if prim != PrimKind::F32 => {
                        Ok(self.emit_jump(ctx, int_cmp_branch(opposite, false), line))
                    }
                    Some(SlotFamily::Wide) if prim != PrimKind::F64 => {
                        ctx.chunk.write_op(OpCode::Lcmp, line);
                        Ok(self.emit_jump(ctx, flag_branch(opposite, false), line))
                    }
                    Some(_) if prim.is_float() => {
                        // NaN must take the false branch: pick the variant
                        // whose NaN flag satisfies the opposite comparison.
                        let greater = matches!(cmp_of(op), CmpOp::Lt | CmpOp::Le | CmpOp::Eq);
                        let Some(fcmp) = float_cmp(prim, greater) else {
                            return Err(CompileError::Unreachable("float compare on non-float"));
                        };
                        ctx.chunk.write_op(fcmp, line);
                        Ok(self.emit_jump(ctx, flag_branch(opposite, false), line))
                    }
                    _ => Err(CompileError::Unreachable("comparison on an unsupported type")),
                }
            }
            _ => {
                self.expr(ctx, cond)?;
                Ok(self.emit_jump(ctx, OpCode::BrFalse, line))
            }
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    /// Emits a forward jump with a placeholder offset; returns the
    /// position to patch.
    fn emit_jump(&mut self, ctx: &mut ChunkCtx, op: OpCode, line: u32) -> usize {
        ctx.chunk.write_op(op, line);
        let at = ctx.chunk.len();
        ctx.chunk.write_u32(0xFFFF_FFFF);
        at
    }

    /// Patches a forward jump to land at the current end of the chunk.
    fn patch_jump(&mut self, ctx: &mut ChunkCtx, at: usize) -> CompileResult<()> {
        let jump = ctx.chunk.len() - at - 4;
        if jump > i32::MAX as usize {
            return Err(CompileError::Other("jump distance exceeds the offset range".into()));
        }
        ctx.chunk.patch_u32(at, jump as u32);
        Ok(())
    }

    /// Emits a backward jump to `loop_start`.
    fn emit_loop(&mut self, ctx: &mut ChunkCtx, loop_start: usize, line: u32) {
        ctx.chunk.write_op(OpCode::Loop, line);
        let offset = ctx.chunk.len() - loop_start + 4;
        ctx.chunk.write_u32(offset as u32);
    }

    /// Emits the load for a local: family by type, encoding by offset.
    /// Two-slot operands count in 8-byte units.
    fn emit_load(
        &mut self,
        ctx: &mut ChunkCtx,
        prim: PrimKind,
        slot: u16,
        line: u32,
    ) -> CompileResult<()> {
        let (fast, short, long, operand) = match family_of(prim) {
            Some(SlotFamily::Single) => (OpCode::Iload0, OpCode::IloadS, OpCode::Iload, slot),
            Some(SlotFamily::Wide) => (OpCode::Lload0, OpCode::LloadS, OpCode::Lload, slot >> 1),
            Some(SlotFamily::Reference) => {
                (OpCode::Rload0, OpCode::RloadS, OpCode::Rload, slot >> 1)
            }
            None => return Err(CompileError::Unreachable("load of a void local")),
        };
        self.emit_slot_op(ctx, fast, short, long, operand, line);
        Ok(())
    }

    /// Emits the store for a local; mirror of [`Self::emit_load`].
    fn emit_store(
        &mut self,
        ctx: &mut ChunkCtx,
        prim: PrimKind,
        slot: u16,
        line: u32,
    ) -> CompileResult<()> {
        let (fast, short, long, operand) = match family_of(prim) {
            Some(SlotFamily::Single) => (OpCode::Istore0, OpCode::IstoreS, OpCode::Istore, slot),
            Some(SlotFamily::Wide) => {
                (OpCode::Lstore0, OpCode::LstoreS, OpCode::Lstore, slot >> 1)
            }
            Some(SlotFamily::Reference) => {
                (OpCode::Rstore0, OpCode::RstoreS, OpCode::Rstore, slot >> 1)
            }
            None => return Err(CompileError::Unreachable("store to a void local")),
        };
        self.emit_slot_op(ctx, fast, short, long, operand, line);
        Ok(())
    }

    fn emit_slot_op(
        &mut self,
        ctx: &mut ChunkCtx,
        fast: OpCode,
        short: OpCode,
        long: OpCode,
        operand: u16,
        line: u32,
    ) {
        if operand < 4 {
            let op = OpCode::from_byte(fast as u8 + operand as u8).unwrap();
            ctx.chunk.write_op(op, line);
        } else if operand < 256 {
            ctx.chunk.write_op(short, line);
            ctx.chunk.write_byte(operand as u8, Chunk::NO_LINE);
        } else {
            ctx.chunk.write_op(long, line);
            ctx.chunk.write_u16(operand);
        }
    }

    /// The scratch reference slot (the synthesized trailing local).
    fn scratch_ref_offset(&self, ctx: &ChunkCtx) -> CompileResult<u16> {
        let Some(&last) = ctx.locals.last() else {
            return Err(CompileError::Unreachable("discarded reference without a scratch slot"));
        };
        let decl = &self.ast.var_decls[last];
        if decl.name.len != 0 || !self.ast.is_string(decl.ty) {
            return Err(CompileError::Unreachable("discarded reference without a scratch slot"));
        }
        let Some(index) = decl.local_index else {
            return Err(CompileError::Unreachable("local without an index"));
        };
        Ok(ctx.env.offset_of(index))
    }

    fn prim_of(&self, expr: ExprId) -> CompileResult<PrimKind> {
        let Some(ty) = self.ast.exprs[expr].ty else {
            return Err(CompileError::Other("cannot compile an untyped expression".into()));
        };
        self.ast.prim_kind(ty).ok_or(CompileError::Unimplemented("non-primitive values"))
    }

    fn line_of_expr(&self, expr: ExprId) -> u32 {
        self.line_map.line_of(self.ast.exprs[expr].loc.offset)
    }
}

fn is_comparison(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
    )
}

fn cmp_of(kind: TokenKind) -> CmpOp {
    match kind {
        TokenKind::EqualEqual => CmpOp::Eq,
        TokenKind::BangEqual => CmpOp::Ne,
        TokenKind::Less => CmpOp::Lt,
        TokenKind::LessEqual => CmpOp::Le,
        TokenKind::Greater => CmpOp::Gt,
        _ => CmpOp::Ge,
    }
}
