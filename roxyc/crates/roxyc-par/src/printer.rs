//! Parenthesized AST dump.
//!
//! Renders statements and expressions as s-expressions whose nesting
//! mirrors the parse structure, so precedence decisions are visible in the
//! output (`a + b * 4` prints as `(+ a (* b (lit 4)))`). Resolved types are
//! included once the analyzer has filled them in, which makes the same
//! printer usable for before/after snapshots.

use crate::ast::{Ast, ExprId, ExprKind, ImportSymbols, Literal, Stmt, StmtId, Type, TypeId,
    VarDeclId};
use roxyc_lex::Token;
use roxyc_util::PrimKind;

pub struct AstPrinter<'a> {
    ast: &'a Ast,
    source: &'a [u8],
    buf: String,
    indent: usize,
}

impl<'a> AstPrinter<'a> {
    pub fn new(ast: &'a Ast, source: &'a [u8]) -> Self {
        Self { ast, source, buf: String::new(), indent: 0 }
    }

    pub fn print_stmt(mut self, stmt: StmtId) -> String {
        self.stmt(stmt);
        self.buf
    }

    pub fn print_expr(mut self, expr: ExprId) -> String {
        self.expr(expr);
        self.buf
    }

    fn newline(&mut self) {
        self.buf.push('\n');
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
    }

    fn token_text(&mut self, token: Token) {
        self.buf.push_str(&token.text(self.source));
    }

    fn stmt(&mut self, id: StmtId) {
        let ast = self.ast;
        match &ast.stmts[id] {
            Stmt::Error => self.buf.push_str("error"),
            Stmt::Block { statements } => self.stmt_list("block", statements),
            Stmt::Module(m) => self.stmt_list("module", &m.statements),
            Stmt::Expression { expr } => {
                self.buf.push_str("(expr ");
                self.expr(*expr);
                self.buf.push(')');
            }
            Stmt::Struct { name, ty } => {
                self.buf.push_str("(struct ");
                self.token_text(*name);
                if let Type::Struct(st) = &ast.types[*ty] {
                    for &field in &st.fields {
                        self.buf.push(' ');
                        self.var_decl(field);
                    }
                }
                self.buf.push(')');
            }
            Stmt::Function(f) => {
                let decl = &ast.fun_decls[f.decl];
                self.buf.push_str(if decl.is_native { "(native fun " } else { "(fun " });
                self.token_text(decl.name);
                for &param in &decl.params {
                    self.buf.push(' ');
                    self.var_decl(param);
                }
                self.buf.push(' ');
                self.type_name(decl.ret);
                self.indent += 1;
                for &stmt in &f.body {
                    self.newline();
                    self.stmt(stmt);
                }
                self.indent -= 1;
                self.buf.push(')');
            }
            Stmt::If { condition, then_branch, else_branch } => {
                self.buf.push_str("(if ");
                self.expr(*condition);
                self.indent += 1;
                self.newline();
                self.stmt(*then_branch);
                if let Some(else_branch) = else_branch {
                    self.newline();
                    self.stmt(*else_branch);
                }
                self.indent -= 1;
                self.buf.push(')');
            }
            Stmt::Var { var, initializer } => {
                self.buf.push_str("(var ");
                self.var_decl(*var);
                if let Some(init) = initializer {
                    self.buf.push(' ');
                    self.expr(*init);
                }
                self.buf.push(')');
            }
            Stmt::While { condition, body } => {
                self.buf.push_str("(while ");
                self.expr(*condition);
                self.buf.push(' ');
                self.stmt(*body);
                self.buf.push(')');
            }
            Stmt::Return { expr, .. } => {
                self.buf.push_str("(return");
                if let Some(expr) = expr {
                    self.buf.push(' ');
                    self.expr(*expr);
                }
                self.buf.push(')');
            }
            Stmt::Break { .. } => self.buf.push_str("(break)"),
            Stmt::Continue { .. } => self.buf.push_str("(continue)"),
            Stmt::Import(import) => {
                self.buf.push_str("(import ");
                for (i, seg) in import.path.iter().enumerate() {
                    if i > 0 {
                        self.buf.push('.');
                    }
                    self.token_text(*seg);
                }
                match &import.symbols {
                    ImportSymbols::Wildcard => self.buf.push_str(" *"),
                    ImportSymbols::Selective(symbols) => {
                        for &sym in symbols {
                            self.buf.push(' ');
                            self.token_text(sym);
                        }
                    }
                }
                self.buf.push(')');
            }
        }
    }

    fn stmt_list(&mut self, label: &str, statements: &[StmtId]) {
        self.buf.push('(');
        self.buf.push_str(label);
        self.indent += 1;
        for &stmt in statements {
            self.newline();
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.buf.push(')');
    }

    fn var_decl(&mut self, id: VarDeclId) {
        let decl = &self.ast.var_decls[id];
        self.buf.push('(');
        self.token_text(decl.name);
        self.buf.push(' ');
        self.type_name(decl.ty);
        self.buf.push(')');
    }

    fn type_name(&mut self, ty: TypeId) {
        let name = self.ast.type_name(ty, self.source);
        self.buf.push_str(&name);
    }

    fn expr(&mut self, id: ExprId) {
        let ast = self.ast;
        let ty = ast.exprs[id].ty;
        match &ast.exprs[id].kind {
            ExprKind::Error => self.buf.push_str("error"),
            ExprKind::Assign { name, value, .. } => {
                self.buf.push_str("(set ");
                self.token_text(*name);
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*value);
                self.buf.push(')');
            }
            ExprKind::Binary { op, left, right } => {
                self.buf.push('(');
                self.token_text(*op);
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*left);
                self.buf.push(' ');
                self.expr(*right);
                self.buf.push(')');
            }
            ExprKind::Ternary { cond, left, right } => {
                self.buf.push_str("(ternary");
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*cond);
                self.buf.push(' ');
                self.expr(*left);
                self.buf.push(' ');
                self.expr(*right);
                self.buf.push(')');
            }
            ExprKind::Grouping { expr } => {
                self.buf.push_str("(grouping");
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*expr);
                self.buf.push(')');
            }
            ExprKind::Literal(lit) => {
                self.buf.push_str("(lit");
                self.type_suffix(ty);
                self.buf.push(' ');
                let text = self.literal_text(*lit);
                self.buf.push_str(&text);
                self.buf.push(')');
            }
            ExprKind::Unary { op, right } => {
                self.buf.push('(');
                self.token_text(*op);
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*right);
                self.buf.push(')');
            }
            ExprKind::Variable { name, .. } => {
                if ty.is_some() {
                    self.buf.push('(');
                    self.token_text(*name);
                    self.type_suffix(ty);
                    self.buf.push(')');
                } else {
                    self.token_text(*name);
                }
            }
            ExprKind::Call { callee, args, .. } => {
                self.buf.push_str("(call");
                self.type_suffix(ty);
                self.buf.push(' ');
                self.expr(*callee);
                for &arg in args {
                    self.buf.push(' ');
                    self.expr(arg);
                }
                self.buf.push(')');
            }
            ExprKind::Get { object, name } => {
                self.buf.push_str("(get ");
                self.expr(*object);
                self.buf.push(' ');
                self.token_text(*name);
                self.buf.push(')');
            }
            ExprKind::Set { object, name, value } => {
                self.buf.push_str("(set ");
                self.expr(*object);
                self.buf.push(' ');
                self.token_text(*name);
                self.buf.push(' ');
                self.expr(*value);
                self.buf.push(')');
            }
        }
    }

    fn type_suffix(&mut self, ty: Option<TypeId>) {
        if let Some(ty) = ty {
            self.buf.push(':');
            self.type_name(ty);
        }
    }

    fn literal_text(&self, literal: Literal) -> String {
        match literal {
            Literal::Nil => "nil".to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int { kind, bits } => match kind {
                PrimKind::I32 => (bits as u32 as i32).to_string(),
                PrimKind::I64 => (bits as i64).to_string(),
                _ => bits.to_string(),
            },
            Literal::Float { kind, bits } => match kind {
                PrimKind::F32 => f32::from_bits(bits as u32).to_string(),
                _ => f64::from_bits(bits).to_string(),
            },
            Literal::Str(token) => token.text(self.source).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Parser;
    use roxyc_util::{Handler, ModuleId};

    fn print_expression(source: &str) -> String {
        let mut ast = Ast::new();
        let handler = Handler::new();
        let expr = {
            let mut parser = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler);
            parser.parse_expression()
        };
        assert!(!handler.has_errors(), "parse errors for {source:?}");
        AstPrinter::new(&ast, source.as_bytes()).print_expr(expr)
    }

    #[test]
    fn test_precedence_shapes() {
        assert_eq!(print_expression("1 + 2"), "(+ (lit 1) (lit 2))");
        assert_eq!(print_expression("a + b * 4"), "(+ a (* b (lit 4)))");
        assert_eq!(print_expression("(a + b) * 4"), "(* (grouping (+ a b)) (lit 4))");
        assert_eq!(print_expression("-x + 1"), "(+ (- x) (lit 1))");
        assert_eq!(print_expression("a < b == c"), "(== (< a b) c)");
        assert_eq!(print_expression("c ? a : b"), "(ternary c a b)");
        assert_eq!(print_expression("f(1, x)"), "(call f (lit 1) x)");
        assert_eq!(print_expression("\"hi\""), "(lit \"hi\")");
        assert_eq!(print_expression("a = b = 1"), "(set a (set b (lit 1)))");
    }

    #[test]
    fn test_determinism() {
        let first = print_expression("1 + 2 * 3 - 4 / 5");
        let second = print_expression("1 + 2 * 3 - 4 / 5");
        assert_eq!(first, second);
    }

    #[test]
    fn test_module_layout() {
        let source = "var a: i32 = 2;\nprint_i32(a);";
        let mut ast = Ast::new();
        let handler = Handler::new();
        let parsed = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler).parse_module();
        assert!(!handler.has_errors());
        let text = AstPrinter::new(&ast, source.as_bytes()).print_stmt(parsed.root);
        assert_eq!(text, "(module\n  (var (a i32) (lit 2))\n  (expr (call print_i32 a)))");
    }
}
