//! roxyc-par - Parser for the Roxy language.
//!
//! A recursive-descent statement parser over a Pratt expression core. The
//! parser pulls tokens lazily from the scanner and emits a typed AST into
//! the shared arena.
//!
//! Error handling follows panic-mode recovery: the first error inside a
//! statement is reported and further errors are muted until the parser
//! synchronizes at the next statement boundary (a semicolon or a leading
//! statement keyword). The returned tree is always complete, with `Error`
//! nodes at the failure points, so downstream phases can still run over the
//! healthy parts.

pub mod ast;
pub mod expr;
pub mod printer;
pub mod stmt;

pub use ast::{
    Ast, Expr, ExprId, ExprKind, FunDecl, FunDeclId, FunctionStmt, FunctionType, ImportStmt,
    ImportSymbols, Literal, ModuleStmt, Resolution, Stmt, StmtId, StructType, Type, TypeId,
    VarDecl, VarDeclId, TYPE_INFERRED,
};
pub use printer::AstPrinter;

use roxyc_lex::{LineMap, Scanner, Token, TokenKind};
use roxyc_util::{Handler, ModuleId};

/// The result of parsing one module.
pub struct ParsedModule {
    /// Id of the root `Stmt::Module` node.
    pub root: StmtId,
    /// Line table of the fully scanned source.
    pub line_map: LineMap,
    /// True if any syntax error was reported.
    pub had_error: bool,
}

pub struct Parser<'src, 'ctx> {
    scanner: Scanner<'src>,
    ast: &'ctx mut Ast,
    handler: &'ctx Handler,
    module: ModuleId,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    pub fn new(
        source: &'src [u8],
        module: ModuleId,
        ast: &'ctx mut Ast,
        handler: &'ctx Handler,
    ) -> Self {
        Self {
            scanner: Scanner::new(source),
            ast,
            handler,
            module,
            previous: Token::EOF,
            current: Token::EOF,
            had_error: false,
            panic_mode: false,
        }
    }

    /// Parses a whole compilation unit into a `Stmt::Module` node.
    pub fn parse_module(mut self) -> ParsedModule {
        self.advance();

        let mut statements = Vec::new();
        let mut imports = Vec::new();
        while !self.check(TokenKind::Eof) {
            let stmt = self.declaration();
            if matches!(self.ast.stmts[stmt], Stmt::Import(_)) {
                imports.push(stmt);
            }
            statements.push(stmt);
        }

        let root = self.ast.stmts.alloc(Stmt::Module(ast::ModuleStmt {
            module: self.module,
            statements,
            imports,
            exports: Vec::new(),
            locals: Vec::new(),
        }));

        ParsedModule {
            root,
            line_map: self.scanner.into_line_map(),
            had_error: self.had_error,
        }
    }

    /// Parses a single expression; used by tests and tooling.
    pub fn parse_expression(&mut self) -> ExprId {
        self.advance();
        self.expression()
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if !self.current.is_error() {
                break;
            }
            let message = self.current.kind.error_message().unwrap_or("Invalid token.");
            self.error_at(self.current, message);
        }
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes the expected token or reports `message`.
    pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            self.error_at_current(message);
            false
        }
    }

    pub(crate) fn previous(&self) -> Token {
        self.previous
    }

    pub(crate) fn current(&self) -> Token {
        self.current
    }

    pub(crate) fn source(&self) -> &'src [u8] {
        self.scanner.source()
    }

    pub(crate) fn ast_mut(&mut self) -> &mut Ast {
        self.ast
    }

    pub(crate) fn module_id(&self) -> ModuleId {
        self.module
    }

    pub(crate) fn panic_mode(&self) -> bool {
        self.panic_mode
    }

    // ------------------------------------------------------------------
    // Error reporting and recovery
    // ------------------------------------------------------------------

    pub(crate) fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    pub(crate) fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    pub(crate) fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let line = self.scanner.line_of(token.offset);
        let rendered = if token.kind == TokenKind::Eof {
            format!("[line {line}] Error at end: {message}")
        } else if token.is_error() {
            format!("[line {line}] Error: {message}")
        } else {
            format!("[line {line}] Error at '{}': {message}", token.text(self.source()))
        };
        self.handler.error(rendered, token.location());
    }

    /// Skips tokens until a statement boundary, then leaves panic mode.
    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Struct
                | TokenKind::Fun
                | TokenKind::Native
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Import
                | TokenKind::Pub => return,
                _ => {}
            }
            self.advance();
        }
    }
}
