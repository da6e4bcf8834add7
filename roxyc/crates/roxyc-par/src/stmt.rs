//! Statement and declaration parsing.
//!
//! Grammar:
//!
//! ```text
//! declaration := [pub] (funDecl | nativeFunDecl | structDecl) | varDecl | statement
//! funDecl     := "fun" IDENT "(" params? ")" (":" type)? block
//! nativeFun   := "native" "fun" IDENT "(" params? ")" (":" type)? ";"
//! structDecl  := "struct" IDENT "{" (IDENT ":" type ";")* "}"
//! varDecl     := "var" IDENT (":" type)? ("=" expression)? ";"
//! statement   := block | ifStmt | whileStmt | returnStmt | breakStmt
//!              | continueStmt | importStmt | exprStmt
//! importStmt  := "import" IDENT ("." IDENT)* ("." ("*" | "{" IDENT ("," IDENT)* "}"))? ";"
//! ```

use crate::ast::{
    FunDecl, FunDeclId, FunctionStmt, ImportStmt, ImportSymbols, Stmt, StmtId, StructType, Type,
    TypeId, VarDecl, VarDeclId, TYPE_INFERRED,
};
use crate::Parser;
use roxyc_lex::{Token, TokenKind};
use roxyc_util::PrimKind;

impl<'src, 'ctx> Parser<'src, 'ctx> {
    /// Parses one declaration or statement, synchronizing on errors.
    pub(crate) fn declaration(&mut self) -> StmtId {
        let is_pub = self.match_kind(TokenKind::Pub);

        let stmt = if self.match_kind(TokenKind::Native) {
            if self.consume(TokenKind::Fun, "Expect 'fun' after 'native'.") {
                self.function_declaration(true, is_pub)
            } else {
                self.error_stmt()
            }
        } else if self.match_kind(TokenKind::Fun) {
            self.function_declaration(false, is_pub)
        } else if self.match_kind(TokenKind::Struct) {
            self.struct_declaration()
        } else if is_pub {
            self.error_at_current("Expect 'fun', 'native' or 'struct' after 'pub'.");
            self.error_stmt()
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        };

        if self.panic_mode() {
            self.synchronize();
        }
        stmt
    }

    fn statement(&mut self) -> StmtId {
        if self.match_kind(TokenKind::LeftBrace) {
            self.block()
        } else if self.match_kind(TokenKind::If) {
            self.if_statement()
        } else if self.match_kind(TokenKind::While) {
            self.while_statement()
        } else if self.match_kind(TokenKind::For) {
            self.error("'for' loops are not supported.");
            self.error_stmt()
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement()
        } else if self.match_kind(TokenKind::Break) {
            let keyword = self.previous();
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
            self.ast_mut().stmts.alloc(Stmt::Break { keyword })
        } else if self.match_kind(TokenKind::Continue) {
            let keyword = self.previous();
            self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
            self.ast_mut().stmts.alloc(Stmt::Continue { keyword })
        } else if self.match_kind(TokenKind::Import) {
            self.import_statement()
        } else {
            self.expression_statement()
        }
    }

    fn error_stmt(&mut self) -> StmtId {
        self.ast_mut().stmts.alloc(Stmt::Error)
    }

    fn block(&mut self) -> StmtId {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.declaration());
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
        self.ast_mut().stmts.alloc(Stmt::Block { statements })
    }

    fn var_declaration(&mut self) -> StmtId {
        if !self.consume(TokenKind::Identifier, "Expect variable name.") {
            return self.error_stmt();
        }
        let name = self.previous();

        let ty = if self.match_kind(TokenKind::Colon) { self.parse_type() } else { TYPE_INFERRED };

        let initializer =
            if self.match_kind(TokenKind::Equal) { Some(self.expression()) } else { None };

        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");

        let var = self.ast_mut().var_decls.alloc(VarDecl::new(name, ty));
        self.ast_mut().stmts.alloc(Stmt::Var { var, initializer })
    }

    fn function_declaration(&mut self, is_native: bool, is_pub: bool) -> StmtId {
        if !self.consume(TokenKind::Identifier, "Expect function name.") {
            return self.error_stmt();
        }
        let name = self.previous();

        if !self.consume(TokenKind::LeftParen, "Expect '(' after function name.") {
            return self.error_stmt();
        }

        let mut params: Vec<VarDeclId> = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if !self.consume(TokenKind::Identifier, "Expect parameter name.") {
                    return self.error_stmt();
                }
                let param_name = self.previous();
                if !self.consume(TokenKind::Colon, "Expect ':' after parameter name.") {
                    return self.error_stmt();
                }
                let param_ty = self.parse_type();
                params.push(self.ast_mut().var_decls.alloc(VarDecl::new(param_name, param_ty)));
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        if !self.consume(TokenKind::RightParen, "Expect ')' after parameters.") {
            return self.error_stmt();
        }

        let ret = if self.match_kind(TokenKind::Colon) {
            self.parse_type()
        } else {
            self.ast_mut().primitive(PrimKind::Void)
        };

        let module = self.module_id();
        let decl: FunDeclId =
            self.ast_mut().fun_decls.alloc(FunDecl { name, module, params, ret, is_native, is_pub });

        let body = if is_native {
            self.consume(TokenKind::Semicolon, "Expect ';' after native function declaration.");
            Vec::new()
        } else {
            if !self.consume(TokenKind::LeftBrace, "Expect '{' before function body.") {
                return self.error_stmt();
            }
            let mut body = Vec::new();
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                body.push(self.declaration());
            }
            self.consume(TokenKind::RightBrace, "Expect '}' after function body.");
            body
        };

        self.ast_mut().stmts.alloc(Stmt::Function(FunctionStmt {
            decl,
            body,
            locals: Vec::new(),
        }))
    }

    fn struct_declaration(&mut self) -> StmtId {
        if !self.consume(TokenKind::Identifier, "Expect struct name.") {
            return self.error_stmt();
        }
        let name = self.previous();

        if !self.consume(TokenKind::LeftBrace, "Expect '{' before struct body.") {
            return self.error_stmt();
        }

        let mut fields: Vec<VarDeclId> = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if !self.consume(TokenKind::Identifier, "Expect field name.") {
                return self.error_stmt();
            }
            let field_name = self.previous();
            if !self.consume(TokenKind::Colon, "Expect ':' after field name.") {
                return self.error_stmt();
            }
            let field_ty = self.parse_type();
            self.consume(TokenKind::Semicolon, "Expect ';' after field declaration.");
            fields.push(self.ast_mut().var_decls.alloc(VarDecl::new(field_name, field_ty)));
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after struct body.");

        let ty = self.ast_mut().types.alloc(Type::Struct(StructType { name, fields }));
        self.ast_mut().stmts.alloc(Stmt::Struct { name, ty })
    }

    fn if_statement(&mut self) -> StmtId {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_branch = self.statement();
        let else_branch =
            if self.match_kind(TokenKind::Else) { Some(self.statement()) } else { None };

        self.ast_mut().stmts.alloc(Stmt::If { condition, then_branch, else_branch })
    }

    fn while_statement(&mut self) -> StmtId {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let body = self.statement();
        self.ast_mut().stmts.alloc(Stmt::While { condition, body })
    }

    fn return_statement(&mut self) -> StmtId {
        let keyword = self.previous();
        let expr =
            if self.check(TokenKind::Semicolon) { None } else { Some(self.expression()) };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.ast_mut().stmts.alloc(Stmt::Return { keyword, expr })
    }

    fn import_statement(&mut self) -> StmtId {
        if !self.consume(TokenKind::Identifier, "Expect module path after 'import'.") {
            return self.error_stmt();
        }
        let mut path: Vec<Token> = vec![self.previous()];
        let mut symbols = None;

        while self.match_kind(TokenKind::Dot) {
            if self.match_kind(TokenKind::Star) {
                symbols = Some(ImportSymbols::Wildcard);
                break;
            }
            if self.match_kind(TokenKind::LeftBrace) {
                let mut list = Vec::new();
                loop {
                    if !self.consume(TokenKind::Identifier, "Expect symbol name in import list.") {
                        return self.error_stmt();
                    }
                    list.push(self.previous());
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RightBrace, "Expect '}' after import list.");
                symbols = Some(ImportSymbols::Selective(list));
                break;
            }
            if !self.consume(TokenKind::Identifier, "Expect name after '.' in import path.") {
                return self.error_stmt();
            }
            path.push(self.previous());
        }

        // `import a.b.c;` names a single symbol from module `a.b`.
        let symbols = match symbols {
            Some(symbols) => symbols,
            None => {
                if path.len() < 2 {
                    self.error("Expect symbol, '{...}' or '*' in import.");
                    return self.error_stmt();
                }
                let symbol = path.pop().unwrap();
                ImportSymbols::Selective(vec![symbol])
            }
        };

        self.consume(TokenKind::Semicolon, "Expect ';' after import.");
        self.ast_mut().stmts.alloc(Stmt::Import(ImportStmt { path, symbols }))
    }

    fn expression_statement(&mut self) -> StmtId {
        let expr = self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.ast_mut().stmts.alloc(Stmt::Expression { expr })
    }

    /// Parses a type annotation: a primitive name or a named (struct) type
    /// left unresolved until semantic analysis.
    pub(crate) fn parse_type(&mut self) -> TypeId {
        if !self.consume(TokenKind::Identifier, "Expect type name.") {
            return TYPE_INFERRED;
        }
        let token = self.previous();
        let name = token.lexeme(self.source()).to_vec();
        match PrimKind::from_name(&name) {
            Some(kind) => self.ast_mut().primitive(kind),
            None => self.ast_mut().types.alloc(Type::Unassigned(token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use crate::ParsedModule;
    use roxyc_util::{Handler, ModuleId};

    fn parse(source: &str) -> (Ast, ParsedModule, Handler) {
        let mut ast = Ast::new();
        let handler = Handler::new();
        let parsed = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler).parse_module();
        (ast, parsed, handler)
    }

    fn module_statements(ast: &Ast, parsed: &ParsedModule) -> Vec<StmtId> {
        match &ast.stmts[parsed.root] {
            Stmt::Module(m) => m.statements.clone(),
            other => panic!("expected module root, got {other:?}"),
        }
    }

    #[test]
    fn test_var_with_type_and_initializer() {
        let (ast, parsed, handler) = parse("var a: i32 = 2;");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        assert_eq!(stmts.len(), 1);
        let Stmt::Var { var, initializer } = &ast.stmts[stmts[0]] else { panic!() };
        assert_eq!(ast.prim_kind(ast.var_decls[*var].ty), Some(PrimKind::I32));
        assert!(initializer.is_some());
    }

    #[test]
    fn test_var_without_type() {
        let (ast, parsed, handler) = parse("var a = 2;");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        let Stmt::Var { var, .. } = &ast.stmts[stmts[0]] else { panic!() };
        assert_eq!(ast.var_decls[*var].ty, TYPE_INFERRED);
    }

    #[test]
    fn test_function_declaration() {
        let (ast, parsed, handler) = parse("fun sq(x: i32): i32 { return x * x; }");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        let Stmt::Function(f) = &ast.stmts[stmts[0]] else { panic!() };
        let decl = &ast.fun_decls[f.decl];
        assert_eq!(decl.params.len(), 1);
        assert!(!decl.is_native);
        assert!(!decl.is_pub);
        assert_eq!(ast.prim_kind(decl.ret), Some(PrimKind::I32));
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn test_native_function_declaration() {
        let (ast, parsed, handler) = parse("pub native fun print(value: string);");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        let Stmt::Function(f) = &ast.stmts[stmts[0]] else { panic!() };
        let decl = &ast.fun_decls[f.decl];
        assert!(decl.is_native);
        assert!(decl.is_pub);
        assert!(f.body.is_empty());
        assert_eq!(ast.prim_kind(decl.ret), Some(PrimKind::Void));
    }

    #[test]
    fn test_struct_declaration() {
        let (ast, parsed, handler) = parse("struct Point { x: f32; y: f32; }");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        let Stmt::Struct { ty, .. } = &ast.stmts[stmts[0]] else { panic!() };
        let Type::Struct(st) = &ast.types[*ty] else { panic!() };
        assert_eq!(st.fields.len(), 2);
    }

    #[test]
    fn test_if_else_and_while() {
        let (ast, parsed, handler) =
            parse("if (a) { b; } else { c; } while (x) { y; }");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);
        assert!(matches!(ast.stmts[stmts[0]], Stmt::If { else_branch: Some(_), .. }));
        assert!(matches!(ast.stmts[stmts[1]], Stmt::While { .. }));
    }

    #[test]
    fn test_import_forms() {
        let (ast, parsed, handler) =
            parse("import lib.*;\nimport a.b.c;\nimport util.{min, max};");
        assert!(!handler.has_errors());
        let stmts = module_statements(&ast, &parsed);

        let Stmt::Import(wild) = &ast.stmts[stmts[0]] else { panic!() };
        assert_eq!(wild.path.len(), 1);
        assert!(matches!(wild.symbols, ImportSymbols::Wildcard));

        let Stmt::Import(single) = &ast.stmts[stmts[1]] else { panic!() };
        assert_eq!(single.path.len(), 2);
        let ImportSymbols::Selective(syms) = &single.symbols else { panic!() };
        assert_eq!(syms.len(), 1);

        let Stmt::Import(list) = &ast.stmts[stmts[2]] else { panic!() };
        assert_eq!(list.path.len(), 1);
        let ImportSymbols::Selective(syms) = &list.symbols else { panic!() };
        assert_eq!(syms.len(), 2);
    }

    #[test]
    fn test_import_statements_are_indexed_on_module() {
        let (ast, parsed, handler) = parse("import lib.*;\nvar a = 1;");
        assert!(!handler.has_errors());
        let Stmt::Module(m) = &ast.stmts[parsed.root] else { panic!() };
        assert_eq!(m.imports.len(), 1);
        assert_eq!(m.statements.len(), 2);
    }

    #[test]
    fn test_error_recovery_keeps_later_statements() {
        let (ast, parsed, handler) = parse("var 1 = ;\nvar ok = 2;");
        assert!(handler.has_errors());
        assert!(parsed.had_error);
        let stmts = module_statements(&ast, &parsed);
        // The bad declaration becomes an error node; the good one survives.
        assert!(matches!(ast.stmts[stmts[0]], Stmt::Error));
        assert!(stmts.iter().any(|&s| matches!(ast.stmts[s], Stmt::Var { .. })));
    }

    #[test]
    fn test_multiple_errors_reported_after_sync() {
        let (_, _, handler) = parse("var 1;\nvar 2;\n");
        assert!(handler.error_count() >= 2);
    }

    #[test]
    fn test_for_is_rejected() {
        let (_, _, handler) = parse("for (;;) {}");
        assert!(handler.has_errors());
    }
}
