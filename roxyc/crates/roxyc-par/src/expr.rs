//! Pratt expression parsing.
//!
//! A static rule table maps every token kind to an optional prefix rule,
//! an optional infix rule, and a precedence. [`Parser::parse_precedence`]
//! drives the loop: parse a prefix expression, then fold in infix
//! operators as long as their precedence is at least the requested
//! minimum. Left-associative operators re-enter one level higher;
//! assignment and ternary re-enter at their own level.
//!
//! Precedence ladder, lowest to highest:
//! None < Assignment < Ternary < Or < And < Equality < Comparison
//! < Term (`+ -`) < Factor (`* / %`) < Unary < Call < Primary.

use crate::ast::{ExprId, ExprKind, Literal};
use crate::Parser;
use roxyc_lex::TokenKind;
use roxyc_util::PrimKind;

/// Operator precedence levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next-tighter level, used for left-associative infix operators.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type PrefixFn<'s, 'c> = fn(&mut Parser<'s, 'c>, bool) -> ExprId;
type InfixFn<'s, 'c> = fn(&mut Parser<'s, 'c>, bool, ExprId) -> ExprId;

/// One row of the parse-rule table.
struct ParseRule<'s, 'c> {
    prefix: Option<PrefixFn<'s, 'c>>,
    infix: Option<InfixFn<'s, 'c>>,
    precedence: Precedence,
}

/// The parse-rule table, expressed as a total function over token kinds.
fn rule<'s, 'c>(kind: TokenKind) -> ParseRule<'s, 'c> {
    use Precedence as P;

    macro_rules! row {
        ($prefix:expr, $infix:expr, $prec:expr) => {
            ParseRule { prefix: $prefix, infix: $infix, precedence: $prec }
        };
    }

    match kind {
        TokenKind::LeftParen => row!(Some(Parser::grouping), Some(Parser::call), P::Call),
        TokenKind::Dot => row!(None, Some(Parser::dot), P::Call),
        TokenKind::Minus => row!(Some(Parser::unary), Some(Parser::binary), P::Term),
        TokenKind::Plus => row!(None, Some(Parser::binary), P::Term),
        TokenKind::Slash => row!(None, Some(Parser::binary), P::Factor),
        TokenKind::Star => row!(None, Some(Parser::binary), P::Factor),
        TokenKind::Percent => row!(None, Some(Parser::binary), P::Factor),
        TokenKind::QuestionMark => row!(None, Some(Parser::ternary), P::Ternary),
        TokenKind::Bang => row!(Some(Parser::unary), None, P::None),
        TokenKind::BangEqual => row!(None, Some(Parser::binary), P::Equality),
        TokenKind::EqualEqual => row!(None, Some(Parser::binary), P::Equality),
        TokenKind::Greater => row!(None, Some(Parser::binary), P::Comparison),
        TokenKind::GreaterEqual => row!(None, Some(Parser::binary), P::Comparison),
        TokenKind::Less => row!(None, Some(Parser::binary), P::Comparison),
        TokenKind::LessEqual => row!(None, Some(Parser::binary), P::Comparison),
        TokenKind::AmpAmp => row!(None, Some(Parser::binary), P::And),
        TokenKind::BarBar => row!(None, Some(Parser::binary), P::Or),
        TokenKind::Identifier => row!(Some(Parser::variable), None, P::None),
        TokenKind::String => row!(Some(Parser::string), None, P::None),
        TokenKind::NumberInt => row!(Some(Parser::number_int), None, P::None),
        TokenKind::NumberFloat => row!(Some(Parser::number_float), None, P::None),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            row!(Some(Parser::literal), None, P::None)
        }
        TokenKind::Super | TokenKind::This => row!(Some(Parser::unsupported), None, P::None),
        _ => row!(None, None, P::None),
    }
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    /// Parses an expression at assignment level.
    pub(crate) fn expression(&mut self) -> ExprId {
        self.parse_precedence(Precedence::Assignment)
    }

    /// The Pratt core.
    pub(crate) fn parse_precedence(&mut self, precedence: Precedence) -> ExprId {
        self.advance();
        let Some(prefix) = rule(self.previous().kind).prefix else {
            self.error("Expect expression.");
            return self.error_expr();
        };

        let can_assign = precedence <= Precedence::Assignment;
        let mut expr = prefix(self, can_assign);

        while precedence <= rule(self.current().kind).precedence {
            self.advance();
            let Some(infix) = rule(self.previous().kind).infix else {
                break;
            };
            expr = infix(self, can_assign, expr);
        }

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
        expr
    }

    fn error_expr(&mut self) -> ExprId {
        let loc = self.previous().location();
        self.ast_mut().add_expr(ExprKind::Error, loc)
    }

    // ------------------------------------------------------------------
    // Prefix rules
    // ------------------------------------------------------------------

    fn grouping(&mut self, _can_assign: bool) -> ExprId {
        let open = self.previous();
        let inner = self.expression();
        if !self.consume(TokenKind::RightParen, "Expect ')' after expression.") {
            return self.error_expr();
        }
        let loc = open.location().merge(self.previous().location());
        self.ast_mut().add_expr(ExprKind::Grouping { expr: inner }, loc)
    }

    fn number_int(&mut self, _can_assign: bool) -> ExprId {
        let token = self.previous();
        let lexeme = token.lexeme(self.source()).to_vec();

        // Trailing suffix letters select the width; digits precede them.
        let digits_end = lexeme.iter().position(|c| !c.is_ascii_digit()).unwrap_or(lexeme.len());
        let (digits, suffix) = lexeme.split_at(digits_end);
        let kind = match suffix.to_ascii_lowercase().as_slice() {
            b"" | b"i" => PrimKind::I32,
            b"u" => PrimKind::U32,
            b"ul" => PrimKind::U64,
            b"il" | b"l" => PrimKind::I64,
            _ => {
                self.error("Invalid integer suffix.");
                return self.error_expr();
            }
        };

        let Ok(value) = std::str::from_utf8(digits).unwrap_or("").parse::<u64>() else {
            self.error("Integer literal too large.");
            return self.error_expr();
        };
        let in_range = match kind {
            PrimKind::I32 => value <= i32::MAX as u64,
            PrimKind::U32 => value <= u32::MAX as u64,
            PrimKind::I64 => value <= i64::MAX as u64,
            _ => true,
        };
        if !in_range {
            self.error("Integer literal out of range for its type.");
            return self.error_expr();
        }

        self.ast_mut()
            .add_expr(ExprKind::Literal(Literal::Int { kind, bits: value }), token.location())
    }

    fn number_float(&mut self, _can_assign: bool) -> ExprId {
        let token = self.previous();
        let lexeme = token.lexeme(self.source());

        let (digits, kind) = match lexeme.last() {
            Some(b'f' | b'F') => (&lexeme[..lexeme.len() - 1], PrimKind::F32),
            Some(b'd' | b'D') => (&lexeme[..lexeme.len() - 1], PrimKind::F64),
            _ => (lexeme, PrimKind::F64),
        };

        let Ok(value) = std::str::from_utf8(digits).unwrap_or("").parse::<f64>() else {
            self.error("Invalid float literal.");
            return self.error_expr();
        };
        let bits = match kind {
            PrimKind::F32 => (value as f32).to_bits() as u64,
            _ => value.to_bits(),
        };

        self.ast_mut()
            .add_expr(ExprKind::Literal(Literal::Float { kind, bits }), token.location())
    }

    fn string(&mut self, _can_assign: bool) -> ExprId {
        let token = self.previous();
        self.ast_mut().add_expr(ExprKind::Literal(Literal::Str(token)), token.location())
    }

    fn literal(&mut self, _can_assign: bool) -> ExprId {
        let token = self.previous();
        let literal = match token.kind {
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Nil => Literal::Nil,
            _ => {
                self.error("Expect literal.");
                return self.error_expr();
            }
        };
        self.ast_mut().add_expr(ExprKind::Literal(literal), token.location())
    }

    fn variable(&mut self, can_assign: bool) -> ExprId {
        let name = self.previous();
        if can_assign && self.match_kind(TokenKind::Equal) {
            let value = self.parse_precedence(Precedence::Assignment);
            let loc = name.location().merge(self.ast_mut().exprs[value].loc);
            self.ast_mut().add_expr(ExprKind::Assign { name, value, origin: None }, loc)
        } else {
            self.ast_mut()
                .add_expr(ExprKind::Variable { name, resolution: None }, name.location())
        }
    }

    fn unary(&mut self, _can_assign: bool) -> ExprId {
        let op = self.previous();
        let right = self.parse_precedence(Precedence::Unary);
        let loc = op.location().merge(self.ast_mut().exprs[right].loc);
        self.ast_mut().add_expr(ExprKind::Unary { op, right }, loc)
    }

    fn unsupported(&mut self, _can_assign: bool) -> ExprId {
        let token = self.previous();
        let message = match token.kind {
            TokenKind::Super => "'super' is not supported.",
            _ => "'this' is not supported.",
        };
        self.error(message);
        self.error_expr()
    }

    // ------------------------------------------------------------------
    // Infix rules
    // ------------------------------------------------------------------

    fn binary(&mut self, _can_assign: bool, left: ExprId) -> ExprId {
        let op = self.previous();
        let precedence = rule(op.kind).precedence;
        let right = self.parse_precedence(precedence.next());
        let loc = self.ast_mut().exprs[left].loc.merge(self.ast_mut().exprs[right].loc);
        self.ast_mut().add_expr(ExprKind::Binary { op, left, right }, loc)
    }

    fn ternary(&mut self, _can_assign: bool, cond: ExprId) -> ExprId {
        let left = self.expression();
        if !self.consume(TokenKind::Colon, "Expect ':' in ternary expression.") {
            return self.error_expr();
        }
        // Right-associative: re-enter at ternary level.
        let right = self.parse_precedence(Precedence::Ternary);
        let loc = self.ast_mut().exprs[cond].loc.merge(self.ast_mut().exprs[right].loc);
        self.ast_mut().add_expr(ExprKind::Ternary { cond, left, right }, loc)
    }

    fn call(&mut self, _can_assign: bool, callee: ExprId) -> ExprId {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                args.push(self.expression());
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        if !self.consume(TokenKind::RightParen, "Expect ')' after arguments.") {
            return self.error_expr();
        }
        let paren = self.previous();
        let loc = self.ast_mut().exprs[callee].loc.merge(paren.location());
        self.ast_mut().add_expr(ExprKind::Call { callee, paren, args }, loc)
    }

    fn dot(&mut self, can_assign: bool, object: ExprId) -> ExprId {
        if !self.consume(TokenKind::Identifier, "Expect property name after '.'.") {
            return self.error_expr();
        }
        let name = self.previous();
        if can_assign && self.match_kind(TokenKind::Equal) {
            let value = self.parse_precedence(Precedence::Assignment);
            let loc = self.ast_mut().exprs[object].loc.merge(self.ast_mut().exprs[value].loc);
            self.ast_mut().add_expr(ExprKind::Set { object, name, value }, loc)
        } else {
            let loc = self.ast_mut().exprs[object].loc.merge(name.location());
            self.ast_mut().add_expr(ExprKind::Get { object, name }, loc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use roxyc_util::{Handler, ModuleId};

    fn parse_expr(source: &str) -> (Ast, ExprId, Handler) {
        let mut ast = Ast::new();
        let handler = Handler::new();
        let expr = {
            let mut parser = Parser::new(source.as_bytes(), ModuleId(0), &mut ast, &handler);
            parser.parse_expression()
        };
        (ast, expr, handler)
    }

    fn op_text<'a>(ast: &Ast, source: &'a str, id: ExprId) -> &'a str {
        match &ast.exprs[id].kind {
            ExprKind::Binary { op, .. } => {
                std::str::from_utf8(op.lexeme(source.as_bytes())).unwrap()
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn test_factor_binds_tighter_than_term() {
        let source = "1 + 2 * 3";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        assert_eq!(op_text(&ast, source, root), "+");
        let ExprKind::Binary { right, .. } = ast.exprs[root].kind else { unreachable!() };
        assert_eq!(op_text(&ast, source, right), "*");
    }

    #[test]
    fn test_term_is_left_associative() {
        let source = "1 - 2 - 3";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        let ExprKind::Binary { left, .. } = ast.exprs[root].kind else { unreachable!() };
        assert_eq!(op_text(&ast, source, left), "-");
    }

    #[test]
    fn test_percent_is_factor_level() {
        let source = "1 + 2 % 3";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        assert_eq!(op_text(&ast, source, root), "+");
    }

    #[test]
    fn test_grouping_overrides_precedence() {
        let source = "(1 + 2) * 3";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        assert_eq!(op_text(&ast, source, root), "*");
        let ExprKind::Binary { left, .. } = ast.exprs[root].kind else { unreachable!() };
        assert!(matches!(ast.exprs[left].kind, ExprKind::Grouping { .. }));
    }

    #[test]
    fn test_comparison_below_term() {
        let source = "1 + 2 < 3 + 4";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        assert_eq!(op_text(&ast, source, root), "<");
    }

    #[test]
    fn test_logical_precedence() {
        // && binds tighter than ||.
        let source = "a || b && c";
        let (ast, root, handler) = parse_expr(source);
        assert!(!handler.has_errors());
        assert_eq!(op_text(&ast, source, root), "||");
    }

    #[test]
    fn test_unary_chain() {
        let (ast, root, handler) = parse_expr("!!x");
        assert!(!handler.has_errors());
        let ExprKind::Unary { right, .. } = ast.exprs[root].kind else { panic!() };
        assert!(matches!(ast.exprs[right].kind, ExprKind::Unary { .. }));
    }

    #[test]
    fn test_ternary_shape() {
        let (ast, root, handler) = parse_expr("c ? 1 : 2");
        assert!(!handler.has_errors());
        assert!(matches!(ast.exprs[root].kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn test_assignment_right_associative() {
        let (ast, root, handler) = parse_expr("a = b = 1");
        assert!(!handler.has_errors());
        let ExprKind::Assign { value, .. } = ast.exprs[root].kind else { panic!() };
        assert!(matches!(ast.exprs[value].kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_, _, handler) = parse_expr("1 + 2 = 3");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_call_with_arguments() {
        let (ast, root, handler) = parse_expr("f(1, 2, 3)");
        assert!(!handler.has_errors());
        let ExprKind::Call { ref args, .. } = ast.exprs[root].kind else { panic!() };
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_get_and_set() {
        let (ast, root, handler) = parse_expr("p.x = 1");
        assert!(!handler.has_errors());
        assert!(matches!(ast.exprs[root].kind, ExprKind::Set { .. }));

        let (ast, root, handler) = parse_expr("p.x + 1");
        assert!(!handler.has_errors());
        let ExprKind::Binary { left, .. } = ast.exprs[root].kind else { panic!() };
        assert!(matches!(ast.exprs[left].kind, ExprKind::Get { .. }));
    }

    #[test]
    fn test_literal_suffixes() {
        let (ast, root, _) = parse_expr("42ul");
        let ExprKind::Literal(Literal::Int { kind, bits }) = ast.exprs[root].kind else { panic!() };
        assert_eq!(kind, PrimKind::U64);
        assert_eq!(bits, 42);

        let (ast, root, _) = parse_expr("2.5f");
        let ExprKind::Literal(Literal::Float { kind, bits }) = ast.exprs[root].kind else {
            panic!()
        };
        assert_eq!(kind, PrimKind::F32);
        assert_eq!(f32::from_bits(bits as u32), 2.5);
    }

    #[test]
    fn test_int_literal_out_of_range() {
        let (_, _, handler) = parse_expr("99999999999999999999");
        assert!(handler.has_errors());
        let (_, _, handler) = parse_expr("3000000000");
        assert!(handler.has_errors(), "default i32 literal must fit i32");
        let (_, _, handler) = parse_expr("3000000000u");
        assert!(!handler.has_errors());
    }

    #[test]
    fn test_missing_expression() {
        let (_, _, handler) = parse_expr("+ 2");
        assert!(handler.has_errors());
    }
}
