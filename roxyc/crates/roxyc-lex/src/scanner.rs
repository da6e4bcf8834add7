//! Single-pass byte scanner.
//!
//! The scanner reads one token at a time from a byte buffer, skipping
//! whitespace and `//` line comments. It also maintains a sorted table of
//! line-start offsets, filled in as newlines are consumed, so that
//! [`Scanner::line_of`] can map any already-scanned offset to its line
//! number with a binary search.
//!
//! Numeric literals accept the integer suffixes `u`/`U`/`i`/`I` with an
//! optional width suffix `l`/`L`, and the float suffixes `f`/`F`/`d`/`D`.
//! Strings are double-quoted with no escape processing; an unterminated
//! string or an unrecognized character yields an error token rather than a
//! panic, leaving recovery to the parser.

use crate::token::{Token, TokenKind};

/// An owned table of line-start offsets, detached from the scanner once
/// scanning is finished so later phases can map offsets to lines without
/// borrowing the source buffer.
#[derive(Clone, Debug)]
pub struct LineMap {
    line_starts: Vec<u32>,
}

impl LineMap {
    /// Maps a byte offset to its 1-based line number.
    pub fn line_of(&self, offset: u32) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }
}

pub struct Scanner<'src> {
    source: &'src [u8],
    /// Start offset of the token currently being scanned.
    start: usize,
    /// Offset of the next unread byte.
    current: usize,
    /// Sorted byte offsets of the first character of each line.
    line_starts: Vec<u32>,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src [u8]) -> Self {
        Self { source, start: 0, current: 0, line_starts: vec![0] }
    }

    pub fn source(&self) -> &'src [u8] {
        self.source
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    /// Maps a byte offset to its 1-based line number.
    ///
    /// Only valid for offsets at or before the scan position; the line
    /// table is built incrementally while scanning.
    pub fn line_of(&self, offset: u32) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }

    /// Detaches the line table. Call after scanning reaches end of input.
    pub fn into_line_map(self) -> LineMap {
        LineMap { line_starts: self.line_starts }
    }

    /// Scans and returns the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        self.start = self.current;
        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if Self::is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b'[' => self.make_token(TokenKind::LeftBracket),
            b']' => self.make_token(TokenKind::RightBracket),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'%' => self.make_token(TokenKind::Percent),
            b'?' => self.make_token(TokenKind::QuestionMark),
            b':' => self.make_token(TokenKind::Colon),
            b'~' => self.make_token(TokenKind::Tilde),
            b'^' => self.make_token(TokenKind::Caret),
            b'!' => {
                let kind = if self.match_byte(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make_token(kind)
            }
            b'>' => {
                let kind =
                    if self.match_byte(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make_token(kind)
            }
            b'&' => {
                let kind =
                    if self.match_byte(b'&') { TokenKind::AmpAmp } else { TokenKind::Ampersand };
                self.make_token(kind)
            }
            b'|' => {
                let kind = if self.match_byte(b'|') { TokenKind::BarBar } else { TokenKind::Bar };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.make_token(TokenKind::ErrorUnexpectedCharacter),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\r') | Some(b'\t') => {
                    self.advance();
                }
                Some(b'\n') => {
                    self.advance();
                    self.new_line();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn is_alpha(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_'
    }

    fn identifier(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if !Self::is_alpha(c) && !c.is_ascii_digit() {
                break;
            }
            self.advance();
        }
        self.make_token(self.identifier_kind())
    }

    /// Distinguishes keywords from plain identifiers.
    fn identifier_kind(&self) -> TokenKind {
        match &self.source[self.start..self.current] {
            b"struct" => TokenKind::Struct,
            b"else" => TokenKind::Else,
            b"false" => TokenKind::False,
            b"for" => TokenKind::For,
            b"fun" => TokenKind::Fun,
            b"if" => TokenKind::If,
            b"nil" => TokenKind::Nil,
            b"native" => TokenKind::Native,
            b"return" => TokenKind::Return,
            b"super" => TokenKind::Super,
            b"this" => TokenKind::This,
            b"true" => TokenKind::True,
            b"var" => TokenKind::Var,
            b"while" => TokenKind::While,
            b"break" => TokenKind::Break,
            b"continue" => TokenKind::Continue,
            b"import" => TokenKind::Import,
            b"pub" => TokenKind::Pub,
            _ => TokenKind::Identifier,
        }
    }

    fn number(&mut self) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            // Consume the dot and the fraction, then an optional float
            // width suffix.
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            if matches!(self.peek(), Some(b'f' | b'F' | b'd' | b'D')) {
                self.advance();
            }
            self.make_token(TokenKind::NumberFloat)
        } else {
            match self.peek() {
                Some(b'u' | b'U' | b'i' | b'I') => {
                    self.advance();
                    if matches!(self.peek(), Some(b'l' | b'L')) {
                        self.advance();
                    }
                }
                Some(b'l' | b'L') => {
                    self.advance();
                }
                _ => {}
            }
            self.make_token(TokenKind::NumberInt)
        }
    }

    fn string(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c == b'"' {
                break;
            }
            self.advance();
            if c == b'\n' {
                self.new_line();
            }
        }
        if self.is_at_end() {
            return self.make_token(TokenKind::ErrorUnterminatedString);
        }
        self.advance(); // closing quote
        self.make_token(TokenKind::String)
    }

    #[inline]
    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.source.get(self.current).copied()
    }

    #[inline]
    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.current + 1).copied()
    }

    #[inline]
    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    #[inline]
    fn new_line(&mut self) {
        self.line_starts.push(self.current as u32);
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            self.start as u32,
            (self.current - self.start).min(u16::MAX as usize) as u16,
            kind,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source.as_bytes());
        let mut kinds = Vec::new();
        loop {
            let tok = scanner.next_token();
            let done = tok.kind == TokenKind::Eof;
            kinds.push(tok.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(scan_kinds(""), vec![TokenKind::Eof]);
        assert_eq!(scan_kinds("   \n\t  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            scan_kinds("+ - * / % == != <= >= && || & | ! ="),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AmpAmp,
                TokenKind::BarBar,
                TokenKind::Ampersand,
                TokenKind::Bar,
                TokenKind::Bang,
                TokenKind::Equal,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            scan_kinds("var x while whilex import pub"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::While,
                TokenKind::Identifier,
                TokenKind::Import,
                TokenKind::Pub,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_suffixes() {
        for src in ["42", "42u", "42U", "42i", "42il", "42ul", "42l", "42L"] {
            let mut scanner = Scanner::new(src.as_bytes());
            let tok = scanner.next_token();
            assert_eq!(tok.kind, TokenKind::NumberInt, "source {src:?}");
            assert_eq!(tok.len as usize, src.len(), "source {src:?}");
        }
        for src in ["3.14", "3.14f", "3.14F", "0.5d", "0.5D"] {
            let mut scanner = Scanner::new(src.as_bytes());
            let tok = scanner.next_token();
            assert_eq!(tok.kind, TokenKind::NumberFloat, "source {src:?}");
            assert_eq!(tok.len as usize, src.len(), "source {src:?}");
        }
    }

    #[test]
    fn test_integer_then_dot_is_not_float() {
        // `1.foo` scans as an integer, a dot and an identifier.
        assert_eq!(
            scan_kinds("1.foo"),
            vec![TokenKind::NumberInt, TokenKind::Dot, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_literal() {
        let source = b"\"hello world\"";
        let mut scanner = Scanner::new(source);
        let tok = scanner.next_token();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.lexeme(source), b"\"hello world\"");
    }

    #[test]
    fn test_unterminated_string() {
        let mut scanner = Scanner::new(b"\"oops");
        let tok = scanner.next_token();
        assert_eq!(tok.kind, TokenKind::ErrorUnterminatedString);
    }

    #[test]
    fn test_unexpected_character() {
        let mut scanner = Scanner::new(b"@");
        let tok = scanner.next_token();
        assert_eq!(tok.kind, TokenKind::ErrorUnexpectedCharacter);
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            scan_kinds("var // the rest is ignored\nx"),
            vec![TokenKind::Var, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_of() {
        let source = b"var a;\nvar b;\n\nvar c;";
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = scanner.next_token();
            if tok.kind == TokenKind::Eof {
                break;
            }
            tokens.push(tok);
        }
        // `a` on line 1, `b` on line 2, `c` on line 4.
        assert_eq!(scanner.line_of(tokens[1].offset), 1);
        assert_eq!(scanner.line_of(tokens[4].offset), 2);
        assert_eq!(scanner.line_of(tokens[7].offset), 4);
    }

    #[test]
    fn test_multiline_string_counts_lines() {
        let source = b"\"a\nb\"\nx";
        let mut scanner = Scanner::new(source);
        assert_eq!(scanner.next_token().kind, TokenKind::String);
        let x = scanner.next_token();
        assert_eq!(x.kind, TokenKind::Identifier);
        assert_eq!(scanner.line_of(x.offset), 3);
    }
}
