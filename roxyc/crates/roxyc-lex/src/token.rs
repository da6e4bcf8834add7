//! Token model.
//!
//! A token is six bytes: source offset, length, and kind. The lexeme is
//! never copied; callers slice it back out of the source buffer on demand.
//! Error sentinels live in the high discriminant range so `is_error` is a
//! single bit test.

use roxyc_util::SourceLocation;

/// Kinds of tokens produced by the scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    Percent,
    QuestionMark,
    Colon,
    Ampersand,
    Bar,
    Tilde,
    Caret,
    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Two character tokens.
    AmpAmp,
    BarBar,
    // Literals.
    Identifier,
    String,
    NumberInt,
    NumberFloat,
    // Keywords.
    Struct,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Native,
    Return,
    Super,
    This,
    True,
    Var,
    While,
    Break,
    Continue,
    Import,
    Pub,

    Eof,

    // Error sentinels; the scanner produces these instead of panicking so
    // the parser can report and recover.
    ErrorUnexpectedCharacter = 0b1000_0000,
    ErrorUnterminatedString,
}

impl TokenKind {
    #[inline]
    pub const fn is_error(self) -> bool {
        (self as u8) & 0b1000_0000 != 0
    }

    /// The message associated with an error sentinel.
    pub const fn error_message(self) -> Option<&'static str> {
        match self {
            TokenKind::ErrorUnexpectedCharacter => Some("Unexpected character."),
            TokenKind::ErrorUnterminatedString => Some("Unterminated string."),
            _ => None,
        }
    }
}

/// A scanned token: a location plus a kind. Immutable once produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub offset: u32,
    pub len: u16,
    pub kind: TokenKind,
}

impl Token {
    pub const EOF: Token = Token { offset: 0, len: 0, kind: TokenKind::Eof };

    #[inline]
    pub fn new(offset: u32, len: u16, kind: TokenKind) -> Self {
        Self { offset, len, kind }
    }

    #[inline]
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.offset, self.len)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    /// True for the `+ - * / %` operator tokens.
    #[inline]
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
        )
    }

    /// True for the `== != < <= > >=` operator tokens.
    #[inline]
    pub fn is_comparison(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::EqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
        )
    }

    /// Slices the lexeme back out of the source buffer.
    #[inline]
    pub fn lexeme<'src>(&self, source: &'src [u8]) -> &'src [u8] {
        self.location().slice(source)
    }

    /// The lexeme as UTF-8 text for display.
    pub fn text<'src>(&self, source: &'src [u8]) -> std::borrow::Cow<'src, str> {
        String::from_utf8_lossy(self.lexeme(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_bit() {
        assert!(TokenKind::ErrorUnexpectedCharacter.is_error());
        assert!(TokenKind::ErrorUnterminatedString.is_error());
        assert!(!TokenKind::Eof.is_error());
        assert!(!TokenKind::Identifier.is_error());
    }

    #[test]
    fn test_arithmetic_classification() {
        let plus = Token::new(0, 1, TokenKind::Plus);
        assert!(plus.is_arithmetic());
        let eq = Token::new(0, 2, TokenKind::EqualEqual);
        assert!(!eq.is_arithmetic());
        assert!(eq.is_comparison());
    }

    #[test]
    fn test_lexeme_slicing() {
        let source = b"var count = 3;";
        let tok = Token::new(4, 5, TokenKind::Identifier);
        assert_eq!(tok.lexeme(source), b"count");
        assert_eq!(tok.text(source), "count");
    }
}
