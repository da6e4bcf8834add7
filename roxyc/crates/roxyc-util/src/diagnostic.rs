//! Diagnostic reporting infrastructure.
//!
//! Phases do not print errors directly; they push [`Diagnostic`]s into a
//! shared [`Handler`] and keep going where recovery is possible. The driver
//! renders the accumulated diagnostics once a phase (or the whole pipeline)
//! is finished.
//!
//! Messages follow the user-visible format
//! `[line L] Error at 'lexeme': message`; the line number and lexeme are
//! resolved by whoever owns the source buffer, so a diagnostic carries the
//! already-rendered message plus the raw location for tooling.

use crate::span::SourceLocation;
use std::cell::{Cell, RefCell};
use std::fmt;

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// Prevents the current module from compiling.
    Error,
    /// Does not prevent compilation.
    Warning,
    /// Extra context attached to a previous diagnostic.
    Note,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
        }
    }
}

/// A single reported problem.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub loc: SourceLocation,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, loc: SourceLocation) -> Self {
        Self { level: Level::Error, message: message.into(), loc }
    }

    pub fn warning(message: impl Into<String>, loc: SourceLocation) -> Self {
        Self { level: Level::Warning, message: message.into(), loc }
    }
}

/// Accumulates diagnostics for one compilation.
///
/// Interior mutability keeps the handler shareable by reference through the
/// pipeline; the compiler is single-threaded (see the concurrency notes in
/// the design doc), so a `RefCell` is all that is needed.
///
/// # Examples
///
/// ```
/// use roxyc_util::{Handler, SourceLocation};
///
/// let handler = Handler::new();
/// handler.error("unexpected token", SourceLocation::DUMMY);
/// assert!(handler.has_errors());
/// assert_eq!(handler.error_count(), 1);
/// ```
#[derive(Default)]
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
    error_count: Cell<usize>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an error diagnostic.
    pub fn error(&self, message: impl Into<String>, loc: SourceLocation) {
        self.emit(Diagnostic::error(message, loc));
    }

    /// Pushes a warning diagnostic.
    pub fn warning(&self, message: impl Into<String>, loc: SourceLocation) {
        self.emit(Diagnostic::warning(message, loc));
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.level == Level::Error {
            self.error_count.set(self.error_count.get() + 1);
        }
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count.get() > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count.get()
    }

    /// Drains all accumulated diagnostics, resetting the handler.
    pub fn take(&self) -> Vec<Diagnostic> {
        self.error_count.set(0);
        std::mem::take(&mut self.diagnostics.borrow_mut())
    }

    /// Runs `f` over each diagnostic without draining.
    pub fn for_each(&self, mut f: impl FnMut(&Diagnostic)) {
        for diag in self.diagnostics.borrow().iter() {
            f(diag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_handler() {
        let handler = Handler::new();
        assert!(!handler.has_errors());
        assert_eq!(handler.error_count(), 0);
    }

    #[test]
    fn test_error_counting() {
        let handler = Handler::new();
        handler.error("first", SourceLocation::DUMMY);
        handler.warning("not an error", SourceLocation::DUMMY);
        handler.error("second", SourceLocation::DUMMY);
        assert_eq!(handler.error_count(), 2);
        assert_eq!(handler.take().len(), 3);
        assert!(!handler.has_errors());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Warning.to_string(), "warning");
    }
}
