//! roxyc-drv - Compiler driver for the Roxy language.
//!
//! Orchestrates the whole pipeline over a set of modules and owns the
//! `roxy` binary. See [`library`] for the compilation and link steps.
//!
//! ```text
//! .roxy sources
//!       |
//!   [Scanner] -> tokens
//!       |
//!   [Parser] -> AST (shared arena)
//!       |
//!   [Sema A] -> exports          (all modules)
//!       |
//!   [Sema B] -> typed AST + symbol tables   (per module, via import maps)
//!       |
//!   [Codegen] -> chunks in modules
//!       |
//!   [Link] -> resolved function/native tables
//!       |
//!   [VM] -> runs the entry module
//! ```

pub mod library;

pub use library::{Library, LibraryError, LinkError, RunError, BUILTIN_MODULE};
