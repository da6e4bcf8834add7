//! roxyc-util - Shared infrastructure for the Roxy compiler.
//!
//! This crate holds the pieces every other phase depends on:
//!
//! - [`span`]: byte-offset source locations
//! - [`diagnostic`]: the diagnostic handler that accumulates errors and
//!   warnings across phases
//! - [`arena`]: typed arenas addressed by 32-bit node ids, used for the AST
//! - [`prim`]: the primitive-type vocabulary with its fixed size/alignment
//!   tables, shared by the analyzer, the bytecode compiler and the VM

pub mod arena;
pub mod diagnostic;
pub mod prim;
pub mod span;

pub use arena::{Arena, Idx};
pub use diagnostic::{Diagnostic, Handler, Level};
pub use prim::PrimKind;
pub use span::SourceLocation;

crate::define_idx! {
    /// Identifies one compilation unit (source file) within a library.
    pub struct ModuleId
}
