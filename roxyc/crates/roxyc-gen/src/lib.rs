//! roxyc-gen - Bytecode generation for the Roxy language.
//!
//! Turns the typed AST of one module into chunks: the module top level and
//! one chunk per function, attached to the module's function table. See
//! [`compiler`] for the emission rules and [`local_env`] for frame slot
//! layout.

pub mod compiler;
pub mod local_env;

pub use compiler::Compiler;
pub use local_env::FnLocalEnv;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A language construct without a designed lowering was reached.
    #[error("Unimplemented: {0}.")]
    Unimplemented(&'static str),
    /// An invariant the earlier phases should have established was
    /// violated; always a compiler defect.
    #[error("Internal compiler error: {0}.")]
    Unreachable(&'static str),
    #[error("{0}")]
    Other(String),
}

pub type CompileResult<T> = Result<T, CompileError>;
