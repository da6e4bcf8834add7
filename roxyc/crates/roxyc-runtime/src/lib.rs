//! roxyc-runtime - Runtime object model for the Roxy VM.
//!
//! The pieces of the runtime the compiler and VM share:
//!
//! - [`object`]: the 16-byte reference-counted object header (5-bit type
//!   tag, 59-bit uid, refcount)
//! - [`string`]: the string object and its owning [`StringRef`] handle
//! - [`interner`]: content-hash canonicalization of strings
//! - [`rng`]: the thread-local xoshiro256** uid generator
//! - [`argstack`]: the operand-stack window handed to native functions
//! - [`natives`]: the built-in native functions (`print_*`, `concat`,
//!   `clock`)
//!
//! Reference counts are non-atomic; runtime objects must not cross thread
//! boundaries.

pub mod argstack;
pub mod interner;
pub mod natives;
pub mod object;
pub mod rng;
pub mod string;

pub use argstack::ArgStack;
pub use interner::StringInterner;
pub use natives::{lookup as lookup_native, NativeFn};
pub use object::{ObjHeader, ObjType};
pub use string::{content_hash, StringRef};
