//! Built-in native functions.
//!
//! These back the `builtin` module's declarations; the link step resolves
//! each declaration to one of the function pointers here by name. Natives
//! receive their arguments through an [`ArgStack`] and follow the callee
//! side of the reference discipline: reference arguments arrive with one
//! count owned by the callee, reference results are pushed with one count
//! owned by the stack.

use crate::argstack::ArgStack;
use crate::string::StringRef;
use std::sync::OnceLock;
use std::time::Instant;

/// The trampoline signature for native functions.
pub type NativeFn = fn(&mut ArgStack<'_>);

/// Resolves a built-in native by name.
pub fn lookup(name: &str) -> Option<NativeFn> {
    Some(match name {
        "print_i32" => print_i32,
        "print_i64" => print_i64,
        "print_u32" => print_u32,
        "print_u64" => print_u64,
        "print_f32" => print_f32,
        "print_f64" => print_f64,
        "print" => print_str,
        "concat" => concat,
        "clock" => clock,
        _ => return None,
    })
}

fn print_i32(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_i32());
}

fn print_i64(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_i64());
}

fn print_u32(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_u32());
}

fn print_u64(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_u64());
}

fn print_f32(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_f32());
}

fn print_f64(args: &mut ArgStack<'_>) {
    println!("{}", args.pop_f64());
}

fn print_str(args: &mut ArgStack<'_>) {
    // SAFETY: the compiler only passes string-typed values here; the bits
    // came off the operand stack with one count owned by the callee.
    match unsafe { StringRef::from_raw(args.pop_ref()) } {
        Some(s) => println!("{}", s.to_string_lossy()),
        None => println!("nil"),
    }
}

fn concat(args: &mut ArgStack<'_>) {
    // Arguments were pushed left to right; nil references concatenate as
    // empty strings.
    // SAFETY: as in `print_str`.
    let b = unsafe { StringRef::from_raw(args.pop_ref()) };
    let a = unsafe { StringRef::from_raw(args.pop_ref()) };
    let empty = || StringRef::new(b"");
    let a = a.unwrap_or_else(empty);
    let b = b.unwrap_or_else(empty);
    let result = StringRef::concat(&a, &b);
    args.push_ref(result.into_raw());
}

fn clock(args: &mut ArgStack<'_>) {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    args.push_f64(start.elapsed().as_secs_f64());
}
