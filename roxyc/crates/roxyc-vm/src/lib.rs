//! roxyc-vm - The Roxy virtual machine.
//!
//! A stack machine over 32-bit slots. 64-bit values occupy two adjacent
//! slots (little-endian halves); references occupy two slots holding raw
//! pointer bits. Each call frame addresses its locals relative to a slot
//! base; `call` places the callee's frame so the arguments already sit in
//! the parameter slots, and the remaining local slots are zeroed.
//!
//! Reference discipline: loading a reference local or a string constant
//! pushes a copy with its own count; storing into a reference slot
//! releases the previous value; when a frame returns, every slot listed in
//! the chunk's reference-local offsets is released. Native calls receive
//! an [`ArgStack`] view and follow the callee side of the same contract.
//!
//! Runtime errors (stack or frame overflow, integer division by zero,
//! invalid opcodes, `swch`) abort the run and carry the source line from
//! the chunk's line map. A run that errors out does not unwind reference
//! locals of live frames; the process is expected to give up on the VM.

use roxyc_bc::{Chunk, OpCode, Program};
use roxyc_runtime::{ArgStack, StringRef};
use roxyc_util::ModuleId;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("[line {line}] Stack overflow.")]
    StackOverflow { line: u32 },
    #[error("[line {line}] Call frame overflow.")]
    FrameOverflow { line: u32 },
    #[error("[line {line}] Division by zero.")]
    DivisionByZero { line: u32 },
    #[error("[line {line}] Invalid opcode 0x{byte:02x}.")]
    InvalidOpcode { byte: u8, line: u32 },
    #[error("[line {line}] Unresolved call target {index}.")]
    UnresolvedCall { index: u16, line: u32 },
    #[error("[line {line}] Invalid string constant {index}.")]
    InvalidStringConstant { index: u32, line: u32 },
    #[error("Module '{0}' has no compiled chunk.")]
    MissingChunk(String),
}

/// A suspended caller.
struct Frame {
    chunk: Rc<Chunk>,
    ip: usize,
    slot_base: usize,
}

pub struct Vm {
    stack: Vec<u32>,
    top: usize,
    frames: Vec<Frame>,
}

impl Vm {
    pub const MAX_FRAMES: usize = 64;
    pub const MAX_STACK: usize = Self::MAX_FRAMES * 256;

    pub fn new() -> Self {
        Self { stack: vec![0; Self::MAX_STACK], top: 0, frames: Vec::with_capacity(Self::MAX_FRAMES) }
    }

    /// The live operand slots; empty after a void run completes.
    pub fn stack_slots(&self) -> &[u32] {
        &self.stack[..self.top]
    }

    /// Runs a module's top-level chunk to completion.
    pub fn run_module(&mut self, program: &Program, module: ModuleId) -> Result<(), RuntimeError> {
        let module = program.module(module);
        let chunk = module
            .chunk
            .clone()
            .ok_or_else(|| RuntimeError::MissingChunk(module.name.clone()))?;
        self.run_chunk(program, chunk)
    }

    /// Runs a chunk as the entry frame at slot 0.
    pub fn run_chunk(&mut self, program: &Program, chunk: Rc<Chunk>) -> Result<(), RuntimeError> {
        self.top = chunk.locals_slot_size() as usize;
        self.stack[..self.top].fill(0);
        self.frames.clear();
        self.dispatch(program, chunk)
    }

    fn dispatch(&mut self, program: &Program, entry: Rc<Chunk>) -> Result<(), RuntimeError> {
        let mut chunk = entry;
        let mut ip = 0usize;
        let mut slot_base = 0usize;

        macro_rules! err_line {
            () => {
                chunk.line_at(ip.saturating_sub(1))
            };
        }

        loop {
            // Any single instruction grows the stack by at most two slots.
            if self.top + 2 > self.stack.len() {
                return Err(RuntimeError::StackOverflow { line: chunk.line_at(ip) });
            }

            let byte = chunk.code[ip];
            ip += 1;
            let Some(op) = OpCode::from_byte(byte) else {
                return Err(RuntimeError::InvalidOpcode { byte, line: err_line!() });
            };

            use OpCode::*;
            match op {
                Nop | Brk => {}
                Swch => {
                    return Err(RuntimeError::InvalidOpcode { byte, line: err_line!() });
                }

                // ---- local loads and stores -------------------------
                Iload0 | Iload1 | Iload2 | Iload3 => {
                    let slot = (byte - Iload0 as u8) as usize;
                    self.push(self.stack[slot_base + slot]);
                }
                Iload | IloadS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == IloadS);
                    self.push(self.stack[slot_base + slot]);
                }
                Istore0 | Istore1 | Istore2 | Istore3 => {
                    let slot = (byte - Istore0 as u8) as usize;
                    let value = self.pop();
                    self.stack[slot_base + slot] = value;
                }
                Istore | IstoreS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == IstoreS);
                    let value = self.pop();
                    self.stack[slot_base + slot] = value;
                }
                Lload0 | Lload1 | Lload2 | Lload3 => {
                    let slot = (byte - Lload0 as u8) as usize * 2;
                    let value = self.read_local_u64(slot_base + slot);
                    self.push_u64(value);
                }
                Lload | LloadS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == LloadS) * 2;
                    let value = self.read_local_u64(slot_base + slot);
                    self.push_u64(value);
                }
                Lstore0 | Lstore1 | Lstore2 | Lstore3 => {
                    let slot = (byte - Lstore0 as u8) as usize * 2;
                    let value = self.pop_u64();
                    self.write_local_u64(slot_base + slot, value);
                }
                Lstore | LstoreS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == LstoreS) * 2;
                    let value = self.pop_u64();
                    self.write_local_u64(slot_base + slot, value);
                }
                Rload0 | Rload1 | Rload2 | Rload3 => {
                    let slot = (byte - Rload0 as u8) as usize * 2;
                    let bits = self.read_local_u64(slot_base + slot);
                    // The stack copy carries its own count.
                    unsafe { StringRef::incref_raw(bits) };
                    self.push_u64(bits);
                }
                Rload | RloadS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == RloadS) * 2;
                    let bits = self.read_local_u64(slot_base + slot);
                    unsafe { StringRef::incref_raw(bits) };
                    self.push_u64(bits);
                }
                Rstore0 | Rstore1 | Rstore2 | Rstore3 => {
                    let slot = (byte - Rstore0 as u8) as usize * 2;
                    let bits = self.pop_u64();
                    self.store_ref(slot_base + slot, bits);
                }
                Rstore | RstoreS => {
                    let slot = self.read_slot_operand(&chunk, &mut ip, op == RstoreS) * 2;
                    let bits = self.pop_u64();
                    self.store_ref(slot_base + slot, bits);
                }

                // ---- constants --------------------------------------
                IconstNil => self.push_u64(0),
                IconstM1 => self.push(-1i32 as u32),
                Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5 | Iconst6 | Iconst7
                | Iconst8 => {
                    self.push((byte - Iconst0 as u8) as u32);
                }
                IconstS => {
                    let value = chunk.code[ip] as u32;
                    ip += 1;
                    self.push(value);
                }
                Iconst => {
                    let value = chunk.read_u32(ip);
                    ip += 4;
                    self.push(value);
                }
                Lconst | Dconst => {
                    let value = chunk.read_u64(ip);
                    ip += 8;
                    self.push_u64(value);
                }
                Fconst => {
                    let value = chunk.read_u32(ip);
                    ip += 4;
                    self.push(value);
                }
                Ldstr => {
                    let index = chunk.read_u32(ip) as usize;
                    ip += 4;
                    let module = program.module(chunk.module);
                    let Some(string) = module.strings.get(index) else {
                        return Err(RuntimeError::InvalidStringConstant {
                            index: index as u32,
                            line: err_line!(),
                        });
                    };
                    self.push_u64(string.clone().into_raw());
                }

                // ---- stack shuffling --------------------------------
                Dup => {
                    let value = self.stack[self.top - 1];
                    self.push(value);
                }
                Pop => {
                    self.top -= 1;
                }

                // ---- arithmetic -------------------------------------
                Iadd => self.bin_u32(|a, b| a.wrapping_add(b)),
                Isub => self.bin_u32(|a, b| a.wrapping_sub(b)),
                Imul => self.bin_u32(|a, b| (a as i32).wrapping_mul(b as i32) as u32),
                Uimul => self.bin_u32(|a, b| a.wrapping_mul(b)),
                Idiv => {
                    self.try_bin_u32(err_line!(), |a, b| {
                        let (a, b) = (a as i32, b as i32);
                        if b == 0 {
                            None
                        } else {
                            Some(a.wrapping_div(b) as u32)
                        }
                    })?;
                }
                Uidiv => {
                    self.try_bin_u32(err_line!(), |a, b| a.checked_div(b))?;
                }
                Irem => {
                    self.try_bin_u32(err_line!(), |a, b| {
                        let (a, b) = (a as i32, b as i32);
                        if b == 0 {
                            None
                        } else {
                            Some(a.wrapping_rem(b) as u32)
                        }
                    })?;
                }
                Uirem => {
                    self.try_bin_u32(err_line!(), |a, b| a.checked_rem(b))?;
                }
                Ladd => self.bin_u64(|a, b| a.wrapping_add(b)),
                Lsub => self.bin_u64(|a, b| a.wrapping_sub(b)),
                Lmul => self.bin_u64(|a, b| (a as i64).wrapping_mul(b as i64) as u64),
                Ulmul => self.bin_u64(|a, b| a.wrapping_mul(b)),
                Ldiv => {
                    self.try_bin_u64(err_line!(), |a, b| {
                        let (a, b) = (a as i64, b as i64);
                        if b == 0 {
                            None
                        } else {
                            Some(a.wrapping_div(b) as u64)
                        }
                    })?;
                }
                Uldiv => {
                    self.try_bin_u64(err_line!(), |a, b| a.checked_div(b))?;
                }
                Lrem => {
                    self.try_bin_u64(err_line!(), |a, b| {
                        let (a, b) = (a as i64, b as i64);
                        if b == 0 {
                            None
                        } else {
                            Some(a.wrapping_rem(b) as u64)
                        }
                    })?;
                }
                Ulrem => {
                    self.try_bin_u64(err_line!(), |a, b| a.checked_rem(b))?;
                }
                Fadd => self.bin_f32(|a, b| a + b),
                Fsub => self.bin_f32(|a, b| a - b),
                Fmul => self.bin_f32(|a, b| a * b),
                Fdiv => self.bin_f32(|a, b| a / b),
                Dadd => self.bin_f64(|a, b| a + b),
                Dsub => self.bin_f64(|a, b| a - b),
                Dmul => self.bin_f64(|a, b| a * b),
                Ddiv => self.bin_f64(|a, b| a / b),

                // ---- bit operations ---------------------------------
                Band => self.bin_u32(|a, b| a & b),
                Bor => self.bin_u32(|a, b| a | b),
                Bxor => self.bin_u32(|a, b| a ^ b),
                Bshl => self.bin_u32(|a, b| a.wrapping_shl(b)),
                Bshr => self.bin_u32(|a, b| ((a as i32).wrapping_shr(b)) as u32),
                BshrUn => self.bin_u32(|a, b| a.wrapping_shr(b)),
                Bneg => {
                    let value = self.pop() as i32;
                    self.push(value.wrapping_neg() as u32);
                }
                Bnot => {
                    let value = self.pop();
                    self.push(!value);
                }

                // ---- comparisons ------------------------------------
                Lcmp => {
                    let b = self.pop_u64() as i64;
                    let a = self.pop_u64() as i64;
                    self.push(cmp_flag(a, b) as u32);
                }
                Fcmpl | Fcmpg => {
                    let b = f32::from_bits(self.pop());
                    let a = f32::from_bits(self.pop());
                    let flag = match a.partial_cmp(&b) {
                        Some(ordering) => ordering as i32,
                        None if op == Fcmpg => 1,
                        None => -1,
                    };
                    self.push(flag as u32);
                }
                Dcmpl | Dcmpg => {
                    let b = f64::from_bits(self.pop_u64());
                    let a = f64::from_bits(self.pop_u64());
                    let flag = match a.partial_cmp(&b) {
                        Some(ordering) => ordering as i32,
                        None if op == Dcmpg => 1,
                        None => -1,
                    };
                    self.push(flag as u32);
                }

                // ---- branches ---------------------------------------
                JmpS => {
                    let offset = chunk.code[ip] as usize;
                    ip += 1 + offset;
                }
                Jmp => {
                    let offset = chunk.read_u32(ip) as usize;
                    ip += 4 + offset;
                }
                LoopS => {
                    let offset = chunk.code[ip] as usize;
                    ip += 1;
                    ip -= offset;
                }
                Loop => {
                    let offset = chunk.read_u32(ip) as usize;
                    ip += 4;
                    ip -= offset;
                }
                BrFalseS | BrTrueS | BrFalse | BrTrue => {
                    let short = matches!(op, BrFalseS | BrTrueS);
                    let value = self.pop();
                    let take = if matches!(op, BrTrue | BrTrueS) { value != 0 } else { value == 0 };
                    ip = branch_target(&chunk, ip, short, take);
                }
                BrIcmpEqS | BrIcmpNeS | BrIcmpGeS | BrIcmpGtS | BrIcmpLeS | BrIcmpLtS
                | BrIcmpEq | BrIcmpNe | BrIcmpGe | BrIcmpGt | BrIcmpLe | BrIcmpLt => {
                    let short = matches!(
                        op,
                        BrIcmpEqS | BrIcmpNeS | BrIcmpGeS | BrIcmpGtS | BrIcmpLeS | BrIcmpLtS
                    );
                    let b = self.pop() as i32;
                    let a = self.pop() as i32;
                    let take = match op {
                        BrIcmpEq | BrIcmpEqS => a == b,
                        BrIcmpNe | BrIcmpNeS => a != b,
                        BrIcmpLt | BrIcmpLtS => a < b,
                        BrIcmpLe | BrIcmpLeS => a <= b,
                        BrIcmpGt | BrIcmpGtS => a > b,
                        _ => a >= b,
                    };
                    ip = branch_target(&chunk, ip, short, take);
                }
                BrEqS | BrNeS | BrGeS | BrGtS | BrLeS | BrLtS | BrEq | BrNe | BrGe | BrGt
                | BrLe | BrLt => {
                    let short = matches!(op, BrEqS | BrNeS | BrGeS | BrGtS | BrLeS | BrLtS);
                    let flag = self.pop() as i32;
                    let take = match op {
                        BrEq | BrEqS => flag == 0,
                        BrNe | BrNeS => flag != 0,
                        BrLt | BrLtS => flag < 0,
                        BrLe | BrLeS => flag <= 0,
                        BrGt | BrGtS => flag > 0,
                        _ => flag >= 0,
                    };
                    ip = branch_target(&chunk, ip, short, take);
                }

                // ---- calls and returns ------------------------------
                Call => {
                    let index = chunk.read_u16(ip);
                    ip += 2;
                    let module = program.module(chunk.module);
                    let Some(callee) = module.runtime_functions.get(index as usize) else {
                        return Err(RuntimeError::UnresolvedCall { index, line: err_line!() });
                    };
                    let callee = Rc::clone(callee);

                    if self.frames.len() + 1 >= Self::MAX_FRAMES {
                        return Err(RuntimeError::FrameOverflow { line: err_line!() });
                    }
                    let new_base = self.top - callee.param_slots as usize;
                    let frame_top = new_base + callee.locals_slot_size() as usize;
                    if frame_top > self.stack.len() {
                        return Err(RuntimeError::StackOverflow { line: err_line!() });
                    }
                    // Zero the non-parameter local slots.
                    self.stack[self.top..frame_top].fill(0);
                    self.top = frame_top;

                    self.frames.push(Frame { chunk, ip, slot_base });
                    chunk = callee;
                    ip = 0;
                    slot_base = new_base;
                }
                CallNative => {
                    let index = chunk.read_u16(ip);
                    ip += 2;
                    let module = program.module(chunk.module);
                    let Some(&fun) = module.runtime_natives.get(index as usize) else {
                        return Err(RuntimeError::UnresolvedCall { index, line: err_line!() });
                    };
                    let mut args = ArgStack::new(&mut self.stack, self.top);
                    fun(&mut args);
                    self.top = args.finish();
                }
                Ret | Iret | Lret | Rret => {
                    // Take the return value off the top before the frame's
                    // reference locals are released.
                    let value: Option<RetValue> = match op {
                        Iret => Some(RetValue::Single(self.pop())),
                        Lret => Some(RetValue::Wide(self.pop_u64())),
                        Rret => Some(RetValue::Wide(self.pop_u64())),
                        _ => None,
                    };
                    for &offset in &chunk.ref_local_offsets {
                        let bits = self.read_local_u64(slot_base + offset as usize);
                        unsafe { StringRef::decref_raw(bits) };
                    }
                    self.top = slot_base;
                    match value {
                        Some(RetValue::Single(v)) => self.push(v),
                        Some(RetValue::Wide(v)) => self.push_u64(v),
                        None => {}
                    }

                    match self.frames.pop() {
                        Some(frame) => {
                            chunk = frame.chunk;
                            ip = frame.ip;
                            slot_base = frame.slot_base;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stack primitives
    // ------------------------------------------------------------------

    #[inline]
    fn push(&mut self, value: u32) {
        self.stack[self.top] = value;
        self.top += 1;
    }

    #[inline]
    fn pop(&mut self) -> u32 {
        debug_assert!(self.top > 0, "operand stack underflow");
        self.top -= 1;
        self.stack[self.top]
    }

    #[inline]
    fn push_u64(&mut self, value: u64) {
        self.push(value as u32);
        self.push((value >> 32) as u32);
    }

    #[inline]
    fn pop_u64(&mut self) -> u64 {
        let high = self.pop() as u64;
        let low = self.pop() as u64;
        (high << 32) | low
    }

    #[inline]
    fn read_local_u64(&self, slot: usize) -> u64 {
        (self.stack[slot] as u64) | ((self.stack[slot + 1] as u64) << 32)
    }

    #[inline]
    fn write_local_u64(&mut self, slot: usize, value: u64) {
        self.stack[slot] = value as u32;
        self.stack[slot + 1] = (value >> 32) as u32;
    }

    /// Stores reference bits into a local, releasing the previous value.
    /// Safe even when both are the same object: the incoming bits carry
    /// their own count, so the old count can always be dropped.
    fn store_ref(&mut self, slot: usize, bits: u64) {
        let old = self.read_local_u64(slot);
        // SAFETY: reference slots only ever hold null or live string
        // pointers placed there by this VM.
        unsafe { StringRef::decref_raw(old) };
        self.write_local_u64(slot, bits);
    }

    fn read_slot_operand(&self, chunk: &Chunk, ip: &mut usize, short: bool) -> usize {
        if short {
            let slot = chunk.code[*ip] as usize;
            *ip += 1;
            slot
        } else {
            let slot = chunk.read_u16(*ip) as usize;
            *ip += 2;
            slot
        }
    }

    #[inline]
    fn bin_u32(&mut self, f: impl FnOnce(u32, u32) -> u32) {
        let b = self.pop();
        let a = self.pop();
        self.push(f(a, b));
    }

    fn try_bin_u32(
        &mut self,
        line: u32,
        f: impl FnOnce(u32, u32) -> Option<u32>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match f(a, b) {
            Some(result) => {
                self.push(result);
                Ok(())
            }
            None => Err(RuntimeError::DivisionByZero { line }),
        }
    }

    #[inline]
    fn bin_u64(&mut self, f: impl FnOnce(u64, u64) -> u64) {
        let b = self.pop_u64();
        let a = self.pop_u64();
        self.push_u64(f(a, b));
    }

    fn try_bin_u64(
        &mut self,
        line: u32,
        f: impl FnOnce(u64, u64) -> Option<u64>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop_u64();
        let a = self.pop_u64();
        match f(a, b) {
            Some(result) => {
                self.push_u64(result);
                Ok(())
            }
            None => Err(RuntimeError::DivisionByZero { line }),
        }
    }

    #[inline]
    fn bin_f32(&mut self, f: impl FnOnce(f32, f32) -> f32) {
        let b = f32::from_bits(self.pop());
        let a = f32::from_bits(self.pop());
        self.push(f(a, b).to_bits());
    }

    #[inline]
    fn bin_f64(&mut self, f: impl FnOnce(f64, f64) -> f64) {
        let b = f64::from_bits(self.pop_u64());
        let a = f64::from_bits(self.pop_u64());
        self.push_u64(f(a, b).to_bits());
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

enum RetValue {
    Single(u32),
    Wide(u64),
}

fn cmp_flag(a: i64, b: i64) -> i32 {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Advances past a branch operand, applying the offset when taken.
fn branch_target(chunk: &Chunk, ip: usize, short: bool, take: bool) -> usize {
    if short {
        let offset = chunk.code[ip] as usize;
        let next = ip + 1;
        if take { next + offset } else { next }
    } else {
        let offset = chunk.read_u32(ip) as usize;
        let next = ip + 4;
        if take { next + offset } else { next }
    }
}
