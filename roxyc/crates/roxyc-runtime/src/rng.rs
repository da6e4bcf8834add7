//! Thread-local xoshiro256** generator for object uids.
//!
//! Every runtime object carries a 59-bit uid drawn from a per-thread
//! generator, so host programs using the runtime from several threads never
//! contend on shared state or collide on uids (each thread's stream is
//! seeded differently). Objects themselves are still not shareable across
//! threads without synchronization; the uid stream is the only thread-local
//! piece.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

#[inline]
fn rol64(x: u64, k: u32) -> u64 {
    x.rotate_left(k)
}

/// xoshiro256** state.
struct Xoshiro256 {
    s: [u64; 4],
}

impl Xoshiro256 {
    /// Expands a 64-bit seed with splitmix64, the recommended seeding
    /// procedure for the xoshiro family.
    fn seeded(seed: u64) -> Self {
        let mut sm = seed;
        let mut next = || {
            sm = sm.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = sm;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        };
        Self { s: [next(), next(), next(), next()] }
    }

    fn next(&mut self) -> u64 {
        let s = &mut self.s;
        let result = rol64(s[1].wrapping_mul(5), 7).wrapping_mul(9);
        let t = s[1] << 17;

        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];

        s[2] ^= t;
        s[3] = rol64(s[3], 45);

        result
    }
}

/// A cheap per-thread seed: a process-wide counter stirred with the clock.
fn thread_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0x243F_6A88_85A3_08D3);
    let salt = COUNTER.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    salt ^ nanos
}

thread_local! {
    static UID_STATE: RefCell<Xoshiro256> = RefCell::new(Xoshiro256::seeded(thread_seed()));
}

/// Draws the next uid from this thread's generator.
pub fn next_uid() -> u64 {
    UID_STATE.with(|state| state.borrow_mut().next())
}
