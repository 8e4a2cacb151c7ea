//! The in-memory timestamp word: a 128-bit, naturally aligned value
//! holding `{lock_bit:1, delta:64, wts:63}`, updated only through
//! atomic compare-and-swap and read only through atomic load, so the
//! three fields are always observed and modified as one unit.
//!
//! Stable Rust has no native `AtomicU128`; `portable_atomic::AtomicU128`
//! is the crate the wider ecosystem reaches for here.

use portable_atomic::{AtomicU128, Ordering};

const LOCK_BIT_MASK: u128 = 1;
const WTS_BITS: u32 = 63;
const WTS_MASK: u128 = (1u128 << WTS_BITS) - 1;
const DELTA_SHIFT: u32 = 1;
const WTS_SHIFT: u32 = DELTA_SHIFT + 64;

/// A decoded view of a timestamp word. Cheap to copy; callers load a
/// `Word`, reason about it, then either discard it (relaxed read) or
/// build a `desired` `Word` and `cas` it back in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Word {
    pub lock_bit: bool,
    pub delta: u64,
    pub wts: u64,
}

impl Word {
    pub const ZERO: Word = Word { lock_bit: false, delta: 0, wts: 0 };

    pub fn rts(&self) -> u64 {
        self.wts + self.delta
    }

    fn pack(&self) -> u128 {
        (self.lock_bit as u128)
            | ((self.delta as u128) << DELTA_SHIFT)
            | (((self.wts as u128) & WTS_MASK) << WTS_SHIFT)
    }

    fn unpack(bits: u128) -> Self {
        Word {
            lock_bit: bits & LOCK_BIT_MASK != 0,
            delta: ((bits >> DELTA_SHIFT) & u64::MAX as u128) as u64,
            wts: ((bits >> WTS_SHIFT) & WTS_MASK) as u64,
        }
    }

    pub fn with_lock_bit(mut self, lock_bit: bool) -> Self {
        self.lock_bit = lock_bit;
        self
    }
}

/// The atomic cell backing one key's timestamp word. `#[repr(transparent)]`
/// over the atomic so layout is exactly the atomic's, satisfying the
/// "same word, one CAS" contract.
#[repr(transparent)]
pub struct Cell(AtomicU128);

impl Cell {
    pub fn new(word: Word) -> Self {
        Self(AtomicU128::new(word.pack()))
    }

    /// Atomic relaxed load of the word.
    pub fn load(&self) -> Word {
        Word::unpack(self.0.load(Ordering::Relaxed))
    }

    /// Atomic relaxed CAS. Returns `Ok(())` on success; on failure
    /// returns the current word so the caller can retry with updated
    /// expectations, matching spec.md §4.2's `cas` contract.
    pub fn cas(&self, expected: Word, desired: Word) -> Result<(), Word> {
        self.0
            .compare_exchange(expected.pack(), desired.pack(), Ordering::Relaxed, Ordering::Relaxed)
            .map(|_| ())
            .map_err(Word::unpack)
    }
}
