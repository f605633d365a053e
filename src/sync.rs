//! Spin primitives for contended paths.
//!
//! The crate cannot use `std::sync::Mutex` for cross-process serialization
//! because the lock state must live inside the shared segment. Instead we
//! provide [`Backoff`], a bounded exponential busy-wait, and [`HeaderLock`],
//! a one-bit spin lock carried in a shared header word.

use core::sync::atomic::{AtomicU32, Ordering};

/// Bounded exponential backoff for contended CAS loops.
///
/// Spins double on every [`snooze`](Backoff::snooze) until the configured
/// budget is exhausted, after which the calling thread yields instead of
/// burning the CPU.
pub(crate) struct Backoff {
    spin: u32,
    limit: u32,
}

impl Backoff {
    pub(crate) fn new(limit: u32) -> Self {
        Self { spin: 1, limit }
    }

    pub(crate) fn snooze(&mut self) {
        if self.spin <= self.limit {
            for _ in 0..self.spin {
                core::hint::spin_loop();
            }
            self.spin = self.spin.saturating_mul(2);
        } else {
            std::thread::yield_now();
        }
    }
}

/// A spin lock over one reserved bit of a shared header word.
///
/// While the bit is set, the holder owns the remaining 31 bits of the word
/// and whatever state the word guards. Readers that only mask the bit off
/// stay wait-free. The at-rest value of the word (bit clear) is exactly the
/// guarded value, so the lock leaves no trace in the byte image.
pub(crate) struct HeaderLock<'a> {
    word: &'a AtomicU32,
    bit: u32,
}

impl<'a> HeaderLock<'a> {
    pub(crate) fn new(word: &'a AtomicU32, bit: u32) -> Self {
        debug_assert!(bit.is_power_of_two());
        Self { word, bit }
    }

    /// Acquire the lock. Returns the guarded value (bit masked off) as of
    /// acquisition.
    #[inline]
    pub(crate) fn acquire(&self, spin_limit: u32) -> u32 {
        let cur = self.word.load(Ordering::Relaxed);
        if cur & self.bit == 0 {
            if let Ok(prev) = self.word.compare_exchange_weak(
                cur,
                cur | self.bit,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                return prev;
            }
        }
        self.acquire_slow(spin_limit)
    }

    #[cold]
    fn acquire_slow(&self, spin_limit: u32) -> u32 {
        let mut backoff = Backoff::new(spin_limit);
        loop {
            // Spin read-only while held; CAS only when the bit looks clear.
            let cur = self.word.load(Ordering::Relaxed);
            if cur & self.bit != 0 {
                backoff.snooze();
                continue;
            }
            match self.word.compare_exchange_weak(
                cur,
                cur | self.bit,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(prev) => return prev,
                Err(_) => backoff.snooze(),
            }
        }
    }

    /// Publish a new guarded value while still holding the lock.
    #[inline]
    pub(crate) fn store(&self, value: u32) {
        debug_assert_eq!(value & self.bit, 0);
        self.word.store(value | self.bit, Ordering::Release);
    }

    /// Release the lock, leaving `value` as the at-rest word.
    #[inline]
    pub(crate) fn release(&self, value: u32) {
        debug_assert_eq!(value & self.bit, 0);
        self.word.store(value, Ordering::Release);
    }
}
