use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of per-request nonces.
///
/// Implementations must be safe to call from many tasks at once and must
/// never hand out the same value twice.
pub trait NonceProvider: Send + Sync {
    fn next_nonce(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceClock {
    Milliseconds,
    Microseconds,
    /// Pure counter, no wall clock involved
    Counter,
}

/// Strictly increasing nonce shared by every signed request of one client.
///
/// Each value is `max(clock_now, last + 1)`, so bursts within the same clock
/// tick still produce distinct, increasing nonces.
#[derive(Debug)]
pub struct MonotonicNonce {
    clock: NonceClock,
    last: AtomicU64,
}

impl MonotonicNonce {
    pub const fn new(clock: NonceClock) -> Self {
        Self {
            clock,
            last: AtomicU64::new(0),
        }
    }

    pub const fn milliseconds() -> Self {
        Self {
            clock: NonceClock::Milliseconds,
            last: AtomicU64::new(0),
        }
    }

    pub const fn microseconds() -> Self {
        Self {
            clock: NonceClock::Microseconds,
            last: AtomicU64::new(0),
        }
    }

    /// Counter starting after `start`
    pub const fn counter(start: u64) -> Self {
        Self {
            clock: NonceClock::Counter,
            last: AtomicU64::new(start),
        }
    }

    pub const fn clock(&self) -> NonceClock {
        self.clock
    }

    fn now(&self) -> u64 {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        match self.clock {
            NonceClock::Milliseconds => elapsed.as_millis() as u64,
            NonceClock::Microseconds => elapsed.as_micros() as u64,
            NonceClock::Counter => 0,
        }
    }
}

impl Default for MonotonicNonce {
    fn default() -> Self {
        Self::milliseconds()
    }
}

impl NonceProvider for MonotonicNonce {
    fn next_nonce(&self) -> u64 {
        let now = self.now();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Always returns the same value. Only useful for reproducible signatures in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedNonce(pub u64);

impl NonceProvider for FixedNonce {
    fn next_nonce(&self) -> u64 {
        self.0
    }
}
