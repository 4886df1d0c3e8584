//! Emergency stop interlock with optional countdown.
//!
//! Two observable states: `Armed` (actuation permitted) and `Stopped`.
//! Elapsing time can only move Armed → Stopped; leaving Stopped requires an
//! explicit `reset()` or `arm_with_timeout()`.
//!
//! [`Interlock`] is the plain transition logic. [`InterlockHandle`] shares
//! one interlock between the control thread and any number of supervisory
//! threads. Its state is packed into a single `AtomicU64` and every
//! operation is one load or one CAS loop, so the control cycle never sleeps
//! on a lock held by another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observable interlock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockState {
    /// Actuation permitted.
    Armed,
    /// Actuators held in the safe state until reset.
    Stopped,
}

/// Emergency stop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interlock {
    tripped: bool,
    /// Remaining ticks before an automatic trip. `None` = disabled.
    countdown: Option<u32>,
}

impl Interlock {
    /// Armed, countdown disabled.
    pub const fn new() -> Self {
        Self {
            tripped: false,
            countdown: None,
        }
    }

    /// Stop unconditionally.
    #[inline]
    pub fn trip(&mut self) {
        self.tripped = true;
    }

    /// Re-arm and disable the countdown.
    #[inline]
    pub fn reset(&mut self) {
        self.tripped = false;
        self.countdown = None;
    }

    /// Re-arm and trip automatically after `ticks` further calls to `tick()`.
    ///
    /// A negative value (see `EMERGENCY_STOP_TIMEOUT_DISABLED`) disables the
    /// countdown; the interlock then only stops through `trip()`.
    #[inline]
    pub fn arm_with_timeout(&mut self, ticks: i32) {
        self.tripped = false;
        self.countdown = u32::try_from(ticks).ok();
    }

    /// Advance the countdown by one cycle.
    ///
    /// Returns `true` when this call made the countdown reach zero and
    /// tripped the interlock. A countdown already at zero stays there and
    /// does not fire again.
    pub fn tick(&mut self) -> bool {
        match self.countdown {
            Some(k) if k > 0 => {
                let next = k - 1;
                self.countdown = Some(next);
                if next == 0 {
                    self.tripped = true;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    #[inline]
    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }

    #[inline]
    pub const fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    #[inline]
    pub const fn state(&self) -> InterlockState {
        if self.tripped {
            InterlockState::Stopped
        } else {
            InterlockState::Armed
        }
    }

    // ── Packed representation ──
    //
    // bit 63: tripped, bit 62: countdown enabled, bits 0..32: countdown.

    const TRIPPED: u64 = 1 << 63;
    const COUNTDOWN_ENABLED: u64 = 1 << 62;

    const fn to_bits(self) -> u64 {
        let mut bits = 0;
        if self.tripped {
            bits |= Self::TRIPPED;
        }
        if let Some(k) = self.countdown {
            bits |= Self::COUNTDOWN_ENABLED | k as u64;
        }
        bits
    }

    const fn from_bits(bits: u64) -> Self {
        Self {
            tripped: bits & Self::TRIPPED != 0,
            countdown: if bits & Self::COUNTDOWN_ENABLED != 0 {
                Some(bits as u32)
            } else {
                None
            },
        }
    }
}

/// Thread-safe shared interlock.
///
/// Cloning shares the same interlock.
#[derive(Debug, Clone, Default)]
pub struct InterlockHandle {
    bits: Arc<AtomicU64>,
}

impl InterlockHandle {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(Interlock::new().to_bits())),
        }
    }

    /// Apply `op` atomically and return the resulting interlock with the
    /// value `op` produced.
    fn update<R>(&self, mut op: impl FnMut(&mut Interlock) -> R) -> (Interlock, R) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let mut next = Interlock::from_bits(current);
            let out = op(&mut next);
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (next, out),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn trip(&self) {
        self.update(Interlock::trip);
    }

    pub fn reset(&self) {
        self.update(Interlock::reset);
    }

    pub fn arm_with_timeout(&self, ticks: i32) {
        self.update(|i| i.arm_with_timeout(ticks));
    }

    /// Advance the countdown. Returns the state after the tick and whether
    /// the countdown fired on this call.
    pub fn tick(&self) -> (Interlock, bool) {
        self.update(Interlock::tick)
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.snapshot().is_tripped()
    }

    #[inline]
    pub fn snapshot(&self) -> Interlock {
        Interlock::from_bits(self.bits.load(Ordering::Acquire))
    }
}
