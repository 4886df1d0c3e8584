//! Even/odd sequence counter for lock-free multi-word snapshots.
//!
//! A single writer brackets its stores with [`SeqCounter::begin_write`] and
//! [`SeqCounter::end_write`]; readers retry until they observe the same even
//! sequence before and after reading. Readers give up after a bounded number
//! of attempts so a preempted writer can never stall the control cycle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

use hover_common::types::ControlOutput;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default reader retry budget.
pub const READ_RETRIES: u32 = 8;

/// Writer sequence: odd = write in progress, even = committed.
#[derive(Debug, Default)]
pub struct SeqCounter {
    seq: AtomicU64,
}

impl SeqCounter {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    /// Enter a write (sequence becomes odd). Single writer only.
    #[inline]
    pub fn begin_write(&self) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Commit a write (sequence becomes even).
    #[inline]
    pub fn end_write(&self) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Release);
    }

    /// Number of committed writes.
    #[inline]
    pub fn version(&self) -> u64 {
        self.seq.load(Ordering::Acquire) / 2
    }

    /// Run `read` until it observes a stable, committed state.
    ///
    /// Returns `None` if every attempt raced with a writer.
    pub fn read<T>(&self, retries: u32, mut read: impl FnMut() -> T) -> Option<T> {
        for _ in 0..=retries {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let value = read();
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return Some(value);
            }
        }
        None
    }
}

// ─── External Control Side Channel ──────────────────────────────────

#[derive(Debug, Default)]
struct ExternalInner {
    seq: SeqCounter,
    words: [AtomicU32; 4],
    /// Serializes submitters; never taken by the control cycle.
    writer: Mutex<()>,
}

/// Side channel through which actuator commands are injected when the
/// stabilizer runs in external-control mode.
///
/// Any thread may submit; the control cycle reads a consistent snapshot
/// without blocking.
#[derive(Debug, Clone, Default)]
pub struct ExternalControl {
    inner: Arc<ExternalInner>,
}

impl ExternalControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new command.
    pub fn submit(&self, control: ControlOutput) {
        let _guard = self.inner.writer.lock();
        let seq = &self.inner.seq;
        seq.begin_write();
        let w = &self.inner.words;
        w[0].store(control.roll.to_bits(), Ordering::Relaxed);
        w[1].store(control.pitch.to_bits(), Ordering::Relaxed);
        w[2].store(control.yaw.to_bits(), Ordering::Relaxed);
        w[3].store(control.thrust.to_bits(), Ordering::Relaxed);
        seq.end_write();
    }

    /// Latest committed command, or `None` if the read raced a writer on
    /// every attempt. Before the first submit this is `ControlOutput::IDLE`.
    pub fn latest(&self) -> Option<ControlOutput> {
        let w = &self.inner.words;
        self.inner.seq.read(READ_RETRIES, || ControlOutput {
            roll: f32::from_bits(w[0].load(Ordering::Relaxed)),
            pitch: f32::from_bits(w[1].load(Ordering::Relaxed)),
            yaw: f32::from_bits(w[2].load(Ordering::Relaxed)),
            thrust: f32::from_bits(w[3].load(Ordering::Relaxed)),
        })
    }

    /// Number of submitted commands.
    pub fn version(&self) -> u64 {
        self.inner.seq.version()
    }
}
