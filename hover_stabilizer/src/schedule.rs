//! Fixed-rate scheduling loop.
//!
//! Absolute-time pacing: every wake target is the previous target plus one
//! period, so timing error never accumulates. A cycle that overruns its
//! period is not repeated or skipped; the next target is simply already in
//! the past and the loop runs the next cycle immediately.
//!
//! ## Startup
//! 1. Block on the readiness gate.
//! 2. Poll sensor calibration once per period (no cycles, no ticks).
//! 3. Enter the periodic phase.
//!
//! ## Clocks
//! With the `rt` feature [`MonotonicClock`] sleeps with
//! `clock_nanosleep(CLOCK_MONOTONIC, TIMER_ABSTIME)`. Without it, the wake
//! uses `std::thread::sleep` against absolute targets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::collab::ReadinessGate;
use crate::cycle::StabilizationCycle;

// ─── Errors ─────────────────────────────────────────────────────────

/// Fatal scheduling conditions.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Sensors did not report calibrated within the configured budget.
    #[error("sensor calibration timed out after {polls} polls")]
    CalibrationTimeout { polls: u64 },

    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Monotonic time source with absolute-deadline sleep.
pub trait Clock: Send {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Sleep until `deadline` (same origin as `now`). Returns immediately
    /// if the deadline has passed.
    fn sleep_until(&mut self, deadline: Duration);
}

/// Host monotonic clock.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    #[cfg(not(feature = "rt"))]
    origin: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(feature = "rt"))]
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(not(feature = "rt"))]
impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&mut self, deadline: Duration) {
        if let Some(remaining) = deadline.checked_sub(self.now()) {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(feature = "rt")]
impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        use nix::time::{ClockId, clock_gettime};
        // CLOCK_MONOTONIC is always supported on Linux.
        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map(|ts| Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
            .unwrap_or_default()
    }

    fn sleep_until(&mut self, deadline: Duration) {
        use nix::errno::Errno;
        use nix::sys::time::TimeSpec;
        use nix::time::{ClockId, ClockNanosleepFlags, clock_nanosleep};

        let target = TimeSpec::from(deadline);
        loop {
            match clock_nanosleep(
                ClockId::CLOCK_MONOTONIC,
                ClockNanosleepFlags::TIMER_ABSTIME,
                &target,
            ) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
    }
}

// ─── Pacer ──────────────────────────────────────────────────────────

/// Delay-until pacing: advances an absolute wake target by one period per
/// call.
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    next_wake: Duration,
    missed: u64,
}

impl Pacer {
    /// Pacer whose first wake is `start + period`.
    pub fn new(start: Duration, period: Duration) -> Self {
        Self {
            period,
            next_wake: start,
            missed: 0,
        }
    }

    /// Advance the target by one period and sleep until it.
    ///
    /// Returns `true` if the target had already passed (missed deadline).
    pub fn wait_next<C: Clock + ?Sized>(&mut self, clock: &mut C) -> bool {
        self.next_wake += self.period;
        let missed = clock.now() > self.next_wake;
        if missed {
            self.missed += 1;
        } else {
            clock.sleep_until(self.next_wake);
        }
        missed
    }

    /// Most recent wake target.
    pub fn target(&self) -> Duration {
        self.next_wake
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Missed deadlines so far.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

// ─── Cycle Body ─────────────────────────────────────────────────────

/// Work driven by the scheduling loop.
pub trait CycleBody: Send {
    fn sensors_calibrated(&mut self) -> bool;

    /// Run one tick.
    fn run_cycle(&mut self);

    /// Called with the running total whenever a deadline is missed.
    fn on_missed_deadline(&mut self, _missed: u64) {}
}

impl CycleBody for StabilizationCycle {
    fn sensors_calibrated(&mut self) -> bool {
        StabilizationCycle::sensors_calibrated(self)
    }

    fn run_cycle(&mut self) {
        self.run_once();
    }

    fn on_missed_deadline(&mut self, missed: u64) {
        self.record_missed(missed);
    }
}

/// Shared body. The lock is held for one tick at a time, which lets other
/// threads (self test, introspection) interleave between ticks.
impl<B: CycleBody + ?Sized> CycleBody for Arc<Mutex<B>> {
    fn sensors_calibrated(&mut self) -> bool {
        self.lock().sensors_calibrated()
    }

    fn run_cycle(&mut self) {
        self.lock().run_cycle();
    }

    fn on_missed_deadline(&mut self, missed: u64) {
        self.lock().on_missed_deadline(missed);
    }
}

// ─── Cycle Statistics ───────────────────────────────────────────────

/// Timing of the periodic phase against the loop period.
///
/// Every tick's body has one period as its budget (1 ms at the default
/// 1 kHz). All values are nanoseconds of the loop's [`Clock`]. Recording is
/// O(1) and allocation-free, so it runs on the control thread.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Loop period.
    pub budget_ns: u64,
    pub cycle_count: u64,
    /// Shortest body (0 before the first tick).
    pub min_cycle_ns: u64,
    pub max_cycle_ns: u64,
    /// Largest lateness of a wake relative to its absolute target.
    pub max_latency_ns: u64,
    /// Ticks whose body took longer than `budget_ns`.
    pub overruns: u64,
    sum_ns: u128,
    sum_sq_ns: u128,
}

impl CycleStats {
    pub fn with_budget(period: Duration) -> Self {
        Self {
            budget_ns: saturating_ns(period),
            ..Self::default()
        }
    }

    /// Account one tick: body duration and wake latency.
    #[inline]
    pub fn record(&mut self, body: Duration, latency: Duration) {
        let ns = saturating_ns(body);
        self.min_cycle_ns = if self.cycle_count == 0 {
            ns
        } else {
            self.min_cycle_ns.min(ns)
        };
        self.max_cycle_ns = self.max_cycle_ns.max(ns);
        self.max_latency_ns = self.max_latency_ns.max(saturating_ns(latency));
        if ns > self.budget_ns {
            self.overruns += 1;
        }
        self.cycle_count += 1;
        self.sum_ns += u128::from(ns);
        self.sum_sq_ns += u128::from(ns) * u128::from(ns);
    }

    /// Mean body duration (0 before the first tick).
    pub fn avg_cycle_ns(&self) -> u64 {
        match self.cycle_count {
            0 => 0,
            n => (self.sum_ns / u128::from(n)) as u64,
        }
    }

    /// Population standard deviation of the body duration.
    pub fn stddev_cycle_ns(&self) -> f64 {
        if self.cycle_count < 2 {
            return 0.0;
        }
        let n = self.cycle_count as f64;
        let mean = self.sum_ns as f64 / n;
        (self.sum_sq_ns as f64 / n - mean * mean).max(0.0).sqrt()
    }

    /// Worst tick as a fraction of the budget; above 1.0 means an overrun.
    pub fn peak_utilization(&self) -> f64 {
        if self.budget_ns == 0 {
            return 0.0;
        }
        self.max_cycle_ns as f64 / self.budget_ns as f64
    }
}

fn saturating_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

// ─── Scheduling Loop ────────────────────────────────────────────────

/// Outcome of a loop run.
#[derive(Debug, Clone)]
pub struct LoopSummary {
    /// Cycles executed in the periodic phase.
    pub cycles: u64,
    /// Calibration polls before the periodic phase.
    pub calibration_polls: u64,
    /// Missed wake deadlines.
    pub missed: u64,
    pub stats: CycleStats,
}

/// Fixed-rate driver of a [`CycleBody`].
pub struct SchedulingLoop<C: Clock> {
    clock: C,
    period: Duration,
    calibration_timeout: Option<u64>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Clock> SchedulingLoop<C> {
    pub fn new(clock: C, period: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            clock,
            period,
            calibration_timeout: None,
            shutdown,
        }
    }

    /// Fail the calibration wait after `polls` unsuccessful polls.
    pub fn with_calibration_timeout(mut self, polls: Option<u64>) -> Self {
        self.calibration_timeout = polls;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run until shutdown is requested or `limit` cycles have executed.
    ///
    /// Shutdown is only observed between cycles.
    pub fn run<B, G>(
        &mut self,
        gate: &G,
        body: &mut B,
        limit: Option<u64>,
    ) -> Result<LoopSummary, LoopError>
    where
        B: CycleBody + ?Sized,
        G: ReadinessGate + ?Sized,
    {
        gate.wait_until_system_started();
        debug!("system started");

        let mut pacer = Pacer::new(self.clock.now(), self.period);
        let mut summary = LoopSummary {
            cycles: 0,
            calibration_polls: 0,
            missed: 0,
            stats: CycleStats::with_budget(self.period),
        };

        // ── Calibration wait ──
        while !body.sensors_calibrated() {
            summary.calibration_polls += 1;
            if self
                .calibration_timeout
                .is_some_and(|limit| summary.calibration_polls >= limit)
            {
                return Err(LoopError::CalibrationTimeout {
                    polls: summary.calibration_polls,
                });
            }
            if self.stopping() {
                return Ok(summary);
            }
            pacer.wait_next(&mut self.clock);
        }
        info!(polls = summary.calibration_polls, "sensors calibrated");

        // ── Periodic phase ──
        while !self.stopping() && limit.is_none_or(|n| summary.cycles < n) {
            if pacer.wait_next(&mut self.clock) {
                debug!(missed = pacer.missed(), "deadline missed");
                body.on_missed_deadline(pacer.missed());
            }
            let woke = self.clock.now();
            let latency = woke.saturating_sub(pacer.target());

            body.run_cycle();

            let body_time = self.clock.now().saturating_sub(woke);
            summary.stats.record(body_time, latency);
            summary.cycles += 1;
        }

        summary.missed = pacer.missed();
        info!(
            cycles = summary.cycles,
            missed = summary.missed,
            overruns = summary.stats.overruns,
            avg_ns = summary.stats.avg_cycle_ns(),
            max_ns = summary.stats.max_cycle_ns,
            max_latency_ns = summary.stats.max_latency_ns,
            peak_utilization = summary.stats.peak_utilization(),
            "scheduling loop stopped"
        );
        Ok(summary)
    }
}
