//! Stabilizer facade: one-time init, control thread and the operations
//! exposed to the rest of the system.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hover_common::prelude::*;
//! use hover_stabilizer::collab::StartGate;
//! use hover_stabilizer::config::StabilizerConfig;
//! use hover_stabilizer::sim;
//! use hover_stabilizer::stabilizer::Stabilizer;
//!
//! let registry = Arc::new(MemoryRegistry::new());
//! let gate = Arc::new(StartGate::new());
//! let mut stab = Stabilizer::new(
//!     StabilizerConfig::default(),
//!     sim::collaborators(),
//!     registry,
//!     gate.clone(),
//! );
//! stab.init(EstimatorKind::Any).unwrap();
//! gate.release();
//! stab.emergency_stop();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use hover_common::registry::{VarCell, VarRegistry};
use hover_common::types::{ControlOutput, EstimatorKind};

use crate::collab::{Collaborators, ReadinessGate};
use crate::config::StabilizerConfig;
use crate::cycle::{StabilizationCycle, run_self_test};
use crate::error::StabilizerError;
use crate::rt::rt_setup;
use crate::safety::InterlockHandle;
use crate::schedule::{LoopError, LoopSummary, MonotonicClock, SchedulingLoop};
use crate::snapshot::ExternalControl;
use crate::telemetry::TelemetryReader;

/// Name of the control thread.
pub const THREAD_NAME: &str = "stabilizer";

struct Running {
    cycle: Arc<Mutex<StabilizationCycle>>,
    telemetry: TelemetryReader,
    tick: VarCell,
    thread: Option<JoinHandle<Result<LoopSummary, LoopError>>>,
}

/// Owner of the stabilizer core.
pub struct Stabilizer {
    config: StabilizerConfig,
    registry: Arc<dyn VarRegistry>,
    gate: Arc<dyn ReadinessGate>,
    interlock: InterlockHandle,
    external: ExternalControl,
    shutdown: Arc<AtomicBool>,
    cycle_limit: Option<u64>,
    /// Consumed by `init`.
    pending: Option<Collaborators>,
    running: Option<Running>,
}

impl Stabilizer {
    pub fn new(
        config: StabilizerConfig,
        collab: Collaborators,
        registry: Arc<dyn VarRegistry>,
        gate: Arc<dyn ReadinessGate>,
    ) -> Self {
        Self {
            config,
            registry,
            gate,
            interlock: InterlockHandle::new(),
            external: ExternalControl::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            cycle_limit: None,
            pending: Some(collab),
            running: None,
        }
    }

    /// Stop the loop on its own after `cycles` periodic cycles.
    pub fn with_cycle_limit(mut self, cycles: Option<u64>) -> Self {
        self.cycle_limit = cycles;
        self
    }

    /// Initialize collaborators, register variables and start the control
    /// thread.
    ///
    /// After a successful call further calls are no-ops. A failed call
    /// consumes the collaborators and leaves registrations behind, so every
    /// later call returns [`StabilizerError::InitFailed`].
    pub fn init(&mut self, estimator: EstimatorKind) -> Result<(), StabilizerError> {
        if self.running.is_some() {
            debug!("stabilizer already initialized");
            return Ok(());
        }
        let Some(collab) = self.pending.take() else {
            return Err(StabilizerError::InitFailed);
        };

        let cycle = StabilizationCycle::new(
            &self.config,
            collab,
            self.interlock.clone(),
            self.external.clone(),
            self.registry.as_ref(),
            estimator,
        )?;
        let telemetry = cycle.telemetry();
        let tick = cycle.tick_cell();
        let cycle = Arc::new(Mutex::new(cycle));

        let schedule = self.config.schedule.clone();
        let period = schedule.period();
        let gate = Arc::clone(&self.gate);
        let shutdown = Arc::clone(&self.shutdown);
        let limit = self.cycle_limit;
        let mut body = Arc::clone(&cycle);

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                rt_setup(&schedule)?;
                SchedulingLoop::new(MonotonicClock::new(), period, shutdown)
                    .with_calibration_timeout(schedule.calibration_timeout_cycles)
                    .run(gate.as_ref(), &mut body, limit)
            })
            .map_err(StabilizerError::TaskSpawn)?;

        info!(
            rate_hz = self.config.schedule.rate_hz,
            ?estimator,
            "stabilizer control thread started"
        );
        self.running = Some(Running {
            cycle,
            telemetry,
            tick,
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// True iff the sensor, estimator and controller self-tests pass (and
    /// the power stage, when `self_test.include_power_stage` is set).
    ///
    /// Once running, the tests execute between two ticks while holding the
    /// cycle lock, so the next tick waits for them. Always false after a
    /// failed `init`.
    pub fn self_test(&mut self) -> bool {
        let include_power = self.config.self_test.include_power_stage;
        match (&self.running, self.pending.as_mut()) {
            (Some(running), _) => running.cycle.lock().self_test(),
            (None, Some(collab)) => run_self_test(collab, include_power).passed(include_power),
            (None, None) => false,
        }
    }

    // ── Emergency stop ──

    /// Stop actuation from the next cycle on.
    pub fn emergency_stop(&self) {
        self.interlock.trip();
        warn!("emergency stop requested");
    }

    /// Re-arm and disable the countdown.
    pub fn emergency_stop_reset(&self) {
        self.interlock.reset();
        info!("emergency stop reset");
    }

    /// Re-arm and stop automatically after `ticks` cycles unless re-armed
    /// again. Negative `ticks` disables the countdown.
    pub fn emergency_stop_arm_with_timeout(&self, ticks: i32) {
        self.interlock.arm_with_timeout(ticks);
        debug!(ticks, "emergency stop armed with timeout");
    }

    pub fn interlock(&self) -> &InterlockHandle {
        &self.interlock
    }

    /// Side channel for commands in external-control mode.
    pub fn external_control(&self) -> &ExternalControl {
        &self.external
    }

    /// Submit a command through the external-control side channel.
    pub fn submit_control(&self, control: ControlOutput) {
        self.external.submit(control);
    }

    /// Telemetry reader, available after `init`.
    pub fn telemetry(&self) -> Option<TelemetryReader> {
        self.running.as_ref().map(|r| r.telemetry.clone())
    }

    /// Last completed tick (0 before init or before the first cycle).
    ///
    /// Read from the published `stabilizer.tick` cell; never blocks the
    /// control thread.
    pub fn last_tick(&self) -> u64 {
        self.running
            .as_ref()
            .map_or(0, |r| u64::from(r.tick.get_u32()))
    }

    /// Run `f` against the cycle between two ticks.
    ///
    /// The cycle lock is held while `f` runs and the next tick waits for it;
    /// keep `f` short.
    pub fn with_cycle<R>(&self, f: impl FnOnce(&StabilizationCycle) -> R) -> Option<R> {
        self.running.as_ref().map(|r| f(&r.cycle.lock()))
    }

    /// Handle that requests loop shutdown; usable from signal handlers.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Request shutdown. Observed between cycles.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Wait for the control thread to finish.
    pub fn join(&mut self) -> Result<LoopSummary, StabilizerError> {
        let handle = self
            .running
            .as_mut()
            .and_then(|r| r.thread.take())
            .ok_or(StabilizerError::NotRunning)?;
        match handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("control thread panicked");
                Err(StabilizerError::TaskPanicked)
            }
        }
    }
}

impl Drop for Stabilizer {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.running.as_mut().and_then(|r| r.thread.take()) {
            // The gate may never open; detach rather than block.
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}
