//! Stabilization cycle: sample → estimate → control → telemetry → interlock
//! → actuation.
//!
//! [`StabilizationCycle`] is the context object owned by the control thread.
//! It holds the collaborators, the vehicle state, the tick counter and the
//! registry cells it publishes. One call to [`StabilizationCycle::run_once`]
//! is one tick:
//!
//! 1. Latest sensor sample (non-blocking).
//! 2. Estimator refreshes the vehicle state.
//! 3. Control output from the controller or the external side channel.
//! 4. Telemetry publication.
//! 5. Interlock countdown.
//! 6. `safe_stop()` when stopped, otherwise `distribute()` exactly once.
//! 7. Tick counter increment.
//!
//! With `control.hot_swap` enabled the registry parameters
//! `stabilizer.estimator` / `stabilizer.controller` are compared against the
//! active kinds before step 1 and the collaborator is re-initialized on
//! change.

use tracing::{debug, info, warn};

use hover_common::registry::{RegistryError, VarAccess, VarCell, VarRegistry};
use hover_common::types::{
    ControlOutput, ControllerKind, EstimatorKind, SensorSample, Setpoint, VehicleState,
};

use crate::collab::{Collaborators, SelfTestReport};
use crate::config::{ControlMode, StabilizerConfig};
use crate::safety::InterlockHandle;
use crate::snapshot::ExternalControl;
use crate::telemetry::{TelemetryPublisher, TelemetryReader};

/// Registry group of the stabilizer parameters and counters.
pub const PARAM_GROUP: &str = "stabilizer";

/// First tick of the periodic phase.
pub const FIRST_TICK: u64 = 1;

// ─── Cycle Report ───────────────────────────────────────────────────

/// What the cycle did with the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    /// `distribute()` was called with the cycle's control output.
    Distributed,
    /// The interlock was stopped; `safe_stop()` was called instead.
    SafeStopped,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Tick that was executed.
    pub tick: u64,
    pub actuation: Actuation,
    /// The interlock countdown elapsed on this tick.
    pub countdown_fired: bool,
    pub control: ControlOutput,
}

/// Registry cells owned by the cycle.
#[derive(Debug, Clone)]
struct ParamCells {
    estimator: VarCell,
    controller: VarCell,
    missed: VarCell,
    tick: VarCell,
}

impl ParamCells {
    fn new(estimator: EstimatorKind, controller: ControllerKind) -> Self {
        Self {
            estimator: VarCell::new_u8(estimator as u8),
            controller: VarCell::new_u8(controller as u8),
            missed: VarCell::new_u32(0),
            tick: VarCell::new_u32(0),
        }
    }

    fn register(&self, registry: &dyn VarRegistry) -> Result<(), RegistryError> {
        let cells = [
            ("estimator", VarAccess::ReadWrite, &self.estimator),
            ("controller", VarAccess::ReadWrite, &self.controller),
            ("missed", VarAccess::ReadOnly, &self.missed),
            ("tick", VarAccess::ReadOnly, &self.tick),
        ];
        for (name, access, cell) in cells {
            registry.register(PARAM_GROUP, name, access, cell.clone())?;
        }
        Ok(())
    }
}

/// Run the collaborator self-tests without short-circuiting.
///
/// The power-stage test drives the motors, so it only runs when
/// `include_power_stage` is set.
pub fn run_self_test(collab: &mut Collaborators, include_power_stage: bool) -> SelfTestReport {
    let mut report = SelfTestReport::empty();
    report.set(SelfTestReport::SENSORS, collab.sensors.self_test());
    report.set(SelfTestReport::ESTIMATOR, collab.estimator.self_test());
    report.set(SelfTestReport::CONTROLLER, collab.controller.self_test());
    if include_power_stage {
        report.set(SelfTestReport::POWER_STAGE, collab.power.self_test());
    }
    report
}

// ─── Stabilization Cycle ────────────────────────────────────────────

/// Context object of the control thread.
pub struct StabilizationCycle {
    mode: ControlMode,
    hot_swap: bool,
    include_power_stage: bool,

    collab: Collaborators,
    interlock: InterlockHandle,
    external: ExternalControl,
    telemetry: TelemetryPublisher,
    params: ParamCells,

    active_estimator: EstimatorKind,
    active_controller: ControllerKind,

    state: VehicleState,
    setpoint: Setpoint,
    control: ControlOutput,

    /// Next tick to execute.
    tick: u64,
    was_tripped: bool,
    distributed: u64,
    safe_stopped: u64,
}

impl StabilizationCycle {
    /// Initialize the collaborators and register all variables.
    ///
    /// The situation-awareness module is only wired when the active
    /// estimator is Kalman; otherwise it is dropped.
    pub fn new(
        config: &StabilizerConfig,
        mut collab: Collaborators,
        interlock: InterlockHandle,
        external: ExternalControl,
        registry: &dyn VarRegistry,
        estimator_selection: EstimatorKind,
    ) -> Result<Self, RegistryError> {
        collab.sensors.init();
        let active_estimator = collab.estimator.init(estimator_selection);
        let active_controller = collab.controller.init(config.control.controller);
        collab.power.init();

        if active_estimator == EstimatorKind::Kalman {
            if let Some(sitaw) = collab.situation_awareness.as_mut() {
                sitaw.init();
                info!("situation awareness enabled");
            }
        } else {
            collab.situation_awareness = None;
        }

        let telemetry = TelemetryPublisher::new(&config.telemetry);
        telemetry.register(registry)?;
        let params = ParamCells::new(active_estimator, active_controller);
        params.register(registry)?;

        info!(
            estimator = ?active_estimator,
            controller = ?active_controller,
            mode = ?config.control.mode,
            hot_swap = config.control.hot_swap,
            "stabilization cycle initialized"
        );

        Ok(Self {
            mode: config.control.mode,
            hot_swap: config.control.hot_swap,
            include_power_stage: config.self_test.include_power_stage,
            collab,
            interlock,
            external,
            telemetry,
            params,
            active_estimator,
            active_controller,
            state: VehicleState::default(),
            setpoint: Setpoint::default(),
            control: ControlOutput::IDLE,
            tick: FIRST_TICK,
            was_tripped: false,
            distributed: 0,
            safe_stopped: 0,
        })
    }

    /// Execute one tick.
    pub fn run_once(&mut self) -> CycleReport {
        let tick = self.tick;

        if self.hot_swap {
            self.apply_hot_swap();
        }

        // 1. Sample.
        let sample = self.collab.sensors.latest_sample();

        // 2. Estimate.
        self.collab
            .estimator
            .estimate(&mut self.state, &sample, &self.control, tick);

        // 3. Control.
        self.control = self.compute_control(&sample, tick);

        // 4. Telemetry.
        self.telemetry.publish(&sample, &self.state);

        // 5. Interlock countdown.
        let (interlock, countdown_fired) = self.interlock.tick();
        if countdown_fired {
            warn!(tick, "emergency stop timeout elapsed");
        }

        // 6. Actuation.
        let tripped = interlock.is_tripped();
        let actuation = if tripped {
            if !self.was_tripped {
                warn!(tick, "emergency stop active, holding actuators safe");
            }
            self.collab.power.safe_stop();
            self.safe_stopped += 1;
            Actuation::SafeStopped
        } else {
            if self.was_tripped {
                info!(tick, "emergency stop cleared, actuation resumed");
            }
            self.collab.power.distribute(&self.control, tick);
            self.distributed += 1;
            Actuation::Distributed
        };
        self.was_tripped = tripped;

        // 7. Tick.
        self.params.tick.set_u32(tick as u32);
        self.tick += 1;

        CycleReport {
            tick,
            actuation,
            countdown_fired,
            control: self.control,
        }
    }

    fn compute_control(&mut self, sample: &SensorSample, tick: u64) -> ControlOutput {
        match self.mode {
            ControlMode::Controller => {
                self.collab.commander.setpoint(&mut self.setpoint, &self.state);
                if let Some(sitaw) = self.collab.situation_awareness.as_mut() {
                    sitaw.update_setpoint(&mut self.setpoint, sample, &self.state);
                }
                self.collab
                    .controller
                    .compute(&self.setpoint, sample, &self.state, tick)
            }
            // A read that raced every retry keeps last tick's command.
            ControlMode::External => self.external.latest().unwrap_or(self.control),
        }
    }

    /// Re-initialize estimator/controller whose registry parameter changed.
    ///
    /// The parameter is written back with the kind actually activated, so an
    /// unknown value reverts to the active kind.
    fn apply_hot_swap(&mut self) {
        let requested = self.params.estimator.get_u8();
        if requested != self.active_estimator as u8 {
            match EstimatorKind::from_u8(requested) {
                Some(kind) => {
                    let active = self.collab.estimator.init(kind);
                    info!(requested = ?kind, active = ?active, "estimator switched");
                    self.active_estimator = active;
                }
                None => warn!(value = requested, "invalid estimator parameter ignored"),
            }
            self.params.estimator.set_u8(self.active_estimator as u8);
        }

        let requested = self.params.controller.get_u8();
        if requested != self.active_controller as u8 {
            match ControllerKind::from_u8(requested) {
                Some(kind) => {
                    let active = self.collab.controller.init(kind);
                    info!(requested = ?kind, active = ?active, "controller switched");
                    self.active_controller = active;
                }
                None => warn!(value = requested, "invalid controller parameter ignored"),
            }
            self.params.controller.set_u8(self.active_controller as u8);
        }
    }

    /// Evaluate every collaborator self-test.
    pub fn self_test_report(&mut self) -> SelfTestReport {
        run_self_test(&mut self.collab, self.include_power_stage)
    }

    /// True iff sensors, estimator and controller pass (plus the power stage
    /// when configured).
    pub fn self_test(&mut self) -> bool {
        let report = self.self_test_report();
        let pass = report.passed(self.include_power_stage);
        debug!(?report, pass, "self test");
        pass
    }

    pub fn sensors_calibrated(&self) -> bool {
        self.collab.sensors.is_calibrated()
    }

    /// Publish the loop's missed-deadline count.
    pub fn record_missed(&self, missed: u64) {
        self.params.missed.set_u32(missed.min(u32::MAX as u64) as u32);
    }

    /// Last completed tick (0 before the first cycle).
    pub fn last_tick(&self) -> u64 {
        self.tick - FIRST_TICK
    }

    pub fn active_estimator(&self) -> EstimatorKind {
        self.active_estimator
    }

    pub fn active_controller(&self) -> ControllerKind {
        self.active_controller
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn control(&self) -> &ControlOutput {
        &self.control
    }

    pub fn has_situation_awareness(&self) -> bool {
        self.collab.situation_awareness.is_some()
    }

    /// Number of ticks that called `distribute()`.
    pub fn distributed_count(&self) -> u64 {
        self.distributed
    }

    /// Number of ticks that called `safe_stop()`.
    pub fn safe_stop_count(&self) -> u64 {
        self.safe_stopped
    }

    pub fn interlock(&self) -> &InterlockHandle {
        &self.interlock
    }

    /// Shared handle on the published `stabilizer.tick` cell.
    pub fn tick_cell(&self) -> VarCell {
        self.params.tick.clone()
    }

    pub fn telemetry(&self) -> TelemetryReader {
        self.telemetry.reader()
    }
}

impl std::fmt::Debug for StabilizationCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StabilizationCycle")
            .field("mode", &self.mode)
            .field("tick", &self.tick)
            .field("estimator", &self.active_estimator)
            .field("controller", &self.active_controller)
            .field("interlock", &self.interlock.snapshot())
            .finish_non_exhaustive()
    }
}
