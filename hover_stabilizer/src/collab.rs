//! Contracts of the collaborators driven by the stabilizer.
//!
//! Sensor drivers, the estimator, the controller, the power stage and the
//! commander live outside this crate. The stabilizer only calls them through
//! the traits below; all of them run on the control thread and must return
//! without blocking.

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use hover_common::types::{
    ControlOutput, ControllerKind, EstimatorKind, SensorSample, Setpoint, VehicleState,
};

// ─── Per-Tick Collaborators ─────────────────────────────────────────

/// IMU source.
pub trait SensorSource: Send {
    fn init(&mut self) {}

    fn self_test(&mut self) -> bool;

    /// True once bias calibration has completed.
    fn is_calibrated(&self) -> bool;

    /// Latest sample. Must not block.
    fn latest_sample(&self) -> SensorSample;
}

/// State estimator.
pub trait Estimator: Send {
    /// Activate `kind`; returns the kind actually activated.
    fn init(&mut self, kind: EstimatorKind) -> EstimatorKind;

    fn self_test(&mut self) -> bool;

    /// Refresh `state` from this tick's sample.
    fn estimate(
        &mut self,
        state: &mut VehicleState,
        sample: &SensorSample,
        prior_control: &ControlOutput,
        tick: u64,
    );
}

/// Control law.
pub trait Controller: Send {
    /// Activate `kind`; returns the kind actually activated.
    fn init(&mut self, kind: ControllerKind) -> ControllerKind;

    fn self_test(&mut self) -> bool;

    fn compute(
        &mut self,
        setpoint: &Setpoint,
        sample: &SensorSample,
        state: &VehicleState,
        tick: u64,
    ) -> ControlOutput;
}

/// Motor mixing and actuator output.
pub trait PowerStage: Send {
    fn init(&mut self) {}

    fn self_test(&mut self) -> bool;

    /// Apply `control` to the actuators.
    fn distribute(&mut self, control: &ControlOutput, tick: u64);

    /// Drive every actuator to its safe state.
    fn safe_stop(&mut self);
}

/// Setpoint source.
pub trait Commander: Send {
    fn setpoint(&mut self, out: &mut Setpoint, state: &VehicleState);
}

/// Secondary safety-awareness module. May adjust the setpoint before the
/// controller sees it.
pub trait SituationAwareness: Send {
    fn init(&mut self) {}

    fn update_setpoint(
        &mut self,
        setpoint: &mut Setpoint,
        sample: &SensorSample,
        state: &VehicleState,
    );
}

/// Commander that always supplies the same setpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldSetpoint(pub Setpoint);

impl Commander for HoldSetpoint {
    fn setpoint(&mut self, out: &mut Setpoint, _state: &VehicleState) {
        *out = self.0;
    }
}

/// The set of collaborators owned by one stabilization cycle.
pub struct Collaborators {
    pub sensors: Box<dyn SensorSource>,
    pub estimator: Box<dyn Estimator>,
    pub controller: Box<dyn Controller>,
    pub power: Box<dyn PowerStage>,
    pub commander: Box<dyn Commander>,
    /// Wired at init only when the Kalman estimator is selected.
    pub situation_awareness: Option<Box<dyn SituationAwareness>>,
}

impl Collaborators {
    /// Collaborators with a zero [`HoldSetpoint`] commander and no
    /// situation-awareness module.
    pub fn new(
        sensors: Box<dyn SensorSource>,
        estimator: Box<dyn Estimator>,
        controller: Box<dyn Controller>,
        power: Box<dyn PowerStage>,
    ) -> Self {
        Self {
            sensors,
            estimator,
            controller,
            power,
            commander: Box::new(HoldSetpoint::default()),
            situation_awareness: None,
        }
    }

    pub fn with_commander(mut self, commander: Box<dyn Commander>) -> Self {
        self.commander = commander;
        self
    }

    pub fn with_situation_awareness(mut self, module: Box<dyn SituationAwareness>) -> Self {
        self.situation_awareness = Some(module);
        self
    }
}

// ─── Self Test ──────────────────────────────────────────────────────

bitflags! {
    /// Collaborators whose self-test passed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SelfTestReport: u8 {
        const SENSORS     = 0x01;
        const ESTIMATOR   = 0x02;
        const CONTROLLER  = 0x04;
        const POWER_STAGE = 0x08;
    }
}

impl SelfTestReport {
    /// Self-tests that must pass for the stabilizer to report healthy.
    pub const fn required(include_power_stage: bool) -> Self {
        let core = Self::SENSORS.union(Self::ESTIMATOR).union(Self::CONTROLLER);
        if include_power_stage {
            core.union(Self::POWER_STAGE)
        } else {
            core
        }
    }

    pub const fn passed(&self, include_power_stage: bool) -> bool {
        self.contains(Self::required(include_power_stage))
    }
}

// ─── Readiness Gate ─────────────────────────────────────────────────

/// One-time startup barrier.
pub trait ReadinessGate: Send + Sync {
    /// Block until the rest of the system has started.
    fn wait_until_system_started(&self);
}

impl<G: ReadinessGate + ?Sized> ReadinessGate for std::sync::Arc<G> {
    fn wait_until_system_started(&self) {
        (**self).wait_until_system_started();
    }
}

/// Latching start gate. Once released it stays open.
#[derive(Debug, Default)]
pub struct StartGate {
    started: Mutex<bool>,
    cond: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that is already open.
    pub fn released() -> Self {
        Self {
            started: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    /// Open the gate and wake all waiters.
    pub fn release(&self) {
        *self.started.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }
}

impl ReadinessGate for StartGate {
    fn wait_until_system_started(&self) {
        let mut started = self.started.lock();
        while !*started {
            self.cond.wait(&mut started);
        }
    }
}
