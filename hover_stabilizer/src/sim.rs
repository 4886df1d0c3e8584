//! Simulated collaborators used by the binary when no hardware is attached.
//!
//! The IMU reports a slowly oscillating body with gravity on +Z, the
//! estimator is a first-order complementary filter, the controller is a
//! proportional attitude loop and the power stage only records what it was
//! asked to do.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, info};

use hover_common::types::{
    Attitude, Axis3, ControlOutput, ControllerKind, EstimatorKind, SensorSample, Setpoint,
    VehicleState,
};

use crate::collab::{
    Collaborators, Controller, Estimator, HoldSetpoint, PowerStage, SensorSource,
    SituationAwareness,
};

/// Nominal sample interval [s].
const DT: f32 = 0.001;
/// Calibration polls before the simulated IMU reports calibrated.
const CALIBRATION_POLLS: u32 = 50;
/// Hover thrust of the simulated airframe [raw units].
pub const HOVER_THRUST: f32 = 36_000.0;

// ─── IMU ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimImu {
    polls: AtomicU32,
    samples: AtomicU64,
}

impl SensorSource for SimImu {
    fn init(&mut self) {
        debug!("sim IMU initialized");
    }

    fn self_test(&mut self) -> bool {
        true
    }

    fn is_calibrated(&self) -> bool {
        self.polls.fetch_add(1, Ordering::Relaxed) >= CALIBRATION_POLLS
    }

    fn latest_sample(&self) -> SensorSample {
        let n = self.samples.fetch_add(1, Ordering::Relaxed);
        let t = n as f32 * DT;
        let rate = 20.0 * (t * std::f32::consts::TAU * 0.5).cos();
        SensorSample::new(Axis3::new(0.0, 0.0, 1.0), Axis3::new(rate, -rate * 0.5, 0.0))
    }
}

// ─── Estimator ──────────────────────────────────────────────────────

/// Complementary filter: gyro integration pulled toward the accelerometer
/// tilt.
#[derive(Debug, Clone, Copy)]
pub struct SimEstimator {
    kind: EstimatorKind,
    alpha: f32,
}

impl Default for SimEstimator {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::Complementary,
            alpha: 0.98,
        }
    }
}

impl Estimator for SimEstimator {
    fn init(&mut self, kind: EstimatorKind) -> EstimatorKind {
        self.kind = match kind {
            EstimatorKind::Any => EstimatorKind::Complementary,
            k => k,
        };
        self.kind
    }

    fn self_test(&mut self) -> bool {
        true
    }

    fn estimate(
        &mut self,
        state: &mut VehicleState,
        sample: &SensorSample,
        _prior_control: &ControlOutput,
        _tick: u64,
    ) {
        let a = sample.acc;
        let acc_roll = a.y.atan2(a.z).to_degrees();
        let acc_pitch = (-a.x).atan2((a.y * a.y + a.z * a.z).sqrt()).to_degrees();
        let att = &mut state.attitude;
        att.roll = self.alpha * (att.roll + sample.gyro.x * DT) + (1.0 - self.alpha) * acc_roll;
        att.pitch =
            self.alpha * (att.pitch + sample.gyro.y * DT) + (1.0 - self.alpha) * acc_pitch;
        att.yaw += sample.gyro.z * DT;
        if att.yaw > 180.0 {
            att.yaw -= 360.0;
        } else if att.yaw < -180.0 {
            att.yaw += 360.0;
        }
        state.acc = Axis3::new(a.x, a.y, a.z - 1.0);
    }
}

// ─── Controller ─────────────────────────────────────────────────────

/// Proportional attitude controller.
#[derive(Debug, Clone, Copy)]
pub struct SimController {
    kind: ControllerKind,
    kp: f32,
}

impl Default for SimController {
    fn default() -> Self {
        Self {
            kind: ControllerKind::Pid,
            kp: 50.0,
        }
    }
}

impl Controller for SimController {
    fn init(&mut self, kind: ControllerKind) -> ControllerKind {
        self.kind = match kind {
            ControllerKind::Any => ControllerKind::Pid,
            k => k,
        };
        self.kind
    }

    fn self_test(&mut self) -> bool {
        true
    }

    fn compute(
        &mut self,
        setpoint: &Setpoint,
        _sample: &SensorSample,
        state: &VehicleState,
        _tick: u64,
    ) -> ControlOutput {
        let err = |sp: f32, est: f32| self.kp * (sp - est);
        ControlOutput {
            roll: err(setpoint.attitude.roll, state.attitude.roll),
            pitch: err(setpoint.attitude.pitch, state.attitude.pitch),
            yaw: err(setpoint.attitude_rate.yaw, 0.0),
            thrust: setpoint.thrust,
        }
    }
}

// ─── Power Stage ────────────────────────────────────────────────────

/// Counters shared between a [`SimPowerStage`] and its observers.
#[derive(Debug, Default)]
pub struct PowerCounters {
    pub distributed: AtomicU64,
    pub safe_stops: AtomicU64,
}

#[derive(Debug, Default)]
pub struct SimPowerStage {
    counters: Arc<PowerCounters>,
    last: ControlOutput,
}

impl SimPowerStage {
    pub fn new(counters: Arc<PowerCounters>) -> Self {
        Self {
            counters,
            last: ControlOutput::IDLE,
        }
    }

    pub fn last(&self) -> ControlOutput {
        self.last
    }
}

impl PowerStage for SimPowerStage {
    fn init(&mut self) {
        debug!("sim power stage initialized");
    }

    fn self_test(&mut self) -> bool {
        true
    }

    fn distribute(&mut self, control: &ControlOutput, _tick: u64) {
        self.last = *control;
        self.counters.distributed.fetch_add(1, Ordering::Relaxed);
    }

    fn safe_stop(&mut self) {
        self.last = ControlOutput::IDLE;
        self.counters.safe_stops.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Situation Awareness ────────────────────────────────────────────

/// Cuts thrust when the vehicle is tumbling.
#[derive(Debug, Clone, Copy)]
pub struct TumbleGuard {
    /// Tilt beyond which thrust is cut [deg].
    pub max_tilt: f32,
}

impl Default for TumbleGuard {
    fn default() -> Self {
        Self { max_tilt: 60.0 }
    }
}

impl SituationAwareness for TumbleGuard {
    fn init(&mut self) {
        info!(max_tilt = self.max_tilt, "tumble guard armed");
    }

    fn update_setpoint(
        &mut self,
        setpoint: &mut Setpoint,
        _sample: &SensorSample,
        state: &VehicleState,
    ) {
        let Attitude { roll, pitch, .. } = state.attitude;
        if roll.abs() > self.max_tilt || pitch.abs() > self.max_tilt {
            setpoint.thrust = 0.0;
        }
    }
}

/// Full simulated collaborator set holding a level hover.
pub fn collaborators() -> Collaborators {
    collaborators_with(Arc::new(PowerCounters::default()))
}

/// Simulated collaborators reporting actuation to `counters`.
pub fn collaborators_with(counters: Arc<PowerCounters>) -> Collaborators {
    let hover = Setpoint {
        thrust: HOVER_THRUST,
        ..Default::default()
    };
    Collaborators::new(
        Box::new(SimImu::default()),
        Box::new(SimEstimator::default()),
        Box::new(SimController::default()),
        Box::new(SimPowerStage::new(counters)),
    )
    .with_commander(Box::new(HoldSetpoint(hover)))
    .with_situation_awareness(Box::new(TumbleGuard::default()))
}
