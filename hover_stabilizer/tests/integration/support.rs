//! Stub collaborators and a manual clock shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use hover_common::registry::VarRegistry;
use hover_common::types::{
    Axis3, ControlOutput, ControllerKind, EstimatorKind, SensorSample, Setpoint, VehicleState,
};
use hover_stabilizer::collab::{
    Collaborators, Commander, Controller, Estimator, PowerStage, SensorSource,
    SituationAwareness,
};
use hover_stabilizer::config::StabilizerConfig;
use hover_stabilizer::cycle::StabilizationCycle;
use hover_stabilizer::safety::InterlockHandle;
use hover_stabilizer::schedule::{Clock, CycleBody};
use hover_stabilizer::snapshot::ExternalControl;

/// Sample returned by the stub IMU on every tick.
pub const STUB_SAMPLE: SensorSample = SensorSample::new(
    Axis3::new(0.1, -0.2, 1.0),
    Axis3::new(12.5, -30.0, 90.0),
);

/// Actuator call recorded by the stub power stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Act {
    Distribute(u64),
    SafeStop(u64),
}

/// Shared observation and control point for the stubs.
#[derive(Debug)]
pub struct Tally {
    pub calibrated: AtomicBool,
    pub sensors_ok: AtomicBool,
    pub estimator_ok: AtomicBool,
    pub controller_ok: AtomicBool,
    pub power_ok: AtomicBool,

    pub calibration_polls: AtomicU64,
    pub estimator_inits: AtomicU64,
    pub controller_inits: AtomicU64,
    pub sitaw_inits: AtomicU64,
    pub sitaw_updates: AtomicU64,
    pub power_tests: AtomicU64,
    pub current_tick: AtomicU64,
    pub log: Mutex<Vec<Act>>,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            calibrated: AtomicBool::new(true),
            sensors_ok: AtomicBool::new(true),
            estimator_ok: AtomicBool::new(true),
            controller_ok: AtomicBool::new(true),
            power_ok: AtomicBool::new(true),
            calibration_polls: AtomicU64::new(0),
            estimator_inits: AtomicU64::new(0),
            controller_inits: AtomicU64::new(0),
            sitaw_inits: AtomicU64::new(0),
            sitaw_updates: AtomicU64::new(0),
            power_tests: AtomicU64::new(0),
            current_tick: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn distributes(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|a| matches!(a, Act::Distribute(_)))
            .count()
    }

    pub fn safe_stops(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|a| matches!(a, Act::SafeStop(_)))
            .count()
    }

    pub fn actions(&self) -> Vec<Act> {
        self.log.lock().clone()
    }
}

// ─── Stubs ──────────────────────────────────────────────────────────

pub struct StubImu(pub Arc<Tally>);

impl SensorSource for StubImu {
    fn self_test(&mut self) -> bool {
        self.0.sensors_ok.load(Ordering::Relaxed)
    }

    fn is_calibrated(&self) -> bool {
        self.0.calibration_polls.fetch_add(1, Ordering::Relaxed);
        self.0.calibrated.load(Ordering::Relaxed)
    }

    fn latest_sample(&self) -> SensorSample {
        STUB_SAMPLE
    }
}

/// Writes the tick into yaw so telemetry changes every cycle.
pub struct StubEstimator(pub Arc<Tally>);

impl Estimator for StubEstimator {
    fn init(&mut self, kind: EstimatorKind) -> EstimatorKind {
        self.0.estimator_inits.fetch_add(1, Ordering::Relaxed);
        match kind {
            EstimatorKind::Any => EstimatorKind::Complementary,
            k => k,
        }
    }

    fn self_test(&mut self) -> bool {
        self.0.estimator_ok.load(Ordering::Relaxed)
    }

    fn estimate(
        &mut self,
        state: &mut VehicleState,
        _sample: &SensorSample,
        _prior_control: &ControlOutput,
        tick: u64,
    ) {
        self.0.current_tick.store(tick, Ordering::Relaxed);
        state.attitude.roll = 10.0;
        state.attitude.pitch = -20.0;
        state.attitude.yaw = (tick % 180) as f32;
    }
}

/// Passes the setpoint thrust through.
pub struct StubController(pub Arc<Tally>);

impl Controller for StubController {
    fn init(&mut self, kind: ControllerKind) -> ControllerKind {
        self.0.controller_inits.fetch_add(1, Ordering::Relaxed);
        match kind {
            ControllerKind::Any => ControllerKind::Pid,
            k => k,
        }
    }

    fn self_test(&mut self) -> bool {
        self.0.controller_ok.load(Ordering::Relaxed)
    }

    fn compute(
        &mut self,
        setpoint: &Setpoint,
        _sample: &SensorSample,
        _state: &VehicleState,
        _tick: u64,
    ) -> ControlOutput {
        ControlOutput {
            thrust: setpoint.thrust,
            ..ControlOutput::IDLE
        }
    }
}

pub struct StubPower(pub Arc<Tally>);

impl PowerStage for StubPower {
    fn self_test(&mut self) -> bool {
        self.0.power_tests.fetch_add(1, Ordering::Relaxed);
        self.0.power_ok.load(Ordering::Relaxed)
    }

    fn distribute(&mut self, _control: &ControlOutput, tick: u64) {
        self.0.log.lock().push(Act::Distribute(tick));
    }

    fn safe_stop(&mut self) {
        let tick = self.0.current_tick.load(Ordering::Relaxed);
        self.0.log.lock().push(Act::SafeStop(tick));
    }
}

/// Commander supplying a fixed thrust.
pub struct FixedThrust(pub f32);

impl Commander for FixedThrust {
    fn setpoint(&mut self, out: &mut Setpoint, _state: &VehicleState) {
        out.thrust = self.0;
    }
}

/// Halves the commanded thrust.
pub struct HalveThrust(pub Arc<Tally>);

impl SituationAwareness for HalveThrust {
    fn init(&mut self) {
        self.0.sitaw_inits.fetch_add(1, Ordering::Relaxed);
    }

    fn update_setpoint(
        &mut self,
        setpoint: &mut Setpoint,
        _sample: &SensorSample,
        _state: &VehicleState,
    ) {
        self.0.sitaw_updates.fetch_add(1, Ordering::Relaxed);
        setpoint.thrust *= 0.5;
    }
}

pub fn collaborators(tally: &Arc<Tally>) -> Collaborators {
    Collaborators::new(
        Box::new(StubImu(Arc::clone(tally))),
        Box::new(StubEstimator(Arc::clone(tally))),
        Box::new(StubController(Arc::clone(tally))),
        Box::new(StubPower(Arc::clone(tally))),
    )
}

/// Cycle with a fresh interlock and external channel.
pub fn cycle(
    config: &StabilizerConfig,
    tally: &Arc<Tally>,
    registry: &dyn VarRegistry,
) -> StabilizationCycle {
    StabilizationCycle::new(
        config,
        collaborators(tally),
        InterlockHandle::new(),
        ExternalControl::new(),
        registry,
        EstimatorKind::Any,
    )
    .unwrap()
}

// ─── Manual Clock ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    wakes: Vec<Duration>,
}

/// Clock that only moves when slept on or advanced. Clones share time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn starting_at(now: Duration) -> Self {
        let clock = Self::default();
        clock.inner.lock().now = now;
        clock
    }

    /// Simulate work taking `d`.
    pub fn advance(&self, d: Duration) {
        self.inner.lock().now += d;
    }

    /// Every completed sleep target, in order.
    pub fn wakes(&self) -> Vec<Duration> {
        self.inner.lock().wakes.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn sleep_until(&mut self, deadline: Duration) {
        let mut s = self.inner.lock();
        s.now = s.now.max(deadline);
        s.wakes.push(deadline);
    }
}

/// Cycle body whose ticks take a configurable amount of clock time.
pub struct TimedBody<F: FnMut(u64) -> Duration + Send> {
    pub cycle: StabilizationCycle,
    pub clock: ManualClock,
    pub work: F,
}

impl<F: FnMut(u64) -> Duration + Send> CycleBody for TimedBody<F> {
    fn sensors_calibrated(&mut self) -> bool {
        self.cycle.sensors_calibrated()
    }

    fn run_cycle(&mut self) {
        let tick = self.cycle.last_tick() + 1;
        self.clock.advance((self.work)(tick));
        self.cycle.run_once();
    }

    fn on_missed_deadline(&mut self, missed: u64) {
        self.cycle.record_missed(missed);
    }
}
