//! Integration test: stabilizer facade lifecycle on the real clock.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use hover_common::registry::{MemoryRegistry, VarAccess, VarCell, VarRegistry, VarValue};
use hover_common::types::{ControlOutput, EstimatorKind};
use hover_stabilizer::collab::{ReadinessGate, StartGate};
use hover_stabilizer::config::StabilizerConfig;
use hover_stabilizer::schedule::LoopError;
use hover_stabilizer::{Stabilizer, StabilizerError};

use super::support::{Act, HalveThrust, Tally, collaborators};

fn fast_config() -> StabilizerConfig {
    let mut config = StabilizerConfig::default();
    config.schedule.rate_hz = 5000;
    config
}

fn stabilizer(
    config: StabilizerConfig,
    tally: &Arc<Tally>,
    registry: &Arc<MemoryRegistry>,
    gate: &Arc<StartGate>,
) -> Stabilizer {
    Stabilizer::new(
        config,
        collaborators(tally),
        Arc::clone(registry) as Arc<dyn VarRegistry>,
        Arc::clone(gate) as Arc<dyn ReadinessGate>,
    )
}

#[test]
fn init_is_idempotent() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate).with_cycle_limit(Some(10));

    assert!(!stab.is_initialized());
    stab.init(EstimatorKind::Any).unwrap();
    let registered = registry.len();
    stab.init(EstimatorKind::Kalman).unwrap();

    assert!(stab.is_initialized());
    assert_eq!(tally.estimator_inits.load(Ordering::Relaxed), 1);
    assert_eq!(tally.controller_inits.load(Ordering::Relaxed), 1);
    assert_eq!(registry.len(), registered);
    assert_eq!(registry.read("stabilizer.estimator"), Ok(VarValue::U8(1)));

    gate.release();
    stab.join().unwrap();
}

#[test]
fn runs_bounded_cycles_on_control_thread() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let mut stab =
        stabilizer(fast_config(), &tally, &registry, &gate).with_cycle_limit(Some(100));

    assert_eq!(stab.last_tick(), 0);
    assert!(stab.telemetry().is_none());
    stab.init(EstimatorKind::Any).unwrap();

    // Nothing runs before the gate opens.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(stab.last_tick(), 0);
    assert_eq!(tally.calibration_polls.load(Ordering::Relaxed), 0);

    gate.release();
    let summary = stab.join().unwrap();
    assert_eq!(summary.cycles, 100);
    assert_eq!(stab.last_tick(), 100);
    assert_eq!(tally.distributes(), 100);
    assert_eq!(registry.read("stabilizer.tick"), Ok(VarValue::U32(100)));

    let frame = stab.telemetry().unwrap().snapshot().unwrap();
    assert_eq!(
        Some(VarValue::U32(frame.l_xyz)),
        registry.read("compactImu.l_xyz").ok()
    );
}

/// Poll `cond` until it holds or two seconds pass.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn emergency_stop_from_another_thread() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::released());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate);
    stab.init(EstimatorKind::Any).unwrap();

    let interlock = stab.interlock().clone();
    std::thread::spawn(move || interlock.trip()).join().unwrap();
    assert!(wait_for(|| tally.safe_stops() > 0));

    stab.emergency_stop_reset();
    assert!(wait_for(|| matches!(
        tally.actions().last(),
        Some(Act::Distribute(_))
    )));
    stab.shutdown();
    stab.join().unwrap();

    // Once stopped, no distribute until the reset.
    let actions = tally.actions();
    let first_stop = actions
        .iter()
        .position(|a| matches!(a, Act::SafeStop(_)))
        .unwrap();
    let resumed = actions[first_stop..]
        .iter()
        .position(|a| matches!(a, Act::Distribute(_)))
        .unwrap();
    assert!(resumed > 0);
}

#[test]
fn arm_with_timeout_stops_on_its_own() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate).with_cycle_limit(Some(40));

    stab.emergency_stop_arm_with_timeout(10);
    stab.init(EstimatorKind::Any).unwrap();
    gate.release();
    stab.join().unwrap();

    assert_eq!(tally.distributes(), 9);
    assert_eq!(tally.safe_stops(), 31);
    assert!(stab.interlock().is_tripped());
}

#[test]
fn external_commands_reach_the_power_stage() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate).with_cycle_limit(Some(5));
    let cmd = ControlOutput {
        roll: 0.5,
        pitch: -0.5,
        yaw: 0.0,
        thrust: 20_000.0,
    };
    stab.submit_control(cmd);
    stab.init(EstimatorKind::Any).unwrap();
    gate.release();
    stab.join().unwrap();

    assert_eq!(stab.with_cycle(|c| *c.control()), Some(cmd));
    assert_eq!(stab.external_control().version(), 1);
}

#[test]
fn situation_awareness_wired_only_for_kalman() {
    for (selection, wired) in [
        (EstimatorKind::Kalman, true),
        (EstimatorKind::Complementary, false),
        (EstimatorKind::Any, false),
    ] {
        let tally = Tally::new();
        let registry = Arc::new(MemoryRegistry::new());
        let gate = Arc::new(StartGate::new());
        let collab =
            collaborators(&tally).with_situation_awareness(Box::new(HalveThrust(tally.clone())));
        let mut stab = Stabilizer::new(
            fast_config(),
            collab,
            registry as Arc<dyn VarRegistry>,
            gate.clone(),
        )
        .with_cycle_limit(Some(1));
        stab.init(selection).unwrap();
        gate.release();
        stab.join().unwrap();

        assert_eq!(stab.with_cycle(|c| c.has_situation_awareness()), Some(wired));
        assert_eq!(tally.sitaw_inits.load(Ordering::Relaxed), wired as u64);
    }
}

#[test]
fn duplicate_registration_fails_init() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register("stabilizer", "tick", VarAccess::ReadOnly, VarCell::new_u32(0))
        .unwrap();
    let gate = Arc::new(StartGate::released());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate);

    let err = stab.init(EstimatorKind::Any).unwrap_err();
    assert!(matches!(err, StabilizerError::Registry(_)));
    assert!(!stab.is_initialized());

    // A failed init is not silently treated as done.
    assert!(matches!(
        stab.init(EstimatorKind::Any),
        Err(StabilizerError::InitFailed)
    ));
    assert!(!stab.is_initialized());
    assert!(!stab.self_test());
    assert!(matches!(stab.join(), Err(StabilizerError::NotRunning)));
}

#[test]
fn calibration_timeout_surfaces_from_join() {
    let tally = Tally::new();
    tally.calibrated.store(false, Ordering::Relaxed);
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::released());
    let mut config = fast_config();
    config.schedule.calibration_timeout_cycles = Some(5);
    let mut stab = stabilizer(config, &tally, &registry, &gate);

    stab.init(EstimatorKind::Any).unwrap();
    let err = stab.join().unwrap_err();
    assert!(matches!(
        err,
        StabilizerError::Loop(LoopError::CalibrationTimeout { polls: 5 })
    ));
    assert_eq!(stab.last_tick(), 0);
}

#[test]
fn join_without_init_is_an_error() {
    let tally = Tally::new();
    let mut stab = stabilizer(
        fast_config(),
        &tally,
        &Arc::new(MemoryRegistry::new()),
        &Arc::new(StartGate::new()),
    );
    assert!(matches!(stab.join(), Err(StabilizerError::NotRunning)));
}

#[test]
fn self_test_before_and_after_init() {
    let tally = Tally::new();
    let registry = Arc::new(MemoryRegistry::new());
    let gate = Arc::new(StartGate::new());
    let mut stab = stabilizer(fast_config(), &tally, &registry, &gate).with_cycle_limit(Some(1));

    assert!(stab.self_test());
    tally.controller_ok.store(false, Ordering::Relaxed);
    assert!(!stab.self_test());

    stab.init(EstimatorKind::Any).unwrap();
    assert!(!stab.self_test());
    tally.controller_ok.store(true, Ordering::Relaxed);
    assert!(stab.self_test());

    gate.release();
    stab.join().unwrap();
}
