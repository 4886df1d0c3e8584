//! Integration test: 100 cycles through the scheduling loop.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use hover_common::registry::{MemoryRegistry, VarValue};
use hover_stabilizer::collab::StartGate;
use hover_stabilizer::config::StabilizerConfig;
use hover_stabilizer::cycle::StabilizationCycle;
use hover_stabilizer::schedule::{CycleBody, SchedulingLoop};
use hover_stabilizer::telemetry::encoder::{ANG_RATE_LAYOUT, LIN_ACC_LAYOUT};

use super::support::{Act, ManualClock, Tally, STUB_SAMPLE, cycle};

const PERIOD: Duration = Duration::from_millis(1);

/// Trips the interlock right before the given tick runs.
struct StopBefore {
    cycle: StabilizationCycle,
    stop_at: u64,
}

impl CycleBody for StopBefore {
    fn sensors_calibrated(&mut self) -> bool {
        self.cycle.sensors_calibrated()
    }

    fn run_cycle(&mut self) {
        if self.cycle.last_tick() + 1 == self.stop_at {
            self.cycle.interlock().trip();
        }
        self.cycle.run_once();
    }
}

fn run_loop<B: CycleBody>(body: &mut B, cycles: u64) -> u64 {
    let mut lp = SchedulingLoop::new(
        ManualClock::default(),
        PERIOD,
        Arc::new(AtomicBool::new(false)),
    );
    lp.run(&StartGate::released(), body, Some(cycles))
        .unwrap()
        .cycles
}

#[test]
fn hundred_cycles_distribute_every_tick() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let mut cycle = cycle(&StabilizerConfig::default(), &tally, &registry);

    assert_eq!(run_loop(&mut cycle, 100), 100);

    assert_eq!(cycle.last_tick(), 100);
    assert_eq!(tally.distributes(), 100);
    assert_eq!(tally.safe_stops(), 0);
    assert_eq!(tally.actions().last(), Some(&Act::Distribute(100)));

    let l_xyz = LIN_ACC_LAYOUT.encode(STUB_SAMPLE.acc_mss().to_array());
    let a_xyz = ANG_RATE_LAYOUT.encode(STUB_SAMPLE.gyro.to_array());
    assert_eq!(registry.read("compactImu.l_xyz"), Ok(VarValue::U32(l_xyz)));
    assert_eq!(registry.read("compactImu.a_xyz"), Ok(VarValue::U32(a_xyz)));
    assert_eq!(registry.read("stabilizer.tick"), Ok(VarValue::U32(100)));
    assert_eq!(registry.read("stabilizer.yaw"), Ok(VarValue::F32(100.0)));
    assert_eq!(registry.read("stabilizer.missed"), Ok(VarValue::U32(0)));
}

#[test]
fn emergency_stop_before_cycle_50_holds_the_rest() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let mut body = StopBefore {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        stop_at: 50,
    };

    run_loop(&mut body, 100);

    let actions = tally.actions();
    assert_eq!(actions.len(), 100);
    for (i, act) in actions.iter().enumerate() {
        let tick = i as u64 + 1;
        let expected = if tick < 50 {
            Act::Distribute(tick)
        } else {
            Act::SafeStop(tick)
        };
        assert_eq!(*act, expected);
    }
    assert_eq!(body.cycle.distributed_count(), 49);
    assert_eq!(body.cycle.safe_stop_count(), 51);

    // Telemetry keeps flowing while stopped.
    assert_eq!(registry.read("stabilizer.tick"), Ok(VarValue::U32(100)));
}

#[test]
fn countdown_armed_mid_flight_stops_after_timeout() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let mut cycle = cycle(&StabilizerConfig::default(), &tally, &registry);

    run_loop(&mut cycle, 10);
    cycle.interlock().arm_with_timeout(5);
    run_loop(&mut cycle, 10);

    // Ticks 11..=14 distribute, tick 15 is the fifth countdown tick.
    assert_eq!(tally.distributes(), 14);
    assert_eq!(tally.safe_stops(), 6);
    assert_eq!(tally.actions()[14], Act::SafeStop(15));

    cycle.interlock().reset();
    run_loop(&mut cycle, 1);
    assert_eq!(tally.actions().last(), Some(&Act::Distribute(21)));
}
