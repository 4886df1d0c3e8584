//! Integration test: absolute-time pacing, overruns and calibration wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hover_common::registry::{MemoryRegistry, VarValue};
use hover_stabilizer::collab::StartGate;
use hover_stabilizer::config::StabilizerConfig;
use hover_stabilizer::schedule::{LoopError, SchedulingLoop};

use super::support::{ManualClock, Tally, TimedBody, cycle};

const PERIOD: Duration = Duration::from_millis(1);
const START: Duration = Duration::from_millis(7);

fn no_shutdown() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[test]
fn short_cycles_wake_on_the_absolute_grid() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let clock = ManualClock::starting_at(START);
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        work: |_| Duration::from_micros(300),
    };

    let n = 50u32;
    let summary = SchedulingLoop::new(clock.clone(), PERIOD, no_shutdown())
        .run(&StartGate::released(), &mut body, Some(n as u64))
        .unwrap();

    let wakes = clock.wakes();
    assert_eq!(wakes.len(), n as usize);
    for (i, wake) in wakes.iter().enumerate() {
        assert_eq!(*wake, START + PERIOD * (i as u32 + 1));
    }
    assert_eq!(*wakes.last().unwrap(), START + PERIOD * n);
    assert_eq!(summary.missed, 0);
    assert_eq!(summary.stats.overruns, 0);
    assert_eq!(summary.stats.max_cycle_ns, 300_000);
}

#[test]
fn overrun_keeps_the_grid_and_counts_missed_deadlines() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let clock = ManualClock::starting_at(START);
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        // Tick 3 takes 2.5 periods.
        work: |tick| {
            if tick == 3 {
                Duration::from_micros(2500)
            } else {
                Duration::from_micros(100)
            }
        },
    };

    let summary = SchedulingLoop::new(clock.clone(), PERIOD, no_shutdown())
        .run(&StartGate::released(), &mut body, Some(8))
        .unwrap();

    // Tick 3 woke at +3P and finished at +5.5P: the +4P and +5P targets are
    // already past, so ticks 4 and 5 run back to back without sleeping.
    assert_eq!(summary.cycles, 8);
    assert_eq!(summary.missed, 2);
    assert_eq!(summary.stats.overruns, 1);
    let wakes = clock.wakes();
    let grid: Vec<Duration> = [1u32, 2, 3, 6, 7, 8]
        .iter()
        .map(|k| START + PERIOD * *k)
        .collect();
    assert_eq!(wakes, grid);
    assert_eq!(registry.read("stabilizer.missed"), Ok(VarValue::U32(2)));
    assert_eq!(body.cycle.last_tick(), 8);
}

#[test]
fn no_tick_advances_before_calibration() {
    let tally = Tally::new();
    tally.calibrated.store(false, Ordering::Relaxed);
    let registry = MemoryRegistry::new();
    let clock = ManualClock::starting_at(START);
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        work: |_| Duration::ZERO,
    };

    let err = SchedulingLoop::new(clock.clone(), PERIOD, no_shutdown())
        .with_calibration_timeout(Some(20))
        .run(&StartGate::released(), &mut body, None)
        .unwrap_err();

    assert!(matches!(err, LoopError::CalibrationTimeout { polls: 20 }));
    assert_eq!(body.cycle.last_tick(), 0);
    assert_eq!(tally.distributes(), 0);
    // One poll per period.
    assert_eq!(clock.wakes().len(), 19);
    assert_eq!(clock.wakes()[18], START + PERIOD * 19);
}

#[test]
fn periodic_phase_continues_the_calibration_grid() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let clock = ManualClock::starting_at(START);
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        work: |_| Duration::from_micros(10),
    };
    tally.calibrated.store(false, Ordering::Relaxed);

    // Flip calibration from another thread after a few polls.
    let flipper = {
        let tally = Arc::clone(&tally);
        std::thread::spawn(move || {
            while tally.calibration_polls.load(Ordering::Relaxed) < 5 {
                std::thread::yield_now();
            }
            tally.calibrated.store(true, Ordering::Relaxed);
        })
    };

    let summary = SchedulingLoop::new(clock.clone(), PERIOD, no_shutdown())
        .run(&StartGate::released(), &mut body, Some(3))
        .unwrap();
    flipper.join().unwrap();

    let polls = summary.calibration_polls as u32;
    assert!(polls >= 4);
    let wakes = clock.wakes();
    assert_eq!(wakes.len() as u32, polls + 3);
    assert_eq!(*wakes.last().unwrap(), START + PERIOD * (polls + 3));
    assert_eq!(body.cycle.last_tick(), 3);
}

#[test]
fn shutdown_stops_between_cycles() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let clock = ManualClock::default();
    let shutdown = no_shutdown();
    let flag = Arc::clone(&shutdown);
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        work: move |tick| {
            if tick == 7 {
                flag.store(true, Ordering::Release);
            }
            Duration::ZERO
        },
    };

    let summary = SchedulingLoop::new(clock, PERIOD, shutdown)
        .run(&StartGate::released(), &mut body, None)
        .unwrap();

    // The cycle that observed the request still completes.
    assert_eq!(summary.cycles, 7);
    assert_eq!(tally.distributes(), 7);
}

#[test]
fn loop_waits_for_readiness_gate() {
    let tally = Tally::new();
    let registry = MemoryRegistry::new();
    let gate = Arc::new(StartGate::new());
    let clock = ManualClock::default();
    let mut body = TimedBody {
        cycle: cycle(&StabilizerConfig::default(), &tally, &registry),
        clock: clock.clone(),
        work: |_| Duration::ZERO,
    };

    let runner = {
        let gate = Arc::clone(&gate);
        std::thread::spawn(move || {
            SchedulingLoop::new(clock, PERIOD, no_shutdown())
                .run(&*gate, &mut body, Some(5))
                .map(|s| s.cycles)
        })
    };

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(tally.calibration_polls.load(Ordering::Relaxed), 0);
    assert_eq!(tally.distributes(), 0);

    gate.release();
    assert_eq!(runner.join().unwrap().unwrap(), 5);
    assert_eq!(tally.distributes(), 5);
}
