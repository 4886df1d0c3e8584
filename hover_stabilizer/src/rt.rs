//! Real-time preparation of the stabilizer control thread.
//!
//! At the default 1 kHz rate a tick has a 1 ms budget, and one page fault or
//! migration to a busy core can eat most of it. Before the readiness gate
//! opens, the control thread therefore:
//!
//! 1. locks current and future pages (`mlockall`),
//! 2. touches [`PREFAULT_STACK_BYTES`] of its stack,
//! 3. pins itself to `schedule.cpu_core`,
//! 4. switches to `SCHED_FIFO` at `schedule.rt_priority`.
//!
//! Without the `rt` feature only the stack prefault runs, so simulation and
//! tests need no privileges.

use crate::config::ScheduleConfig;
use crate::schedule::LoopError;

/// Stack touched before the first tick [bytes]. Covers the deepest
/// estimator/controller call chain with margin.
pub const PREFAULT_STACK_BYTES: usize = 256 * 1024;

// Spawned threads get a 2 MiB stack by default.
static_assertions::const_assert!(PREFAULT_STACK_BYTES < 2 * 1024 * 1024);

#[cfg(feature = "rt")]
mod sys {
    use crate::schedule::LoopError;

    fn rt_error(step: &str, err: impl std::fmt::Display) -> LoopError {
        LoopError::RtSetup(format!("{step}: {err}"))
    }

    pub fn lock_memory() -> Result<(), LoopError> {
        use nix::sys::mman::{MlockallFlags, mlockall};
        mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
            .map_err(|e| rt_error("mlockall", e))
    }

    pub fn pin_to_core(cpu: usize) -> Result<(), LoopError> {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        set.set(cpu).map_err(|e| rt_error("cpu_core", e))?;
        sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| rt_error("sched_setaffinity", e))
    }

    pub fn fifo_priority(priority: i32) -> Result<(), LoopError> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: `param` outlives the call; pid 0 is the calling thread.
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            return Err(rt_error(
                "sched_setscheduler(SCHED_FIFO)",
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}

#[cfg(not(feature = "rt"))]
mod sys {
    use crate::schedule::LoopError;

    pub fn lock_memory() -> Result<(), LoopError> {
        Ok(())
    }

    pub fn pin_to_core(_cpu: usize) -> Result<(), LoopError> {
        Ok(())
    }

    pub fn fifo_priority(_priority: i32) -> Result<(), LoopError> {
        Ok(())
    }
}

/// Touch the stack so the first ticks do not page-fault.
fn prefault_stack() {
    let mut buf = [0u8; PREFAULT_STACK_BYTES];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusively borrowed stack location.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Prepare the calling thread for the periodic phase.
///
/// Runs on the control thread before it waits on the readiness gate; an
/// error ends the thread and surfaces from `Stabilizer::join`.
pub fn rt_setup(schedule: &ScheduleConfig) -> Result<(), LoopError> {
    sys::lock_memory()?;
    prefault_stack();
    sys::pin_to_core(schedule.cpu_core)?;
    sys::fifo_priority(schedule.rt_priority)?;
    tracing::debug!(
        cpu_core = schedule.cpu_core,
        rt_priority = schedule.rt_priority,
        budget_us = schedule.period().as_micros() as u64,
        rt = cfg!(feature = "rt"),
        "control thread prepared"
    );
    Ok(())
}
