//! # Hover Stabilizer Library
//!
//! Fixed-rate flight stabilization core. Each tick turns the latest IMU
//! sample into an estimated vehicle state, obtains a control output from the
//! controller or an external side channel, publishes compact telemetry and
//! either distributes the output to the power stage or holds it in the safe
//! state when the emergency stop interlock is tripped.
//!
//! ## Layers
//!
//! 1. **Telemetry encoder**: pure 3×10-bit word packing
//! 2. **Interlock**: emergency stop with optional countdown
//! 3. **Stabilization cycle**: per-tick orchestration
//! 4. **Scheduling loop**: absolute-time pacing, readiness gate, calibration
//! 5. **Stabilizer**: one-time init and the externally exposed operations
//!
//! ## Zero-Allocation Cycle
//!
//! All cycle state is allocated at init. A tick performs no heap
//! allocation and takes no lock shared with other threads except the
//! uncontended per-tick cycle mutex.

pub mod collab;
pub mod config;
pub mod cycle;
pub mod error;
pub mod rt;
pub mod safety;
pub mod schedule;
pub mod sim;
pub mod snapshot;
pub mod stabilizer;
pub mod telemetry;

pub use error::StabilizerError;
pub use stabilizer::Stabilizer;
