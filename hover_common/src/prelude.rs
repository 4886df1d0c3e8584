//! Prelude module for common re-exports.
//!
//! ```rust
//! use hover_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{EMERGENCY_STOP_TIMEOUT_DISABLED, RATE_MAIN_LOOP_HZ};

// ─── Data Model ─────────────────────────────────────────────────────
pub use crate::types::{
    Attitude, Axis3, ControlOutput, ControllerKind, EstimatorKind, SensorSample, Setpoint,
    VehicleState,
};

// ─── Registry ───────────────────────────────────────────────────────
pub use crate::registry::{
    MemoryRegistry, RegistryError, VarAccess, VarCell, VarRegistry, VarType, VarValue,
};

/// Period of the default stabilizer loop rate.
pub const DEFAULT_LOOP_PERIOD: Duration =
    Duration::from_micros(1_000_000 / RATE_MAIN_LOOP_HZ as u64);
