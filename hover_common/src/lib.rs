//! Hover Common Library
//!
//! Shared building blocks for the hover stabilizer workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Loop rates, physical constants, telemetry field bounds
//! - [`types`] - Sensor sample, vehicle state, setpoint and control output
//! - [`config`] - Configuration loading traits and types
//! - [`registry`] - Named parameter/log variable registry
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use hover_common::prelude::*;
//!
//! let sample = SensorSample::new(Axis3::new(0.0, 0.0, 1.0), Axis3::ZERO);
//! assert_eq!(sample.acc.z, 1.0);
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod registry;
pub mod types;
