//! Stabilizer configuration: TOML loading with bounds validation.
//!
//! Every table and field has a default, so an empty document yields the
//! stock 1 kHz configuration. Numeric parameters are checked against
//! `MIN`/`MAX` bounds by [`StabilizerConfig::validate`].
//!
//! ```toml
//! [shared]
//! service_name = "hover-stabilizer"
//!
//! [schedule]
//! rate_hz = 1000
//!
//! [control]
//! mode = "external"
//! estimator = "complementary"
//!
//! [telemetry]
//! attitude = "float"
//! imu_source = "latest"
//! wire_format = "standard"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hover_common::config::{ConfigError, ConfigLoader, SharedConfig};
use hover_common::consts::{
    ACCUMULATE_WINDOW_DEFAULT, ACCUMULATE_WINDOW_MAX, RATE_MAIN_LOOP_HZ, RATE_MAIN_LOOP_HZ_MAX,
    RATE_MAIN_LOOP_HZ_MIN,
};
use hover_common::types::{ControllerKind, EstimatorKind};

/// SCHED_FIFO priority bounds.
pub const RT_PRIORITY_MIN: i32 = 1;
pub const RT_PRIORITY_MAX: i32 = 99;
const RT_PRIORITY_DEFAULT: i32 = 80;
const CPU_CORE_DEFAULT: usize = 1;

// ─── Top-Level Config ───────────────────────────────────────────────

/// Complete stabilizer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StabilizerConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub self_test: SelfTestConfig,
}

impl StabilizerConfig {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let s = &self.schedule;
        if s.rate_hz < RATE_MAIN_LOOP_HZ_MIN || s.rate_hz > RATE_MAIN_LOOP_HZ_MAX {
            return Err(ConfigError::ValidationError(format!(
                "schedule.rate_hz {} out of range [{}, {}]",
                s.rate_hz, RATE_MAIN_LOOP_HZ_MIN, RATE_MAIN_LOOP_HZ_MAX
            )));
        }
        if s.rt_priority < RT_PRIORITY_MIN || s.rt_priority > RT_PRIORITY_MAX {
            return Err(ConfigError::ValidationError(format!(
                "schedule.rt_priority {} out of range [{}, {}]",
                s.rt_priority, RT_PRIORITY_MIN, RT_PRIORITY_MAX
            )));
        }
        if s.calibration_timeout_cycles == Some(0) {
            return Err(ConfigError::ValidationError(
                "schedule.calibration_timeout_cycles must be > 0 when set".to_string(),
            ));
        }

        let t = &self.telemetry;
        if t.imu_source == ImuSource::Accumulated
            && (t.accumulate_window == 0 || t.accumulate_window > ACCUMULATE_WINDOW_MAX)
        {
            return Err(ConfigError::ValidationError(format!(
                "telemetry.accumulate_window {} out of range [1, {}]",
                t.accumulate_window, ACCUMULATE_WINDOW_MAX
            )));
        }
        Ok(())
    }

    /// Loop period derived from `schedule.rate_hz`.
    pub fn period(&self) -> Duration {
        self.schedule.period()
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<StabilizerConfig, ConfigError> {
    let config = StabilizerConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate a configuration document (for testing).
pub fn load_config_from_str(toml: &str) -> Result<StabilizerConfig, ConfigError> {
    let config = StabilizerConfig::from_toml_str(toml)?;
    config.validate()?;
    Ok(config)
}

// ─── Schedule ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Loop rate [Hz] (default: 1000).
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,

    /// Give up waiting for sensor calibration after this many polls.
    /// Unset = wait forever.
    #[serde(default)]
    pub calibration_timeout_cycles: Option<u64>,

    /// CPU core the control thread is pinned to (`rt` feature only).
    #[serde(default = "default_cpu_core")]
    pub cpu_core: usize,

    /// SCHED_FIFO priority of the control thread (`rt` feature only).
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,
}

fn default_rate_hz() -> u32 {
    RATE_MAIN_LOOP_HZ
}
fn default_cpu_core() -> usize {
    CPU_CORE_DEFAULT
}
fn default_rt_priority() -> i32 {
    RT_PRIORITY_DEFAULT
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            calibration_timeout_cycles: None,
            cpu_core: default_cpu_core(),
            rt_priority: default_rt_priority(),
        }
    }
}

impl ScheduleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.rate_hz.max(1) as u64)
    }
}

// ─── Control ────────────────────────────────────────────────────────

/// Where the cycle's actuator command comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Commander setpoint → controller → control output.
    Controller,
    /// Commands injected through the external control side channel.
    #[default]
    External,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default)]
    pub mode: ControlMode,

    /// Estimator selection used when the caller does not pass one.
    #[serde(default)]
    pub estimator: EstimatorKind,

    #[serde(default)]
    pub controller: ControllerKind,

    /// Re-initialize estimator/controller when their registry parameters
    /// change at runtime.
    #[serde(default)]
    pub hot_swap: bool,
}

// ─── Telemetry ──────────────────────────────────────────────────────

/// How the attitude is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttitudeMode {
    /// Full-precision `stabilizer.yaw/pitch/roll` floats.
    #[default]
    Float,
    /// Packed `stabilizer.pypr` word.
    Packed,
    Both,
}

impl AttitudeMode {
    pub const fn floats(&self) -> bool {
        matches!(self, Self::Float | Self::Both)
    }

    pub const fn packed(&self) -> bool {
        matches!(self, Self::Packed | Self::Both)
    }
}

/// How the packed attitude word is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttitudePacking {
    #[default]
    Quantized,
    /// Integer degrees, no quantization.
    Raw,
}

/// Which samples feed the compact IMU words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImuSource {
    /// Current tick's sample.
    #[default]
    Latest,
    /// Mean over `accumulate_window` ticks, published once per window.
    Accumulated,
}

/// Quantization scales of the packed words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Rounded to `2^10 - 1` levels over each field's bounds.
    #[default]
    Standard,
    /// Truncating scales of the deployed flight binary.
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub attitude: AttitudeMode,
    #[serde(default)]
    pub attitude_packing: AttitudePacking,
    #[serde(default)]
    pub imu_source: ImuSource,
    #[serde(default = "default_accumulate_window")]
    pub accumulate_window: u32,
    #[serde(default)]
    pub wire_format: WireFormat,
}

fn default_accumulate_window() -> u32 {
    ACCUMULATE_WINDOW_DEFAULT
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            attitude: AttitudeMode::default(),
            attitude_packing: AttitudePacking::default(),
            imu_source: ImuSource::default(),
            accumulate_window: default_accumulate_window(),
            wire_format: WireFormat::default(),
        }
    }
}

// ─── Self Test ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfTestConfig {
    /// Include the power stage in `self_test()` (default: excluded).
    #[serde(default)]
    pub include_power_stage: bool,
}
