//! System-wide constants for the hover workspace.
//!
//! Single source of truth for loop rates, physical constants and telemetry
//! field bounds. Imported by all crates; no duplication permitted.

/// Default stabilizer loop rate [Hz] (1 kHz = 1000 µs period).
pub const RATE_MAIN_LOOP_HZ: u32 = 1000;

/// Lowest accepted stabilizer loop rate [Hz].
pub const RATE_MAIN_LOOP_HZ_MIN: u32 = 1;

/// Highest accepted stabilizer loop rate [Hz].
pub const RATE_MAIN_LOOP_HZ_MAX: u32 = 10_000;

/// Standard gravity [m/s²] used to convert accelerometer samples from g.
pub const GRAVITY_MSS: f32 = 9.81;

/// Countdown value that disables the emergency stop timeout.
///
/// Any negative value passed to `arm_with_timeout` behaves the same.
pub const EMERGENCY_STOP_TIMEOUT_DISABLED: i32 = -1;

/// Width of every quantized telemetry field [bits].
pub const TELEMETRY_FIELD_BITS: u32 = 10;

/// Number of quantized fields packed in one telemetry word.
pub const TELEMETRY_FIELDS_PER_WORD: u32 = 3;

/// Linear acceleration telemetry bounds [m/s²].
pub const LIN_ACC_MIN: f32 = -20.0;
pub const LIN_ACC_MAX: f32 = 20.0;

/// Angular rate telemetry bounds [deg/s].
pub const ANG_RATE_MIN: f32 = -360.0;
pub const ANG_RATE_MAX: f32 = 360.0;

/// Yaw telemetry bounds [deg].
pub const YAW_MIN: f32 = -180.0;
pub const YAW_MAX: f32 = 180.0;

/// Pitch and roll telemetry bounds [deg].
pub const PITCH_ROLL_MIN: f32 = -90.0;
pub const PITCH_ROLL_MAX: f32 = 90.0;

/// Default accumulation window for averaged IMU telemetry [ticks].
pub const ACCUMULATE_WINDOW_DEFAULT: u32 = 10;

/// Upper bound on the IMU accumulation window [ticks].
pub const ACCUMULATE_WINDOW_MAX: u32 = 10_000;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hover/stabilizer.toml";
