//! Data model exchanged between the stabilizer core and its collaborators.
//!
//! All types are small `Copy` values so that producers can publish them as
//! whole snapshots: a reader sees either the previous or the current value,
//! never a partially written one.

use serde::{Deserialize, Serialize};

use crate::consts::GRAVITY_MSS;

// ─── Vectors ────────────────────────────────────────────────────────

/// Three-axis vector in body frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axis3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Axis3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Components in declaration order.
    #[inline]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

impl core::ops::Add for Axis3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl core::ops::AddAssign for Axis3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

// ─── Sensor Sample ──────────────────────────────────────────────────

/// One IMU sample, produced once per tick by the sensor source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    /// Linear acceleration [g].
    pub acc: Axis3,
    /// Angular rate [deg/s].
    pub gyro: Axis3,
}

impl SensorSample {
    pub const fn new(acc: Axis3, gyro: Axis3) -> Self {
        Self { acc, gyro }
    }

    /// Linear acceleration converted to m/s².
    #[inline]
    pub fn acc_mss(&self) -> Axis3 {
        self.acc.scale(GRAVITY_MSS)
    }
}

// ─── Vehicle State ──────────────────────────────────────────────────

/// Euler attitude [deg].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Attitude {
    pub const fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }
}

/// Estimated vehicle state. Written only by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub attitude: Attitude,
    /// Position [m], world frame.
    pub position: Axis3,
    /// Velocity [m/s], world frame.
    pub velocity: Axis3,
    /// Acceleration [g], world frame, gravity removed.
    pub acc: Axis3,
}

// ─── Setpoint / Control ─────────────────────────────────────────────

/// Desired state supplied by the commander.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Setpoint {
    pub attitude: Attitude,
    /// Desired attitude rate [deg/s].
    pub attitude_rate: Attitude,
    /// Collective thrust command [raw units].
    pub thrust: f32,
    pub position: Axis3,
    pub velocity: Axis3,
}

/// Actuator command produced by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlOutput {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub thrust: f32,
}

impl ControlOutput {
    /// All channels zero.
    pub const IDLE: Self = Self {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        thrust: 0.0,
    };
}

// ─── Collaborator Selection ─────────────────────────────────────────

/// State estimator implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EstimatorKind {
    /// Let the estimator module pick its default.
    #[default]
    Any = 0,
    Complementary = 1,
    Kalman = 2,
}

impl EstimatorKind {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Any),
            1 => Some(Self::Complementary),
            2 => Some(Self::Kalman),
            _ => None,
        }
    }
}

/// Controller implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ControllerKind {
    #[default]
    Any = 0,
    Pid = 1,
    Mellinger = 2,
}

impl ControllerKind {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Any),
            1 => Some(Self::Pid),
            2 => Some(Self::Mellinger),
            _ => None,
        }
    }
}
