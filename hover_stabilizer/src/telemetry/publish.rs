//! Per-tick telemetry publication.
//!
//! The control cycle is the only writer. Each channel is one registry
//! [`VarCell`] (a single 32-bit atomic), so a lone word is never torn. A
//! [`SeqCounter`] brackets every publication so a [`TelemetryReader`] can
//! take a consistent multi-word [`TelemetryFrame`] when it needs one.
//!
//! | Variable            | Type    | Published when                 |
//! |---------------------|---------|--------------------------------|
//! | `compactImu.l_xyz`  | uint32  | always                         |
//! | `compactImu.a_xyz`  | uint32  | always                         |
//! | `stabilizer.pypr`   | uint32  | attitude = packed / both       |
//! | `stabilizer.yaw`    | float   | attitude = float / both        |
//! | `stabilizer.pitch`  | float   | attitude = float / both        |
//! | `stabilizer.roll`   | float   | attitude = float / both        |

use std::sync::Arc;

use hover_common::registry::{RegistryError, VarAccess, VarCell, VarRegistry};
use hover_common::types::{Attitude, Axis3, SensorSample, VehicleState};

use super::encoder::{
    ANG_RATE_LAYOUT, ATTITUDE_LAYOUT, LEGACY_ANG_RATE_LAYOUT, LEGACY_ATTITUDE_LAYOUT,
    LEGACY_LIN_ACC_LAYOUT, LIN_ACC_LAYOUT, RAW_ATTITUDE_LAYOUT, WordLayout,
};
use crate::config::{AttitudeMode, AttitudePacking, ImuSource, TelemetryConfig, WireFormat};
use crate::snapshot::{READ_RETRIES, SeqCounter};

/// Registry group of the compact IMU words.
pub const IMU_GROUP: &str = "compactImu";
/// Registry group of the attitude channels.
pub const ATTITUDE_GROUP: &str = "stabilizer";

// ─── Layout Selection ───────────────────────────────────────────────

/// Word layouts selected by the telemetry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryLayouts {
    pub lin_acc: WordLayout,
    pub ang_rate: WordLayout,
    pub attitude: WordLayout,
}

impl TelemetryLayouts {
    pub fn for_config(cfg: &TelemetryConfig) -> Self {
        let (lin_acc, ang_rate, quantized_attitude) = match cfg.wire_format {
            WireFormat::Standard => (LIN_ACC_LAYOUT, ANG_RATE_LAYOUT, ATTITUDE_LAYOUT),
            WireFormat::Legacy => (
                LEGACY_LIN_ACC_LAYOUT,
                LEGACY_ANG_RATE_LAYOUT,
                LEGACY_ATTITUDE_LAYOUT,
            ),
        };
        let attitude = match cfg.attitude_packing {
            AttitudePacking::Quantized => quantized_attitude,
            AttitudePacking::Raw => RAW_ATTITUDE_LAYOUT,
        };
        Self {
            lin_acc,
            ang_rate,
            attitude,
        }
    }
}

// ─── Frame ──────────────────────────────────────────────────────────

/// Consistent view of all telemetry channels after one publication.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub l_xyz: u32,
    pub a_xyz: u32,
    /// Present when the packed attitude word is published.
    pub pypr: Option<u32>,
    /// Present when the float attitude channels are published.
    pub attitude: Option<Attitude>,
}

#[derive(Debug, Clone)]
struct Channels {
    l_xyz: VarCell,
    a_xyz: VarCell,
    pypr: Option<VarCell>,
    floats: Option<[VarCell; 3]>,
}

impl Channels {
    fn new(mode: AttitudeMode) -> Self {
        Self {
            l_xyz: VarCell::new_u32(0),
            a_xyz: VarCell::new_u32(0),
            pypr: mode.packed().then(|| VarCell::new_u32(0)),
            floats: mode
                .floats()
                .then(|| [VarCell::new_f32(0.0), VarCell::new_f32(0.0), VarCell::new_f32(0.0)]),
        }
    }

    fn load(&self) -> TelemetryFrame {
        TelemetryFrame {
            l_xyz: self.l_xyz.get_u32(),
            a_xyz: self.a_xyz.get_u32(),
            pypr: self.pypr.as_ref().map(VarCell::get_u32),
            attitude: self.floats.as_ref().map(|[yaw, pitch, roll]| {
                Attitude::new(roll.get_f32(), pitch.get_f32(), yaw.get_f32())
            }),
        }
    }
}

// ─── IMU Accumulator ────────────────────────────────────────────────

/// Running sum of samples over a fixed window.
#[derive(Debug, Clone, Copy, Default)]
struct ImuAccumulator {
    acc: Axis3,
    gyro: Axis3,
    count: u32,
}

impl ImuAccumulator {
    /// Add a sample; returns the window mean once `window` samples are in.
    fn push(&mut self, sample: &SensorSample, window: u32) -> Option<SensorSample> {
        self.acc += sample.acc;
        self.gyro += sample.gyro;
        self.count += 1;
        if self.count < window {
            return None;
        }
        let k = 1.0 / self.count as f32;
        let mean = SensorSample::new(self.acc.scale(k), self.gyro.scale(k));
        *self = Self::default();
        Some(mean)
    }
}

// ─── Publisher ──────────────────────────────────────────────────────

/// Writer side of the telemetry channels. Owned by the control cycle.
#[derive(Debug)]
pub struct TelemetryPublisher {
    layouts: TelemetryLayouts,
    imu_source: ImuSource,
    window: u32,
    accumulator: ImuAccumulator,
    channels: Channels,
    seq: Arc<SeqCounter>,
}

impl TelemetryPublisher {
    pub fn new(cfg: &TelemetryConfig) -> Self {
        Self {
            layouts: TelemetryLayouts::for_config(cfg),
            imu_source: cfg.imu_source,
            window: cfg.accumulate_window.max(1),
            accumulator: ImuAccumulator::default(),
            channels: Channels::new(cfg.attitude),
            seq: Arc::new(SeqCounter::new()),
        }
    }

    pub fn layouts(&self) -> &TelemetryLayouts {
        &self.layouts
    }

    /// Register every published channel as a read-only variable.
    pub fn register(&self, registry: &dyn VarRegistry) -> Result<(), RegistryError> {
        let ro = VarAccess::ReadOnly;
        let ch = &self.channels;
        registry.register(IMU_GROUP, "l_xyz", ro, ch.l_xyz.clone())?;
        registry.register(IMU_GROUP, "a_xyz", ro, ch.a_xyz.clone())?;
        if let Some(pypr) = &ch.pypr {
            registry.register(ATTITUDE_GROUP, "pypr", ro, pypr.clone())?;
        }
        if let Some([yaw, pitch, roll]) = &ch.floats {
            registry.register(ATTITUDE_GROUP, "yaw", ro, yaw.clone())?;
            registry.register(ATTITUDE_GROUP, "pitch", ro, pitch.clone())?;
            registry.register(ATTITUDE_GROUP, "roll", ro, roll.clone())?;
        }
        Ok(())
    }

    /// Publish one tick's telemetry.
    ///
    /// With `ImuSource::Accumulated` the IMU words only change at the end of
    /// each window; attitude channels are refreshed every tick.
    pub fn publish(&mut self, sample: &SensorSample, state: &VehicleState) {
        let imu = match self.imu_source {
            ImuSource::Latest => Some(*sample),
            ImuSource::Accumulated => self.accumulator.push(sample, self.window),
        };
        let att = state.attitude;

        self.seq.begin_write();
        let ch = &self.channels;
        if let Some(s) = imu {
            ch.l_xyz
                .set_u32(self.layouts.lin_acc.encode(s.acc_mss().to_array()));
            ch.a_xyz.set_u32(self.layouts.ang_rate.encode(s.gyro.to_array()));
        }
        if let Some(pypr) = &ch.pypr {
            pypr.set_u32(self.layouts.attitude.encode([att.yaw, att.pitch, att.roll]));
        }
        if let Some([yaw, pitch, roll]) = &ch.floats {
            yaw.set_f32(att.yaw);
            pitch.set_f32(att.pitch);
            roll.set_f32(att.roll);
        }
        self.seq.end_write();
    }

    /// Number of completed publications.
    pub fn version(&self) -> u64 {
        self.seq.version()
    }

    /// Reader handle sharing this publisher's channels.
    pub fn reader(&self) -> TelemetryReader {
        TelemetryReader {
            channels: self.channels.clone(),
            seq: Arc::clone(&self.seq),
        }
    }
}

/// Read side of the telemetry channels. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    channels: Channels,
    seq: Arc<SeqCounter>,
}

impl TelemetryReader {
    /// Consistent frame, or `None` if every attempt raced the writer.
    pub fn snapshot(&self) -> Option<TelemetryFrame> {
        self.seq.read(READ_RETRIES, || self.channels.load())
    }

    /// Latest channel values without the consistency check.
    ///
    /// Words may come from adjacent publications.
    pub fn latest(&self) -> TelemetryFrame {
        self.channels.load()
    }

    pub fn version(&self) -> u64 {
        self.seq.version()
    }
}
