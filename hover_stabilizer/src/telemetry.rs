//! Compact telemetry: quantized encoding and registry publication.
//!
//! - [`encoder`] - Pure field quantization and 3×10-bit word packing
//! - [`publish`] - Per-tick publication into registered channels

pub mod encoder;
pub mod publish;

pub use encoder::{FieldSpec, QuantRule, WordLayout};
pub use publish::{TelemetryFrame, TelemetryPublisher, TelemetryReader};
