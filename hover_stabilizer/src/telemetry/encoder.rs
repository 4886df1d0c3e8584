//! Quantized telemetry encoding.
//!
//! A bounded scalar is clamped, shifted to a non-negative domain, scaled to
//! the field's code range and stored in a fixed number of bits. Three 10-bit
//! fields share one 32-bit word:
//!
//! ```text
//!  31 30 | 29 ........ 20 | 19 ........ 10 | 9 ......... 0
//!  unused|    field 2     |    field 1     |    field 0
//! ```
//!
//! Encoding never fails: out-of-range inputs saturate at the field bounds and
//! NaN encodes as the lower bound.

use static_assertions::const_assert;

use hover_common::consts::{
    ANG_RATE_MAX, ANG_RATE_MIN, LIN_ACC_MAX, LIN_ACC_MIN, PITCH_ROLL_MAX, PITCH_ROLL_MIN,
    TELEMETRY_FIELD_BITS, TELEMETRY_FIELDS_PER_WORD, YAW_MAX, YAW_MIN,
};

const_assert!(TELEMETRY_FIELD_BITS * TELEMETRY_FIELDS_PER_WORD <= u32::BITS);

/// Mask of one telemetry field.
pub const FIELD_MASK: u32 = (1 << TELEMETRY_FIELD_BITS) - 1;

/// Bit offset of field `index` inside a word.
#[inline]
pub const fn field_offset(index: u32) -> u32 {
    TELEMETRY_FIELD_BITS * index
}

/// Pack three field codes; each code is masked to the field width.
#[inline]
pub const fn pack3(codes: [u32; 3]) -> u32 {
    (codes[0] & FIELD_MASK) << field_offset(0)
        | (codes[1] & FIELD_MASK) << field_offset(1)
        | (codes[2] & FIELD_MASK) << field_offset(2)
}

/// Recover the three field codes of a packed word.
#[inline]
pub const fn unpack3(word: u32) -> [u32; 3] {
    [
        (word >> field_offset(0)) & FIELD_MASK,
        (word >> field_offset(1)) & FIELD_MASK,
        (word >> field_offset(2)) & FIELD_MASK,
    ]
}

/// Largest code representable in `width` bits.
#[inline]
pub const fn max_code(width: u32) -> u32 {
    if width >= u32::BITS {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Quantize `v` into a `width`-bit code over `[lo, hi]` with rounding.
///
/// `q = round((clamp(v) - lo) * (2^width - 1) / (hi - lo))`
pub fn quantize(v: f32, lo: f32, hi: f32, width: u32) -> u32 {
    let max = max_code(width);
    if v.is_nan() {
        return 0;
    }
    let shifted = v.clamp(lo, hi) - lo;
    let q = (shifted * max as f32 / (hi - lo)).round();
    (q as u32).min(max)
}

/// Map a code back to the centre of its quantization step.
pub fn dequantize(code: u32, lo: f32, hi: f32, width: u32) -> f32 {
    let max = max_code(width);
    lo + code.min(max) as f32 * (hi - lo) / max as f32
}

/// How a field turns a clamped value into a code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuantRule {
    /// Round to `2^width - 1` levels over the bounds.
    Rounded,
    /// Deployed-firmware form: `trunc((v - lo) * gain * scale)` masked to
    /// the field width. `gain` and `scale` are applied in that order so the
    /// single-precision result matches the flight binary bit for bit.
    Truncated { gain: f32, scale: f32 },
    /// No quantization: integer part of `v`, two's complement, masked.
    Raw,
}

/// One quantized field: bounds, width and rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub lo: f32,
    pub hi: f32,
    pub width: u32,
    pub rule: QuantRule,
}

impl FieldSpec {
    pub const fn rounded(lo: f32, hi: f32) -> Self {
        Self {
            lo,
            hi,
            width: TELEMETRY_FIELD_BITS,
            rule: QuantRule::Rounded,
        }
    }

    pub const fn truncated(lo: f32, hi: f32, gain: f32, scale: f32) -> Self {
        Self {
            lo,
            hi,
            width: TELEMETRY_FIELD_BITS,
            rule: QuantRule::Truncated { gain, scale },
        }
    }

    pub const fn raw(lo: f32, hi: f32) -> Self {
        Self {
            lo,
            hi,
            width: TELEMETRY_FIELD_BITS,
            rule: QuantRule::Raw,
        }
    }

    /// Encode `v` into this field's code.
    pub fn encode(&self, v: f32) -> u32 {
        let mask = max_code(self.width);
        match self.rule {
            QuantRule::Rounded => quantize(v, self.lo, self.hi, self.width),
            QuantRule::Truncated { gain, scale } => {
                if v.is_nan() {
                    return 0;
                }
                let scaled = (v.clamp(self.lo, self.hi) - self.lo) * gain * scale;
                (scaled as u32) & mask
            }
            QuantRule::Raw => (v as i32 as u32) & mask,
        }
    }

    /// Approximate inverse of `encode` for the rounded rule.
    pub fn decode(&self, code: u32) -> f32 {
        match self.rule {
            QuantRule::Rounded => dequantize(code, self.lo, self.hi, self.width),
            QuantRule::Truncated { gain, scale } => self.lo + code as f32 / (gain * scale),
            QuantRule::Raw => {
                // Sign-extend the field.
                let shift = u32::BITS - self.width;
                (((code << shift) as i32) >> shift) as f32
            }
        }
    }
}

/// Three fields packed into one telemetry word, field `i` at offset `10*i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordLayout {
    pub fields: [FieldSpec; 3],
}

impl WordLayout {
    pub const fn uniform(field: FieldSpec) -> Self {
        Self {
            fields: [field; 3],
        }
    }

    /// Quantize and pack three values in declaration order.
    pub fn encode(&self, values: [f32; 3]) -> u32 {
        pack3([
            self.fields[0].encode(values[0]),
            self.fields[1].encode(values[1]),
            self.fields[2].encode(values[2]),
        ])
    }

    /// Unpack and dequantize a word.
    pub fn decode(&self, word: u32) -> [f32; 3] {
        let codes = unpack3(word);
        [
            self.fields[0].decode(codes[0]),
            self.fields[1].decode(codes[1]),
            self.fields[2].decode(codes[2]),
        ]
    }
}

// ─── Standard Layouts ───────────────────────────────────────────────

/// Linear acceleration x, y, z [m/s²].
pub const LIN_ACC_LAYOUT: WordLayout =
    WordLayout::uniform(FieldSpec::rounded(LIN_ACC_MIN, LIN_ACC_MAX));

/// Angular rate x, y, z [deg/s].
pub const ANG_RATE_LAYOUT: WordLayout =
    WordLayout::uniform(FieldSpec::rounded(ANG_RATE_MIN, ANG_RATE_MAX));

/// Yaw, pitch, roll [deg].
pub const ATTITUDE_LAYOUT: WordLayout = WordLayout {
    fields: [
        FieldSpec::rounded(YAW_MIN, YAW_MAX),
        FieldSpec::rounded(PITCH_ROLL_MIN, PITCH_ROLL_MAX),
        FieldSpec::rounded(PITCH_ROLL_MIN, PITCH_ROLL_MAX),
    ],
};

// ─── Legacy Layouts ─────────────────────────────────────────────────
//
// Scales used by the flight binary that existing downlink consumers decode.
// Note the upper bound of each range overflows the field and wraps to 0.

pub const LEGACY_LIN_ACC_LAYOUT: WordLayout =
    WordLayout::uniform(FieldSpec::truncated(LIN_ACC_MIN, LIN_ACC_MAX, 1.0, 25.6));

pub const LEGACY_ANG_RATE_LAYOUT: WordLayout =
    WordLayout::uniform(FieldSpec::truncated(ANG_RATE_MIN, ANG_RATE_MAX, 1.0, 1.42));

pub const LEGACY_ATTITUDE_LAYOUT: WordLayout = WordLayout {
    fields: [
        FieldSpec::truncated(YAW_MIN, YAW_MAX, 1.0, 2.84),
        FieldSpec::truncated(PITCH_ROLL_MIN, PITCH_ROLL_MAX, 2.0, 2.84),
        FieldSpec::truncated(PITCH_ROLL_MIN, PITCH_ROLL_MAX, 2.0, 2.84),
    ],
};

/// Yaw, pitch, roll as integer degrees without quantization.
pub const RAW_ATTITUDE_LAYOUT: WordLayout = WordLayout {
    fields: [
        FieldSpec::raw(YAW_MIN, YAW_MAX),
        FieldSpec::raw(PITCH_ROLL_MIN, PITCH_ROLL_MAX),
        FieldSpec::raw(PITCH_ROLL_MIN, PITCH_ROLL_MAX),
    ],
};
