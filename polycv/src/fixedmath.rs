//! Fixed-point math used by the engine.
//!
//! Everything here trades accuracy for speed: lookup tables are generated at
//! compile time by `const fn` generators and interpolated at run time, so the
//! real-time paths never touch floating point.

pub use fixed::types::*;

/// An unsigned level or depth in `[0, 1)`
pub type Scalar = U0F16;
/// A signed level in `[-1, 1)`
pub type IScalar = I1F15;
/// A MIDI note number with 9 fractional bits (about 0.2 cents resolution)
pub type Note = U7F9;
/// A frequency in Hz, 14 integral bits and 18 fractional bits.  14 bits holds
/// the highest MIDI note frequency.
pub type Frequency = U14F18;

/// Pitch CV units per octave.  Pitch CVs are absolute: 0 is MIDI note 0.
pub const PITCH_PER_OCTAVE: u32 = 4096;
/// Frequency of MIDI note 0 (C-1), the pitch CV origin
pub const FREQ_C_NEG1: Frequency = Frequency::lit("8.175798916");

// Compile-time float helpers.  These only ever run inside table generators.

const fn f_abs(x: f64) -> f64 {
    if x < 0f64 {
        -x
    } else {
        x
    }
}

// e^x via range reduction to [-0.5, 0.5] and a Taylor series
const fn const_exp(x: f64) -> f64 {
    let mut halvings = 0;
    let mut r = x;
    while f_abs(r) > 0.5f64 {
        r /= 2f64;
        halvings += 1;
    }
    let mut term = 1f64;
    let mut acc = 1f64;
    let mut n = 1u32;
    while n < 24 {
        term = term * r / (n as f64);
        acc += term;
        n += 1;
    }
    while halvings > 0 {
        acc *= acc;
        halvings -= 1;
    }
    acc
}

/// 2^x for any x, evaluated at compile time
pub(crate) const fn const_pow2(x: f64) -> f64 {
    const LN_2: f64 = 0.693_147_180_559_945_3;
    const_exp(x * LN_2)
}

// sin(x) for x in [0, pi]
const fn const_sin(x: f64) -> f64 {
    let mut term = x;
    let mut acc = x;
    let mut n = 1u32;
    while n < 16 {
        let k = (2 * n) as f64;
        term = -term * x * x / (k * (k + 1f64));
        acc += term;
        n += 1;
    }
    acc
}

/// `2^(i/256)` for `i` in `0..=256`, as U2F30 bits
const EXP2_TABLE: [u32; 257] = {
    let mut table = [0u32; 257];
    let mut i = 0;
    while i <= 256 {
        let v = const_pow2(i as f64 / 256f64);
        table[i] = (v * (1u64 << 30) as f64 + 0.5f64) as u32;
        i += 1;
    }
    table
};

/// `sin(pi * i / 256)` for `i` in `0..=256`, scaled to `0..=0x7FFF`
const HALF_SINE_TABLE: [u16; 257] = {
    const PI: f64 = 3.141_592_653_589_793;
    let mut table = [0u16; 257];
    let mut i = 0;
    while i <= 256 {
        let v = const_sin(PI * i as f64 / 256f64);
        let v = if v < 0f64 { 0f64 } else { v };
        table[i] = (v * 32767f64 + 0.5f64) as u16;
        i += 1;
    }
    table
};

/// Curvature of the exponential envelope segment
const EXP_SHAPE_K: f64 = 4.0;

/// A concave charge curve `(1 - e^(-kx)) / (1 - e^(-k))`, scaled to `0..=0xFFFF`
const EXP_SHAPE_TABLE: [u16; 257] = {
    let mut table = [0u16; 257];
    let denom = 1f64 - const_exp(-EXP_SHAPE_K);
    let mut i = 0;
    while i <= 256 {
        let x = i as f64 / 256f64;
        let v = (1f64 - const_exp(-EXP_SHAPE_K * x)) / denom;
        let v = if v > 1f64 { 1f64 } else { v };
        table[i] = (v * 65535f64 + 0.5f64) as u16;
        i += 1;
    }
    table
};

/// Linearly interpolate a 257-entry `u32` table with a 16 bit index
#[inline]
pub(crate) fn interp_u32(table: &[u32; 257], x: u16) -> u32 {
    let idx = (x >> 8) as usize;
    let frac = (x & 0xFF) as u64;
    let lo = table[idx] as u64;
    let hi = table[idx + 1] as u64;
    if hi >= lo {
        (lo + (((hi - lo) * frac) >> 8)) as u32
    } else {
        (lo - (((lo - hi) * frac) >> 8)) as u32
    }
}

/// `2^(x / 65536)` for a 16 bit fraction `x`, as U2F30 bits
pub fn exp2_frac(x: u16) -> u32 {
    interp_u32(&EXP2_TABLE, x)
}

/// `sin(pi * x)` for `x` in `[0, 1)` given as U0F16, returned in `[0, 1)`
pub fn sin_half(x: Scalar) -> IScalar {
    let bits = x.to_bits();
    let idx = (bits >> 8) as usize;
    let frac = (bits & 0xFF) as i32;
    let lo = HALF_SINE_TABLE[idx] as i32;
    let hi = HALF_SINE_TABLE[idx + 1] as i32;
    IScalar::from_bits((lo + (((hi - lo) * frac) >> 8)) as i16)
}

/// Catmull-Rom (cubic Hermite) interpolation of the exponential shape table.
///
/// `phase` is a 24 bit fraction.  The result is exactly 0 at phase 0, which
/// the envelope relies on for continuity at stage boundaries.
pub fn exp_shape(phase: u32) -> u16 {
    let phase = phase & 0x00FF_FFFF;
    let idx = (phase >> 16) as usize;
    let t = (phase & 0xFFFF) as i64;
    let at = |i: isize| -> i64 {
        let i = i.clamp(0, 256) as usize;
        EXP_SHAPE_TABLE[i] as i64
    };
    let i = idx as isize;
    let (p0, p1, p2, p3) = (at(i - 1), at(i), at(i + 1), at(i + 2));
    // coefficients doubled to keep everything integral
    let c1 = p2 - p0;
    let c2 = 2 * p0 - 5 * p1 + 4 * p2 - p3;
    let c3 = 3 * (p1 - p2) + p3 - p0;
    let mut acc = (c3 * t) >> 16;
    acc = ((acc + c2) * t) >> 16;
    acc = ((acc + c1) * t) >> 17;
    (p1 + acc).clamp(0, 0xFFFF) as u16
}

/// Linear envelope segment: the top 16 bits of the 24 bit phase
pub fn linear_shape(phase: u32) -> u16 {
    ((phase & 0x00FF_FFFF) >> 8) as u16
}

/// Saturate a wide intermediate to an unsigned 16 bit CV
#[inline]
pub fn saturate_u16(x: i32) -> u16 {
    x.clamp(0, u16::MAX as i32) as u16
}

/// Saturate a wide intermediate to a signed 16 bit value
#[inline]
pub fn saturate_i16(x: i32) -> i16 {
    x.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Scale a signed value by an unsigned scalar
#[inline]
pub fn scale_i16(x: i16, by: Scalar) -> i16 {
    ((x as i32 * by.to_bits() as i32) >> 16) as i16
}

/// Scale an unsigned value by an unsigned scalar
#[inline]
pub fn scale_u16(x: u16, by: Scalar) -> u16 {
    ((x as u32 * by.to_bits() as u32) >> 16) as u16
}

/// Convert an integer MIDI note number to an absolute pitch CV
pub fn note_to_pitch(note: u8) -> u16 {
    ((note as u32 * PITCH_PER_OCTAVE + 6) / 12) as u16
}

/// Convert an absolute pitch CV to a frequency.
///
/// The octave is looked up in `2^x` and then applied as a shift, so the
/// relative accuracy is the same in every octave.  Frequencies above the
/// representable range saturate.
pub fn pitch_to_frequency(pitch: u16) -> Frequency {
    let octave = (pitch as u32) / PITCH_PER_OCTAVE;
    let frac = ((pitch as u32 % PITCH_PER_OCTAVE) << 4) as u16;
    let mant = exp2_frac(frac) as u64;
    let base = FREQ_C_NEG1.to_bits() as u64;
    let f = ((base * mant) >> 30) << octave;
    Frequency::from_bits(f.min(u32::MAX as u64) as u32)
}

/// Convert a MIDI note with fractional part to a frequency
pub fn midi_note_to_frequency(note: Note) -> Frequency {
    let pitch = (note.to_bits() as u32 * PITCH_PER_OCTAVE) / (12 << 9);
    pitch_to_frequency(pitch.min(u16::MAX as u32) as u16)
}
