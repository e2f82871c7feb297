use super::*;
use crate::fixedmath::{exp2_frac, saturate_i16, scale_i16, sin_half, Scalar};
use oorandom::Rand32;

/// Default random seed to use if not provided a seed
const RANDOM_SEED: u64 = 0x5f1e_9c3a_07d2_b481u64;

const PHASE_MASK: u32 = (1 << 24) - 1;
const HALF_BIT: u32 = 1 << 23;

/// Phase increment (24 bit phase, Q8) per CV update at speed CV 0: 0.125Hz
const BASE_INCREMENT_Q8: u64 = (((1u64 << 24) << 8) / 8) / crate::context::CV_HZ as u64;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
/// The LFO waveform in use
pub enum LfoWave {
    /// Triangle wave is default
    #[default]
    Triangle,
    /// Sine wave
    Sine,
    /// Rising sawtooth
    Saw,
    /// Falling sawtooth
    RevSaw,
    /// Square wave, alternating extremes each half period
    Square,
    /// Sample and hold: a new random value every half period
    SampleHold,
    /// Noise, a new pseudo-random value every update
    Noise,
}

impl Serialize for LfoWave {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

struct LfoWaveVisitor;
impl<'de> serde::de::Visitor<'de> for LfoWaveVisitor {
    type Value = u8;
    fn visit_u8<E>(self, value: u8) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value)
    }
    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value.min(u8::MAX as u64) as u8)
    }
    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        formatter.write_str("An integer corresponding to a valid LfoWave")
    }
}

impl<'de> Deserialize<'de> for LfoWave {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let as_int = deserializer.deserialize_u8(LfoWaveVisitor {})?;
        Ok(LfoWave::new_from_u8(as_int).unwrap_or_default())
    }
}

impl LfoWave {
    const ELEM: [LfoWave; 7] = [
        Self::Triangle,
        Self::Sine,
        Self::Saw,
        Self::RevSaw,
        Self::Square,
        Self::SampleHold,
        Self::Noise,
    ];
    /// Returns a slice to all of the possible LfoWaves
    pub const fn waves() -> &'static [LfoWave] {
        &Self::ELEM
    }
    /// Provides the name of the waveform (long-format)
    pub const fn to_str(&self) -> &'static str {
        [
            "Triangle",
            "Sine",
            "Saw",
            "Reverse Saw",
            "Square",
            "Sample & Hold",
            "Noise",
        ][*self as usize]
    }
    /// Provides the name of the waveform (short-format)
    ///
    /// This is a single character (for waveforms with unicode representations)
    /// or up to three character abbreviation (e.g. "S+H")
    pub const fn to_str_short(&self) -> &'static str {
        [
            "\u{039B}", // Λ
            "\u{223F}", // ∿
            "\u{2A58}", // ⩘
            "\u{2A57}", // ⩗
            "\u{238D}", // ⎍
            "S+H",
            "NSE",
        ][*self as usize]
    }
    /// Try to create a LfoWave from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
    /// True for the waves that only change at half period boundaries (or
    /// faster, for noise) rather than following the phase
    pub const fn is_discrete(&self) -> bool {
        matches!(self, Self::Square | Self::SampleHold | Self::Noise)
    }
}

impl From<LfoWave> for &'static str {
    fn from(value: LfoWave) -> Self {
        value.to_str()
    }
}

impl TryFrom<u8> for LfoWave {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        Self::new_from_u8(value).ok_or("Conversion of u8 to LfoWave Overflowed")
    }
}

/// Parameters for an [Lfo]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoParams {
    /// Waveform
    pub wave: LfoWave,
    /// Speed CV.  0 is 0.125Hz and every 0x2000 doubles the rate.
    pub speed: u16,
    /// Slow the LFO down by this many octaves
    pub shift: u8,
    /// Output level; scales the bipolar output
    pub level: u16,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            wave: LfoWave::Triangle,
            speed: 0x6000,
            shift: 0,
            level: u16::MAX,
        }
    }
}

/// Phase increment (24 bit phase) per CV update for a speed CV and shift
pub fn lfo_increment(speed: u16, shift: u8) -> u32 {
    let octave = (speed >> 13) as u32;
    let mant = exp2_frac((speed & 0x1FFF) << 3) as u64;
    let inc = ((BASE_INCREMENT_Q8 * mant) >> 30) << octave;
    ((inc >> 8) as u32 >> shift.min(24)).max(1)
}

/// Convert a tempo to the speed CV giving one LFO cycle per `beats` beats.
/// Tempos outside the speed range are clamped.
pub fn speed_for_tempo(bpm: u16, beats: u8) -> u16 {
    // cycles per second = bpm / (60 * beats); speed = 0x2000 * log2(hz / 0.125)
    let beats = beats.max(1) as u32;
    // hz / 0.125 in Q16
    let ratio = ((bpm as u64) << 16) * 8 / (60 * beats as u64);
    if ratio < (1 << 16) {
        return 0;
    }
    let octave = 63 - ratio.leading_zeros() - 16;
    if octave >= 8 {
        return u16::MAX;
    }
    // linear approximation inside the octave, refined against the exp2 table
    let frac_q16 = (((ratio >> octave) - (1 << 16)) as u32).min(0xFFFF);
    let mut lo = 0u32;
    let mut hi = 0x2000u32;
    while lo + 1 < hi {
        let mid = (lo + hi) / 2;
        let m = ((exp2_frac((mid << 3) as u16) >> 14) as u32).saturating_sub(1 << 16);
        if m <= frac_q16 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    ((octave << 13) + lo).min(u16::MAX as u32) as u16
}

/// A free-running low frequency oscillator.
///
/// The 24 bit phase is split into two half periods.  Continuous waves follow
/// the phase; square and sample-and-hold only change value at half period
/// boundaries.  There is no gate; use [Lfo::reset_phase] to sync to a clock.
#[derive(Clone, Debug)]
pub struct Lfo {
    rng: Rand32,
    phase: u32,
    half: bool,
    held: i16,
    lfsr: u16,
    raw: i16,
    output: i16,
}

impl Lfo {
    /// Constructor
    pub fn new(seed: u64) -> Self {
        let mut retval = Self {
            rng: Rand32::new(seed),
            phase: 0,
            half: false,
            held: 0,
            lfsr: (seed as u16) | 1,
            raw: 0,
            output: 0,
        };
        retval.sample_random();
        retval
    }
    fn sample_random(&mut self) {
        self.held = (self.rng.rand_u32() >> 16) as u16 as i16;
    }
    fn step_lfsr(&mut self) {
        // maximal length 16 bit Galois LFSR
        let lsb = self.lfsr & 1;
        self.lfsr >>= 1;
        if lsb != 0 {
            self.lfsr ^= 0xB400;
        }
    }
    /// Restart the cycle, used for clock sync and key reset
    pub fn reset_phase(&mut self) {
        self.phase = 0;
        self.half = false;
        self.sample_random();
    }
    /// The current 24 bit phase
    pub fn phase(&self) -> u32 {
        self.phase
    }
    /// The unscaled bipolar output of the last update
    pub fn raw(&self) -> i16 {
        self.raw
    }
    /// The output of the last update, scaled by the level
    pub fn output(&self) -> i16 {
        self.output
    }
    /// The last output remapped to `0..=0xFFFF`
    pub fn output_unipolar(&self) -> u16 {
        (self.output as i32 + 0x8000) as u16
    }
    fn shape(&self, wave: LfoWave) -> i16 {
        let x = (self.phase >> 8) as i32;
        match wave {
            LfoWave::Triangle => {
                if x < 0x8000 {
                    saturate_i16(2 * x - 0x8000)
                } else {
                    saturate_i16(0x7FFF - 2 * (x - 0x8000))
                }
            }
            LfoWave::Sine => {
                let s = sin_half(Scalar::from_bits((x << 1) as u16)).to_bits();
                if self.half {
                    -s
                } else {
                    s
                }
            }
            LfoWave::Saw => (x - 0x8000) as i16,
            LfoWave::RevSaw => saturate_i16(0x7FFF - x),
            LfoWave::Square => {
                if self.half {
                    -i16::MAX
                } else {
                    i16::MAX
                }
            }
            LfoWave::SampleHold => self.held,
            LfoWave::Noise => self.lfsr as i16,
        }
    }
    /// Advance by one CV update and return the scaled output
    pub fn update(&mut self, params: &LfoParams) -> i16 {
        self.phase = self
            .phase
            .wrapping_add(lfo_increment(params.speed, params.shift))
            & PHASE_MASK;
        let half = self.phase & HALF_BIT != 0;
        if half != self.half {
            self.half = half;
            self.sample_random();
        }
        if params.wave == LfoWave::Noise {
            self.step_lfsr();
        }
        self.raw = self.shape(params.wave);
        self.output = scale_i16(self.raw, Scalar::from_bits(params.level));
        self.output
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new(RANDOM_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CV_HZ;

    fn measure_hz(params: &LfoParams, updates: u32) -> f32 {
        let mut lfo = Lfo::default();
        let mut wraps = 0;
        let mut last = lfo.phase();
        for _ in 0..updates {
            lfo.update(params);
            if lfo.phase() < last {
                wraps += 1;
            }
            last = lfo.phase();
        }
        wraps as f32 * CV_HZ as f32 / updates as f32
    }

    #[test]
    fn speed_range() {
        let slow = LfoParams {
            speed: 0,
            ..Default::default()
        };
        let hz = lfo_increment(0, 0) as f32 * CV_HZ as f32 / (1 << 24) as f32;
        assert!((hz - 0.125).abs() < 0.001, "{}", hz);
        assert!((measure_hz(&slow, CV_HZ * 80) - 0.125).abs() < 0.02);
        let fast = LfoParams {
            speed: 0x8000,
            ..Default::default()
        };
        assert!((measure_hz(&fast, CV_HZ * 10) - 2.0).abs() < 0.2);
        assert_eq!(lfo_increment(0x8000, 1), lfo_increment(0x6000, 0));
    }
    #[test]
    fn tempo_to_speed() {
        // 120bpm, one cycle per beat is 2Hz
        let speed = speed_for_tempo(120, 1);
        assert!(speed.abs_diff(0x8000) < 8, "{:#x}", speed);
        assert_eq!(speed_for_tempo(1, 4), 0);
        assert_eq!(speed_for_tempo(6000, 1), u16::MAX);
        let hz = lfo_increment(speed_for_tempo(90, 1), 0) as f32 * CV_HZ as f32
            / (1 << 24) as f32;
        assert!((hz - 1.5).abs() < 0.01, "{}", hz);
    }
    #[test]
    fn square_alternates_each_half() {
        let params = LfoParams {
            wave: LfoWave::Square,
            speed: 0xC000,
            ..Default::default()
        };
        let mut lfo = Lfo::default();
        let mut changes = 0;
        lfo.update(&params);
        let mut last = lfo.raw();
        for _ in 0..CV_HZ {
            lfo.update(&params);
            let v = lfo.raw();
            assert!(v == i16::MAX || v == -i16::MAX);
            if v != last {
                changes += 1;
            }
            last = v;
        }
        // 8Hz for a second: 16 half periods
        assert!((15..=17).contains(&changes), "{}", changes);
    }
    #[test]
    fn sample_hold_changes_only_on_half_period() {
        let params = LfoParams {
            wave: LfoWave::SampleHold,
            ..Default::default()
        };
        let mut lfo = Lfo::default();
        let mut last = lfo.update(&params);
        let mut last_half = lfo.phase() & HALF_BIT;
        for _ in 0..10_000 {
            let v = lfo.update(&params);
            let half = lfo.phase() & HALF_BIT;
            if half == last_half {
                assert_eq!(v, last);
            }
            last = v;
            last_half = half;
        }
    }
    #[test]
    fn noise_moves_every_update() {
        let params = LfoParams {
            wave: LfoWave::Noise,
            ..Default::default()
        };
        let mut lfo = Lfo::default();
        let mut last = lfo.update(&params);
        for _ in 0..100 {
            let v = lfo.update(&params);
            assert_ne!(v, last);
            last = v;
        }
    }
    #[test]
    fn continuous_shapes() {
        let mut lfo = Lfo::default();
        lfo.phase = 0;
        assert_eq!(lfo.shape(LfoWave::Triangle), i16::MIN);
        assert_eq!(lfo.shape(LfoWave::Saw), i16::MIN);
        assert_eq!(lfo.shape(LfoWave::RevSaw), 0x7FFF);
        assert_eq!(lfo.shape(LfoWave::Sine), 0);
        lfo.phase = 1 << 22;
        assert!(lfo.shape(LfoWave::Sine) > 32700);
        assert!(lfo.shape(LfoWave::Triangle).abs() < 2);
        lfo.phase = HALF_BIT;
        assert!(lfo.shape(LfoWave::Triangle) >= 0x7FFE);
        lfo.phase = 3 << 22;
        lfo.half = true;
        assert!(lfo.shape(LfoWave::Sine) < -32700);
    }
    #[test]
    fn phase_wraps_at_24_bits() {
        let params = LfoParams {
            speed: 0xFFFF,
            ..Default::default()
        };
        let mut lfo = Lfo::default();
        lfo.phase = PHASE_MASK - 10;
        lfo.half = true;
        lfo.update(&params);
        assert!(lfo.phase() < lfo_increment(0xFFFF, 0));
        assert!(!lfo.half);
    }
    #[test]
    fn level_scales_output() {
        let params = LfoParams {
            wave: LfoWave::Square,
            level: 0x8000,
            ..Default::default()
        };
        let mut lfo = Lfo::default();
        let v = lfo.update(&params);
        assert_eq!(v, i16::MAX / 2);
        assert_eq!(lfo.raw(), i16::MAX);
        let silent = LfoParams { level: 0, ..params };
        assert_eq!(lfo.update(&silent), 0);
    }
    #[test]
    fn reset_restarts_cycle() {
        let mut lfo = Lfo::default();
        let params = LfoParams::default();
        for _ in 0..1234 {
            lfo.update(&params);
        }
        lfo.reset_phase();
        assert_eq!(lfo.phase(), 0);
    }
    #[test]
    fn wave_conversions() {
        assert_eq!(LfoWave::try_from(6), Ok(LfoWave::Noise));
        assert!(LfoWave::try_from(7).is_err());
        for w in LfoWave::waves() {
            assert_eq!(LfoWave::new_from_u8(*w as u8), Some(*w));
        }
    }
}
