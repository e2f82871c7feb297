//! Calibration of the analog CV path.
//!
//! The tuner drives a voice's tuned CV through a [TuneProbe], measures the
//! resulting audio frequency from zero crossings and bisects the CV until it
//! lands on each octave.  The result is a [TuneTable] that the engine uses to
//! turn pitch (4096 units per octave) into DAC codes.

use crate::assigner::MAX_VOICES;
use crate::fixedmath::{note_to_pitch, pitch_to_frequency, saturate_u16, PITCH_PER_OCTAVE};

/// Octaves measured per voice
pub const TUNE_OCTAVES: usize = 8;
/// The note tuned at the bottom of the table (C1)
pub const TUNE_BASE_NOTE: u8 = 24;
/// DAC codes per octave of an untuned voice
pub const NOMINAL_CV_PER_OCTAVE: i32 = 0x2000;
/// Default tolerance: 2 cents is a frequency ratio of about 1/865
pub const DEFAULT_TOLERANCE: u32 = 865;
/// Default bisection limit
pub const DEFAULT_ITERATIONS: u8 = 16;

/// A frequency measurement: `periods` whole cycles took `samples` samples
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// Whole cycles counted
    pub periods: u32,
    /// Samples spanned by those cycles
    pub samples: u32,
}

impl Measurement {
    /// The measured frequency in millihertz at sample rate `fs`
    pub fn millihertz(&self, fs: u32) -> u64 {
        if self.samples == 0 {
            return 0;
        }
        self.periods as u64 * fs as u64 * 1000 / self.samples as u64
    }
}

/// Counts rising zero crossings in an audio stream with hysteresis
#[derive(Clone, Debug)]
pub struct ZeroCrossingCounter {
    hysteresis: u16,
    high: Option<bool>,
    position: u32,
    first: Option<u32>,
    last: u32,
    crossings: u32,
}

impl ZeroCrossingCounter {
    /// The signal must swing `hysteresis` away from mid-scale to count as a
    /// crossing
    pub fn new(hysteresis: u16) -> Self {
        Self {
            hysteresis,
            high: None,
            position: 0,
            first: None,
            last: 0,
            crossings: 0,
        }
    }
    /// Forget everything counted so far
    pub fn reset(&mut self) {
        *self = Self::new(self.hysteresis);
    }
    /// Feed unsigned samples centered on 0x8000
    pub fn feed(&mut self, samples: &[u16]) {
        let upper = 0x8000 + self.hysteresis as i32;
        let lower = 0x8000 - self.hysteresis as i32;
        for s in samples.iter().map(|s| *s as i32) {
            match self.high {
                Some(false) if s > upper => {
                    self.high = Some(true);
                    self.crossings += 1;
                    self.last = self.position;
                    if self.first.is_none() {
                        self.first = Some(self.position);
                    }
                }
                Some(true) if s < lower => self.high = Some(false),
                None if s > upper => self.high = Some(true),
                None if s < lower => self.high = Some(false),
                _ => {}
            }
            self.position = self.position.wrapping_add(1);
        }
    }
    /// The measurement, once at least two rising crossings were seen
    pub fn measurement(&self) -> Option<Measurement> {
        let first = self.first?;
        (self.crossings >= 2).then(|| Measurement {
            periods: self.crossings - 1,
            samples: self.last.wrapping_sub(first),
        })
    }
}

/// The hardware side of tuning
pub trait TuneProbe {
    /// Output sample rate of [TuneProbe::measure]'s audio
    fn sample_rate(&self) -> u32;
    /// Drive a voice's tuned CV and let it settle
    fn set_cv(&mut self, voice: usize, cv: u16);
    /// Measure the voice's output, or `None` if nothing usable was heard
    fn measure(&mut self, voice: usize) -> Option<Measurement>;
}

/// Per voice, the DAC code that produces each octave from [TUNE_BASE_NOTE]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TuneTable {
    codes: [[u16; TUNE_OCTAVES]; MAX_VOICES],
}

impl Default for TuneTable {
    fn default() -> Self {
        Self::nominal()
    }
}

impl TuneTable {
    /// A table for ideal hardware
    pub fn nominal() -> Self {
        let mut codes = [[0u16; TUNE_OCTAVES]; MAX_VOICES];
        for voice in codes.iter_mut() {
            for (i, c) in voice.iter_mut().enumerate() {
                *c = saturate_u16(i as i32 * NOMINAL_CV_PER_OCTAVE);
            }
        }
        Self { codes }
    }
    /// The codes for one voice (clamped)
    pub fn codes(&self, voice: usize) -> &[u16; TUNE_OCTAVES] {
        &self.codes[voice.min(MAX_VOICES - 1)]
    }
    /// Replace the codes for one voice
    pub fn set_codes(&mut self, voice: usize, codes: [u16; TUNE_OCTAVES]) {
        if let Some(v) = self.codes.get_mut(voice) {
            *v = codes;
        }
    }
    /// The DAC code for a pitch, interpolating between octaves and
    /// extrapolating beyond the measured range
    pub fn cv_for_pitch(&self, voice: usize, pitch: u16) -> u16 {
        let codes = self.codes(voice);
        let offset = pitch as i32 - note_to_pitch(TUNE_BASE_NOTE) as i32;
        let octave = offset.div_euclid(PITCH_PER_OCTAVE as i32);
        let idx = octave.clamp(0, TUNE_OCTAVES as i32 - 2) as usize;
        let lo = codes[idx] as i32;
        let hi = codes[idx + 1] as i32;
        let frac = offset - idx as i32 * PITCH_PER_OCTAVE as i32;
        saturate_u16(lo + (hi - lo) * frac / PITCH_PER_OCTAVE as i32)
    }
}

/// Result of tuning one voice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TuneReport {
    /// Voice index
    pub voice: usize,
    /// Octaves that were measured; the rest were extrapolated
    pub measured: usize,
}

/// The bisection tuner
#[derive(Clone, Copy, Debug)]
pub struct Tuner {
    /// Accept a frequency within `1 / tolerance` of the target
    pub tolerance: u32,
    /// Give up bisecting after this many measurements
    pub max_iterations: u8,
}

impl Default for Tuner {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Target frequency of a table entry, in millihertz
fn target_millihertz(octave: usize) -> u64 {
    let pitch = note_to_pitch(TUNE_BASE_NOTE) as u32 + octave as u32 * PITCH_PER_OCTAVE;
    let freq = pitch_to_frequency(pitch.min(u16::MAX as u32) as u16);
    (freq.to_bits() as u64 * 1000) >> 18
}

impl Tuner {
    /// Bisect for the code that hits `target` (millihertz).  `None` if a
    /// measurement failed.
    fn bisect(&self, probe: &mut impl TuneProbe, voice: usize, target: u64, floor: u16) -> Option<u16> {
        let fs = probe.sample_rate();
        let mut lo = floor as u32;
        let mut hi = u16::MAX as u32;
        let mut best = lo;
        for _ in 0..self.max_iterations.max(1) {
            let mid = (lo + hi) / 2;
            probe.set_cv(voice, mid as u16);
            let freq = probe.measure(voice)?.millihertz(fs);
            best = mid;
            if freq.abs_diff(target) * self.tolerance.max(1) as u64 <= target {
                break;
            }
            if freq < target {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= 1 {
                break;
            }
        }
        Some(best as u16)
    }
    /// Tune one voice.  If a measurement fails the sweep stops and the
    /// remaining octaves are extrapolated.
    pub fn tune_voice(&self, probe: &mut impl TuneProbe, voice: usize, table: &mut TuneTable) -> TuneReport {
        let mut codes = [0u16; TUNE_OCTAVES];
        let mut measured = 0;
        let mut floor = 0;
        for (octave, code) in codes.iter_mut().enumerate() {
            match self.bisect(probe, voice, target_millihertz(octave), floor) {
                Some(c) => {
                    *code = c;
                    floor = c;
                    measured += 1;
                }
                None => {
                    log::warn!("voice {} failed to measure at octave {}", voice, octave);
                    break;
                }
            }
        }
        extrapolate(&mut codes, measured);
        table.set_codes(voice, codes);
        log::info!("voice {} tuned: {} of {} octaves measured", voice, measured, TUNE_OCTAVES);
        TuneReport { voice, measured }
    }
    /// Tune every voice whose bit is set in `mask`
    pub fn tune_all(&self, probe: &mut impl TuneProbe, mask: u8, table: &mut TuneTable) -> [Option<TuneReport>; MAX_VOICES] {
        let mut reports = [None; MAX_VOICES];
        for (voice, report) in reports.iter_mut().enumerate() {
            if mask & (1 << voice) != 0 {
                *report = Some(self.tune_voice(probe, voice, table));
            }
        }
        reports
    }
}

/// Fill `codes[measured..]` from the slope of the last two measured points,
/// or the nominal slope when fewer than two were measured
fn extrapolate(codes: &mut [u16; TUNE_OCTAVES], measured: usize) {
    let (start, slope) = match measured {
        0 => (0, NOMINAL_CV_PER_OCTAVE),
        1 => (codes[0] as i32, NOMINAL_CV_PER_OCTAVE),
        n => (codes[n - 1] as i32, codes[n - 1] as i32 - codes[n - 2] as i32),
    };
    let base = measured.max(1) - 1;
    for (i, code) in codes.iter_mut().enumerate().skip(measured) {
        let steps = i as i32 - base as i32;
        *code = saturate_u16(start + slope * steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A voice whose frequency doubles every `per_octave` codes, starting
    /// from `base_hz` at `offset`
    struct FakeVoice {
        fs: u32,
        base_hz: f64,
        offset: f64,
        per_octave: f64,
        cv: u16,
        dead_above: u16,
        measurements: usize,
    }

    impl FakeVoice {
        fn new() -> Self {
            Self {
                fs: 48000,
                base_hz: 32.703,
                offset: 900.0,
                per_octave: 7900.0,
                cv: 0,
                dead_above: u16::MAX,
                measurements: 0,
            }
        }
        fn freq(&self, cv: u16) -> f64 {
            self.base_hz * ((cv as f64 - self.offset) / self.per_octave).exp2()
        }
    }

    impl TuneProbe for FakeVoice {
        fn sample_rate(&self) -> u32 {
            self.fs
        }
        fn set_cv(&mut self, _voice: usize, cv: u16) {
            self.cv = cv;
        }
        fn measure(&mut self, _voice: usize) -> Option<Measurement> {
            self.measurements += 1;
            if self.cv > self.dead_above {
                return None;
            }
            // a half second window
            let f = self.freq(self.cv);
            let periods = (f * 0.5) as u32;
            Some(Measurement {
                periods,
                samples: (periods as f64 * self.fs as f64 / f).round() as u32,
            })
        }
    }

    fn cents(a: f64, b: f64) -> f64 {
        1200.0 * (a / b).log2()
    }

    #[test]
    fn zero_crossings() {
        let mut zc = ZeroCrossingCounter::new(0x400);
        let fs = 48000.0;
        let f = 440.0;
        let samples: Vec<u16> = (0..48000)
            .map(|i| {
                let s = (2.0 * core::f64::consts::PI * f * i as f64 / fs).sin();
                (0x8000 as f64 + s * 20000.0) as u16
            })
            .collect();
        zc.feed(&samples);
        let m = zc.measurement().expect("enough crossings");
        let hz = m.millihertz(48000) as f64 / 1000.0;
        assert!((hz - f).abs() < 0.1, "{}", hz);
    }
    #[test]
    fn hysteresis_rejects_noise() {
        let mut zc = ZeroCrossingCounter::new(0x1000);
        let noise: Vec<u16> = (0..1000).map(|i| 0x8000 + (i % 7) * 0x100 - 0x300).collect();
        zc.feed(&noise);
        assert_eq!(zc.measurement(), None);
    }
    #[test]
    fn nominal_table_is_linear() {
        let t = TuneTable::nominal();
        let base = note_to_pitch(TUNE_BASE_NOTE);
        assert_eq!(t.cv_for_pitch(0, base), 0);
        assert_eq!(t.cv_for_pitch(0, base + 4096), 0x2000);
        assert_eq!(t.cv_for_pitch(0, base + 2048), 0x1000);
        // above the top octave
        assert_eq!(t.cv_for_pitch(0, base + 4096 * 7 + 2048), 0xF000);
        assert_eq!(t.cv_for_pitch(0, 0), 0);
    }
    #[test]
    fn tunes_within_tolerance() {
        let mut probe = FakeVoice::new();
        let mut table = TuneTable::nominal();
        let report = Tuner::default().tune_voice(&mut probe, 2, &mut table);
        assert_eq!(report.measured, TUNE_OCTAVES);
        for (octave, code) in table.codes(2).iter().enumerate() {
            let target = target_millihertz(octave) as f64 / 1000.0;
            let err = cents(probe.freq(*code), target);
            // the bisection resolution is a little coarser than the target
            assert!(err.abs() < 3.0, "octave {} off by {} cents", octave, err);
        }
        // other voices untouched
        assert_eq!(table.codes(0), TuneTable::nominal().codes(0));
    }
    #[test]
    fn failure_extrapolates() {
        let mut probe = FakeVoice::new();
        // the first probe of octave 3 lands in the silent range
        probe.dead_above = 40000;
        let mut table = TuneTable::nominal();
        let report = Tuner::default().tune_voice(&mut probe, 0, &mut table);
        assert_eq!(report.measured, 3);
        let codes = table.codes(0);
        let slope = codes[2] as i32 - codes[1] as i32;
        assert!((slope - 7900).abs() < 40, "{}", slope);
        for i in 3..TUNE_OCTAVES {
            assert_eq!(codes[i] as i32 - codes[i - 1] as i32, slope);
        }
    }
    #[test]
    fn extrapolate_nominal_slope() {
        let mut codes = [0u16; TUNE_OCTAVES];
        codes[0] = 1000;
        extrapolate(&mut codes, 1);
        assert_eq!(codes[1], 1000 + 0x2000);
        let mut codes = [0u16; TUNE_OCTAVES];
        extrapolate(&mut codes, 0);
        assert_eq!(codes, *TuneTable::nominal().codes(0));
    }
}
