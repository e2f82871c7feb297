use super::*;
use crate::fixedmath::{pitch_to_frequency, PITCH_PER_OCTAVE};
use crate::wave::{WaveStore, Waveform};

/// Virtual clock units per output sample
const SAMPLE_UNITS: u32 = 1 << 16;
/// Narrowest half-cycle, as a fraction of the period (Q16): 1/8
const WIDTH_MIN: u32 = 0x2000;
/// Widest half-cycle, as a fraction of the period (Q16): 7/8
const WIDTH_MAX: u32 = 0xE000;
/// Octaves below this use the full output rate as the resampling ceiling
const CEILING_OCTAVE: u32 = 5;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// What the WaveMod amount does to an oscillator
pub enum WaveModTarget {
    /// Increase undersampling and skip interpolation
    #[default]
    Aliasing,
    /// Move the split point between the two half-cycles
    Width,
    /// Raise the frequency by up to an octave
    Ratio,
    /// Blend towards the crossover waveform
    Crossover,
}

impl WaveModTarget {
    const ELEM: [WaveModTarget; 4] = [Self::Aliasing, Self::Width, Self::Ratio, Self::Crossover];
    /// Returns a slice to all of the possible targets
    pub const fn targets() -> &'static [WaveModTarget] {
        &Self::ELEM
    }
    /// Display name
    pub const fn to_str(&self) -> &'static str {
        ["Aliasing", "Width", "Ratio", "Crossover"][*self as usize]
    }
    /// Try to create a WaveModTarget from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
}

impl TryFrom<u8> for WaveModTarget {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        Self::new_from_u8(value).ok_or("Conversion of u8 to WaveModTarget Overflowed")
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
/// The part an oscillator plays in hard sync
pub enum SyncRole {
    /// Free running
    #[default]
    None,
    /// Reports its cycle wraps
    Master,
    /// Resets its phase when told to
    Slave,
}

/// The output of one [WaveOsc::update]
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub struct OscOutput {
    /// The output sample
    pub sample: u16,
    /// True if the cycle wrapped during this sample.  Only reported by a
    /// [SyncRole::Master].
    pub wrapped: bool,
}

/// Per half-cycle resampling state
#[derive(Default, Clone, Copy, Debug)]
struct HalfCycle {
    /// Virtual clock units between wave steps
    period: u32,
    /// `2^32 / period`
    recip: u32,
    /// Wave samples advanced per step
    step: u32,
}

/// A wavetable oscillator.
///
/// Each period of the stored waveform is played as two half-cycles that are
/// clocked independently, so the split point (the width) can be moved away
/// from the middle without changing the pitch.  Each half has a resample
/// period in virtual clock units and an undersample step.  Every output
/// sample runs the virtual clock down by one sample; when it runs out the
/// phase steps back through the wave and a new sample is latched.  Between
/// steps the output is linearly interpolated unless aliasing is requested.
///
/// The phase counts the samples remaining in the cycle, from the waveform
/// length down to 1, so the sample being read is `len - phase`.
#[derive(Default, Clone, Debug)]
pub struct WaveOsc {
    main: usize,
    crossover: Option<usize>,
    len: u32,
    halves: [HalfCycle; 2],
    counter: u32,
    active_period: u32,
    active_recip: u32,
    phase: u32,
    prev: u16,
    cur: u16,
    cross_prev: u16,
    cross_cur: u16,
    raw: bool,
    blend: u16,
    role: SyncRole,
}

impl WaveOsc {
    /// Constructor
    pub fn new() -> Self {
        Default::default()
    }
    /// Select the main waveform slot and an optional crossover slot
    pub fn set_waves(&mut self, main: usize, crossover: Option<usize>) {
        self.main = main;
        self.crossover = crossover;
    }
    /// Set the hard sync role
    pub fn set_role(&mut self, role: SyncRole) {
        self.role = role;
    }
    /// The current hard sync role
    pub fn role(&self) -> SyncRole {
        self.role
    }
    /// Samples remaining in the current cycle
    pub fn phase(&self) -> u32 {
        self.phase
    }
    /// The undersample step of each half-cycle
    pub fn steps(&self) -> [u32; 2] {
        [self.halves[0].step, self.halves[1].step]
    }
    /// Recompute the resampling state for a pitch and WaveMod setting.
    ///
    /// Called at the CV update rate.  The new periods take effect at the next
    /// wave step, so changing them never causes a jump in the output.
    pub fn set_parameters(
        &mut self,
        context: &Context,
        store: &WaveStore,
        pitch: u16,
        target: WaveModTarget,
        amount: u16,
    ) {
        let wave = store.get(self.main);
        let len = wave.len() as u32;
        if len != self.len {
            self.len = len;
            self.phase = if self.phase == 0 {
                len
            } else {
                self.phase.clamp(1, len)
            };
        }
        let (pitch, width, alias) = match target {
            WaveModTarget::Ratio => (pitch.saturating_add(amount >> 4), 0x8000, 0),
            WaveModTarget::Width => (pitch, (amount as u32).clamp(WIDTH_MIN, WIDTH_MAX), 0),
            WaveModTarget::Aliasing => (pitch, 0x8000, amount),
            WaveModTarget::Crossover => (pitch, 0x8000, 0),
        };
        self.blend = if target == WaveModTarget::Crossover && self.crossover.is_some() {
            amount
        } else {
            0
        };
        self.raw = alias != 0;
        let freq = pitch_to_frequency(pitch).to_bits() as u64;
        let fs = context.sample_rate() as u64;
        let ceiling = resample_ceiling(fs, pitch, alias);
        for (half, w) in self.halves.iter_mut().zip([width, 0x10000 - width]) {
            // target rate in Hz, 18 fractional bits: f * len / (2 * w)
            let rate = ((freq * len as u64 * 0x8000) / w as u64).max(1);
            let step = rate.div_ceil(ceiling << 18).clamp(1, (len / 2) as u64);
            let period = ((fs << 34) * step / rate).clamp(SAMPLE_UNITS as u64, u32::MAX as u64);
            half.step = step as u32;
            half.period = period as u32;
            half.recip = ((1u64 << 32) / period) as u32;
        }
        if self.active_period == 0 {
            self.reload(0);
        }
    }
    fn reload(&mut self, half: usize) {
        let h = self.halves[half];
        self.counter = self.counter.saturating_add(h.period);
        self.active_period = h.period;
        self.active_recip = h.recip;
    }
    fn active_half(&self) -> usize {
        if self.phase > self.len / 2 {
            0
        } else {
            1
        }
    }
    fn latch(&mut self, wave: &Waveform, cross: Option<&Waveform>) {
        let index = (self.len - self.phase) as usize;
        self.prev = self.cur;
        self.cur = wave.sample(index);
        if let Some(cross) = cross {
            self.cross_prev = self.cross_cur;
            self.cross_cur = cross.sample(index);
        }
    }
    /// Restart the cycle, as done to a slave on its master's wrap
    pub fn sync_reset(&mut self, store: &WaveStore) {
        self.phase = self.len.max(1);
        self.counter = 0;
        self.reload(0);
        let wave = store.get(self.main);
        let cross = self.crossover.map(|c| store.get(c));
        self.latch(wave, cross);
        self.prev = self.cur;
        self.cross_prev = self.cross_cur;
    }
    fn step(&mut self, wave: &Waveform, cross: Option<&Waveform>) -> bool {
        let step = self.halves[self.active_half()].step;
        let mut wrapped = false;
        if self.phase <= step {
            self.phase = self.phase + self.len - step;
            wrapped = true;
        } else {
            self.phase -= step;
        }
        self.latch(wave, cross);
        wrapped
    }
    /// Produce one output sample.  `sync` resets a slave's phase before the
    /// sample is produced.
    pub fn update(&mut self, store: &WaveStore, sync: bool) -> OscOutput {
        if self.len == 0 || self.active_period == 0 {
            return OscOutput {
                sample: crate::wave::MID_SCALE,
                wrapped: false,
            };
        }
        if sync && self.role == SyncRole::Slave {
            self.sync_reset(store);
        }
        let wave = store.get(self.main);
        let cross = self.crossover.map(|c| store.get(c));
        let mut wrapped = false;
        if self.counter > SAMPLE_UNITS {
            self.counter -= SAMPLE_UNITS;
        } else {
            wrapped = self.step(wave, cross);
            self.reload(self.active_half());
            self.counter = self.counter.saturating_sub(SAMPLE_UNITS);
        }
        let main = self.interpolate(self.prev, self.cur);
        let sample = if self.blend != 0 {
            let cross = self.interpolate(self.cross_prev, self.cross_cur);
            lerp(main, cross, self.blend as u32)
        } else {
            main
        };
        OscOutput {
            sample,
            wrapped: wrapped && self.role == SyncRole::Master,
        }
    }
    fn interpolate(&self, prev: u16, cur: u16) -> u16 {
        if self.raw {
            return cur;
        }
        let elapsed = self.active_period.saturating_sub(self.counter) as u64;
        let frac = ((elapsed * self.active_recip as u64) >> 16).min(0xFFFF);
        lerp(prev, cur, frac as u32)
    }
}

/// `a + (b - a) * frac`, with `frac` in Q16.  The product needs 33 bits.
fn lerp(a: u16, b: u16, frac: u32) -> u16 {
    let a = a as i64;
    let b = b as i64;
    (a + (((b - a) * frac.min(0xFFFF) as i64) >> 16)) as u16
}

/// Highest wave step rate allowed before undersampling kicks in: the output
/// rate for low pitches, halving each octave above [CEILING_OCTAVE] down to
/// an eighth, then lowered further by the aliasing amount.
fn resample_ceiling(fs: u64, pitch: u16, alias: u16) -> u64 {
    let octave = pitch as u32 / PITCH_PER_OCTAVE;
    let ceiling = fs >> octave.saturating_sub(CEILING_OCTAVE).min(3);
    let cut = (ceiling * alias as u64 * 15) >> 20;
    (ceiling - cut).max(1)
}
