//! Waveform storage.
//!
//! Waveforms are supplied by an external loader as unsigned 16 bit samples.
//! The engine only ever reads them; a slot is replaced as a whole value so an
//! oscillator never sees half of an old waveform and half of a new one.

use arrayvec::ArrayVec;

use crate::fixedmath::{sin_half, Scalar};

/// The largest number of samples a waveform can hold
pub const MAX_WAVE_SAMPLES: usize = 2400;
/// The smallest number of samples a waveform is padded out to
pub const MIN_WAVE_SAMPLES: usize = 16;
/// The neutral (zero volt) sample value used for padding
pub const MID_SCALE: u16 = 0x8000;
/// The number of waveform slots in a [WaveStore]
pub const WAVE_SLOTS: usize = 4;

/// A single cycle of a stored waveform.
///
/// The sample count is always even and at least [MIN_WAVE_SAMPLES], so the
/// oscillator can split it into two equal halves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Waveform {
    samples: ArrayVec<u16, MAX_WAVE_SAMPLES>,
}

impl Waveform {
    /// Build a waveform from raw samples.  Extra samples past
    /// [MAX_WAVE_SAMPLES] are dropped and short or odd-length data is padded
    /// with [MID_SCALE].
    pub fn from_samples(data: &[u16]) -> Self {
        let mut samples = ArrayVec::new();
        let take = data.len().min(MAX_WAVE_SAMPLES);
        // capacity is checked above so this never fails
        let _ = samples.try_extend_from_slice(&data[..take]);
        let mut retval = Self { samples };
        retval.pad();
        retval
    }
    /// Build a waveform from little-endian sample bytes, as read from a file.
    /// A trailing odd byte is ignored.
    pub fn from_le_bytes(data: &[u8]) -> Self {
        let samples = data
            .chunks_exact(2)
            .take(MAX_WAVE_SAMPLES)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let mut retval = Self { samples };
        retval.pad();
        retval
    }
    fn pad(&mut self) {
        while self.samples.len() < MIN_WAVE_SAMPLES
            || (self.samples.len() % 2 != 0 && !self.samples.is_full())
        {
            self.samples.push(MID_SCALE);
        }
        if self.samples.len() % 2 != 0 {
            self.samples.pop();
        }
    }
    /// A silent waveform of the minimum length
    pub fn silent() -> Self {
        Self::from_samples(&[])
    }
    /// A sine wave with `len` samples
    pub fn sine(len: usize) -> Self {
        let len = len.clamp(MIN_WAVE_SAMPLES, MAX_WAVE_SAMPLES);
        let samples = (0..len)
            .map(|i| {
                let pos = ((i as u64 * 0x20000) / len as u64) as u32;
                let s = sin_half(Scalar::from_bits(pos as u16)).to_bits() as i32;
                let s = if pos >= 0x10000 { -s } else { s };
                (s + 0x8000) as u16
            })
            .collect();
        let mut retval = Self { samples };
        retval.pad();
        retval
    }
    /// A rising sawtooth with `len` samples
    pub fn saw(len: usize) -> Self {
        let len = len.clamp(MIN_WAVE_SAMPLES, MAX_WAVE_SAMPLES);
        let samples = (0..len)
            .map(|i| ((i as u64 * 0x10000) / len as u64) as u16)
            .collect();
        let mut retval = Self { samples };
        retval.pad();
        retval
    }
    /// A square wave with `len` samples, high for the first half
    pub fn square(len: usize) -> Self {
        let len = len.clamp(MIN_WAVE_SAMPLES, MAX_WAVE_SAMPLES);
        let samples = (0..len)
            .map(|i| if i < len / 2 { u16::MAX } else { 0 })
            .collect();
        let mut retval = Self { samples };
        retval.pad();
        retval
    }
    /// Number of samples in one cycle
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    /// Always false; a waveform is padded to a minimum length
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    /// The sample at `index`, wrapping around the cycle
    #[inline]
    pub fn sample(&self, index: usize) -> u16 {
        self.samples[index % self.samples.len()]
    }
    /// All samples
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Self::sine(256)
    }
}

/// A fixed set of waveform slots shared by every oscillator
#[derive(Clone, Debug, Default)]
pub struct WaveStore {
    slots: [Waveform; WAVE_SLOTS],
    generation: u32,
}

impl WaveStore {
    /// Constructor, with every slot holding the default sine
    pub fn new() -> Self {
        Default::default()
    }
    /// Swap a whole waveform into a slot.  Out of range slots are clamped.
    pub fn replace(&mut self, slot: usize, wave: Waveform) {
        let slot = slot.min(WAVE_SLOTS - 1);
        log::debug!("waveform slot {} replaced ({} samples)", slot, wave.len());
        self.slots[slot] = wave;
        self.generation = self.generation.wrapping_add(1);
    }
    /// The waveform in a slot.  Out of range slots are clamped.
    pub fn get(&self, slot: usize) -> &Waveform {
        &self.slots[slot.min(WAVE_SLOTS - 1)]
    }
    /// Incremented every time a slot is replaced
    pub fn generation(&self) -> u32 {
        self.generation
    }
}
