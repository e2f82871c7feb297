//! This module provides objects to reason about the processing context: the
//! output sample rate and the nested control rates the engine runs at.
//!
//! The engine runs at three nested rates:
//!  - the tick rate ([TICK_HZ]), split into [TICK_PHASES] phases,
//!  - the CV update rate ([CV_HZ]), one update per tick phase,
//!  - the output sample rate, driven by DMA half-transfer interrupts.

/// Housekeeping tick rate, in Hz
pub const TICK_HZ: u32 = 500;
/// Number of phases each tick is split into.  One phase runs per timer
/// interrupt, so the timer fires at `TICK_HZ * TICK_PHASES`.
pub const TICK_PHASES: u32 = 8;
/// Envelope/LFO/CV update rate, in Hz
pub const CV_HZ: u32 = TICK_HZ * TICK_PHASES;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
/// An enum representing all of the supported output sample rates
pub enum FixedSampleRate {
    /// 44.1kHz sample rate
    Khz44_1,
    /// 48kHz sample rate
    #[default]
    Khz48_0,
    /// 96kHz sample rate
    Khz96_0,
}

impl FixedSampleRate {
    /// Converts this sample rate to a u32
    pub const fn value(&self) -> u32 {
        match self {
            Self::Khz44_1 => 44100,
            Self::Khz48_0 => 48000,
            Self::Khz96_0 => 96000,
        }
    }
}

impl TryFrom<u32> for FixedSampleRate {
    type Error = &'static str;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            44100 => Ok(Self::Khz44_1),
            48000 => Ok(Self::Khz48_0),
            96000 => Ok(Self::Khz96_0),
            _ => Err("Unsupported Sample Rate"),
        }
    }
}

#[derive(Default, Clone, Copy, Debug)]
/// The processing context handed to every device that needs to know its
/// update rate.
pub struct Context {
    /// The output (DMA) sample rate
    pub sample_rate: FixedSampleRate,
}

impl Context {
    /// Create a new context with a sample rate of 44.1kHz
    pub const fn new_441() -> Self {
        Self {
            sample_rate: FixedSampleRate::Khz44_1,
        }
    }
    /// Create a new context with a sample rate of 48kHz
    pub const fn new_480() -> Self {
        Self {
            sample_rate: FixedSampleRate::Khz48_0,
        }
    }
    /// Create a new context with a sample rate of 96kHz
    pub const fn new_960() -> Self {
        Self {
            sample_rate: FixedSampleRate::Khz96_0,
        }
    }
    /// Create a context if the sample rate provided is a supported sample
    /// rate, or return `None` otherwise.
    pub fn maybe_create(value: u32) -> Option<Self> {
        FixedSampleRate::try_from(value)
            .ok()
            .map(|sample_rate| Self { sample_rate })
    }
    /// The output sample rate, in Hz
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate.value()
    }
    /// The CV update rate, in Hz
    pub const fn cv_rate(&self) -> u32 {
        CV_HZ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn sample_rate_conversion() {
        assert_eq!(Context::maybe_create(48000).map(|c| c.sample_rate()), Some(48000));
        assert!(Context::maybe_create(22050).is_none());
        assert_eq!(FixedSampleRate::try_from(44100), Ok(FixedSampleRate::Khz44_1));
        assert_eq!(CV_HZ, 4000);
    }
}
