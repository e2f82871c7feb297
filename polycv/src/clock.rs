//! The tempo clock: 24 pulses per quarter note, from an internal tempo or
//! from debounced external clock pulses.

use serde::{Deserialize, Serialize};

use crate::context::TICK_HZ;

/// Clock pulses per quarter note
pub const PPQN: u32 = 24;
/// Slowest internal tempo
pub const BPM_MIN: u16 = 20;
/// Fastest internal tempo
pub const BPM_MAX: u16 = 300;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// Where clock pulses come from
pub enum ClockSource {
    /// The internal tempo
    #[default]
    Internal,
    /// The clock input jack
    External,
}

impl TryFrom<u8> for ClockSource {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::External),
            _ => Err("Conversion of u8 to ClockSource Overflowed"),
        }
    }
}

/// Clock configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Pulse source
    pub source: ClockSource,
    /// Internal tempo, clamped to [BPM_MIN]..=[BPM_MAX]
    pub bpm: u16,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            source: ClockSource::Internal,
            bpm: 120,
        }
    }
}

/// What happened during one tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockTick {
    /// Pulses that elapsed
    pub pulses: u8,
    /// A quarter note boundary was crossed
    pub beat: bool,
}

/// The tempo clock, advanced once per tick
#[derive(Clone, Debug, Default)]
pub struct Clock {
    /// Internal phase, in units of `1 / (60 * TICK_HZ)` pulses
    phase: u32,
    pulse_count: u32,
    pending_external: u8,
    ticks_since_pulse: u32,
    /// Smoothed ticks per external pulse, 8 fractional bits
    external_interval: u32,
    source: ClockSource,
}

impl Clock {
    /// Constructor
    pub fn new() -> Self {
        Default::default()
    }
    /// Record a rising edge on the clock input
    pub fn external_pulse(&mut self) {
        self.pending_external = self.pending_external.saturating_add(1);
        let interval = self.ticks_since_pulse << 8;
        self.external_interval = if self.external_interval == 0 {
            interval
        } else {
            // one pole smoothing, 1/4 new
            (self.external_interval * 3 + interval) / 4
        };
        self.ticks_since_pulse = 0;
    }
    /// Restart the pulse count so the next pulse starts a beat
    pub fn reset(&mut self) {
        self.phase = 0;
        self.pulse_count = 0;
    }
    /// Total pulses since the last reset
    pub fn pulse_count(&self) -> u32 {
        self.pulse_count
    }
    /// The current tempo: the internal setting, or an estimate from the
    /// external pulse spacing (0 if no pulses have been seen)
    pub fn tempo(&self, settings: &ClockSettings) -> u16 {
        match self.source {
            ClockSource::Internal => settings.bpm.clamp(BPM_MIN, BPM_MAX),
            ClockSource::External if self.external_interval == 0 => 0,
            ClockSource::External => {
                let bpm = (60 * TICK_HZ << 8) / (PPQN * self.external_interval.max(1));
                bpm.min(u16::MAX as u32) as u16
            }
        }
    }
    /// Advance by one tick
    pub fn tick(&mut self, settings: &ClockSettings) -> ClockTick {
        if settings.source != self.source {
            self.source = settings.source;
            self.phase = 0;
            if self.source == ClockSource::Internal {
                self.pending_external = 0;
            }
        }
        self.ticks_since_pulse = self.ticks_since_pulse.saturating_add(1);
        let pulses = match self.source {
            ClockSource::Internal => {
                let bpm = settings.bpm.clamp(BPM_MIN, BPM_MAX) as u32;
                self.phase += bpm * PPQN;
                let whole = self.phase / (60 * TICK_HZ);
                self.phase %= 60 * TICK_HZ;
                whole as u8
            }
            ClockSource::External => core::mem::take(&mut self.pending_external),
        };
        let mut beat = false;
        for _ in 0..pulses {
            if self.pulse_count % PPQN == 0 {
                beat = true;
            }
            self.pulse_count = self.pulse_count.wrapping_add(1);
        }
        ClockTick { pulses, beat }
    }
}
