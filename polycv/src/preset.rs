//! The preset: every sound and performance parameter the engine reads.
//!
//! A preset is plain data.  The engine never reads storage itself; the
//! foreground hands it whole presets (see [crate::engine::QueueInputs]).
//! Continuous parameters are raw 16 bit CVs, stepped parameters are small
//! enums.  Every struct is `#[serde(default)]` so a stored preset that is
//! missing fields still loads.

use serde::{Deserialize, Serialize};

use crate::arp::ArpSettings;
use crate::assigner::{Pattern, Priority, ALL_VOICES};
use crate::clock::ClockSettings;
use crate::devices::{EnvParams, LfoParams, LfoWave, WaveModTarget};
use crate::event::PressureTargets;
use crate::glide::GlideMode;
use crate::wave::WAVE_SLOTS;

/// The number of global LFOs
pub const GLOBAL_LFOS: usize = 2;

/// Oscillator A and B settings, shared by every voice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    /// Waveform slot for oscillator A
    pub wave_a: u8,
    /// Waveform slot for oscillator B
    pub wave_b: u8,
    /// Waveform slot blended in by [WaveModTarget::Crossover]
    pub crossover: u8,
    /// Oscillator B transposition, in semitones
    pub transpose_b: i8,
    /// Oscillator B fine tune, in pitch CV units (4096 per octave)
    pub detune_b: i16,
    /// What the WaveMod amount does
    pub wavemod_target: WaveModTarget,
    /// WaveMod amount before modulation
    pub wavemod: u16,
    /// Filter envelope to WaveMod depth
    pub wavemod_env: i16,
    /// Voice LFO to WaveMod depth
    pub wavemod_lfo: u16,
    /// Hard sync oscillator A to oscillator B
    pub sync: bool,
    /// Noise level CV
    pub noise: u16,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            wave_a: 0,
            wave_b: 0,
            crossover: 1,
            transpose_b: 0,
            detune_b: 0,
            wavemod_target: WaveModTarget::Width,
            wavemod: 0x8000,
            wavemod_env: 0,
            wavemod_lfo: 0,
            sync: false,
            noise: 0,
        }
    }
}

impl OscSettings {
    /// Waveform slots for A and B, clamped to the slots that exist
    pub fn slots(&self) -> [usize; 2] {
        [self.wave_a, self.wave_b].map(|s| (s as usize).min(WAVE_SLOTS - 1))
    }
    /// The crossover slot, clamped
    pub fn crossover_slot(&self) -> usize {
        (self.crossover as usize).min(WAVE_SLOTS - 1)
    }
}

/// Envelope settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// The amplitude envelope
    pub amp: EnvParams,
    /// The filter (and WaveMod) envelope
    pub filter: EnvParams,
}

/// LFO settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoSettings {
    /// The per-voice LFO
    pub voice: LfoParams,
    /// Restart the voice LFO on every fresh gate on
    pub key_reset: bool,
    /// Vibrato depth from the voice LFO before modulation
    pub vibrato: u16,
    /// The global LFOs
    pub global: [LfoParams; GLOBAL_LFOS],
    /// Lock each global LFO to the clock
    pub clock_sync: [bool; GLOBAL_LFOS],
    /// Beats per cycle for a clock synced global LFO
    pub beats: [u8; GLOBAL_LFOS],
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            voice: LfoParams::default(),
            key_reset: false,
            vibrato: 0,
            global: [
                LfoParams::default(),
                LfoParams {
                    wave: LfoWave::Sine,
                    speed: 0x4000,
                    ..Default::default()
                },
            ],
            clock_sync: [false; GLOBAL_LFOS],
            beats: [1, 4],
        }
    }
}

/// Filter settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Cutoff, in pitch CV units (4096 per octave)
    pub cutoff: u16,
    /// Resonance CV
    pub resonance: u16,
    /// Filter envelope depth, full scale is the whole CV range
    pub env_amount: i16,
    /// Keyboard tracking, full scale at 0xFFFF
    pub keytrack: u16,
    /// Velocity to cutoff depth
    pub velocity: u16,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            cutoff: 0x8000,
            resonance: 0,
            env_amount: 0x2000,
            keytrack: 0x8000,
            velocity: 0,
        }
    }
}

/// Amplifier settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmpSettings {
    /// Overall level
    pub level: u16,
    /// Velocity sensitivity; 0 ignores velocity
    pub velocity: u16,
}

impl Default for AmpSettings {
    fn default() -> Self {
        Self {
            level: u16::MAX,
            velocity: 0x4000,
        }
    }
}

/// How keys map onto voices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicingSettings {
    /// Note priority for stealing and mono
    pub priority: Priority,
    /// Unison/chord pattern and mono flag
    pub pattern: Pattern,
    /// Enabled voices
    pub voice_mask: u8,
    /// When to glide
    pub glide_mode: GlideMode,
    /// Glide time per octave, as a time CV
    pub glide_time: u16,
    /// Pitch bend range, in semitones
    pub bend_range: u8,
}

impl Default for VoicingSettings {
    fn default() -> Self {
        Self {
            priority: Priority::Last,
            pattern: Pattern::default(),
            voice_mask: ALL_VOICES,
            glide_mode: GlideMode::Off,
            glide_time: 0x6000,
            bend_range: 2,
        }
    }
}

/// Performance controller routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModSettings {
    /// Where pressure is routed
    pub pressure_targets: PressureTargets,
    /// Pressure depth
    pub pressure_depth: u16,
    /// Mod wheel to vibrato depth
    pub wheel_vibrato: u16,
    /// Global LFO 1 to pitch depth
    pub lfo_pitch: u16,
    /// Global LFO 2 to cutoff depth
    pub lfo_cutoff: i16,
    /// Global LFO 2 to amplitude (tremolo) depth
    pub lfo_amp: u16,
}

impl Default for ModSettings {
    fn default() -> Self {
        Self {
            pressure_targets: PressureTargets::CUTOFF,
            pressure_depth: 0x4000,
            wheel_vibrato: 0x8000,
            lfo_pitch: 0,
            lfo_cutoff: 0,
            lfo_amp: 0,
        }
    }
}

/// A complete snapshot of the engine's parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
    /// Oscillators
    pub osc: OscSettings,
    /// Envelopes
    pub env: EnvSettings,
    /// LFOs
    pub lfo: LfoSettings,
    /// Filter
    pub filter: FilterSettings,
    /// Amplifier
    pub amp: AmpSettings,
    /// Voice assignment and glide
    pub voicing: VoicingSettings,
    /// Controller routing
    pub modulation: ModSettings,
    /// Tempo clock
    pub clock: ClockSettings,
    /// Arpeggiator
    pub arp: ArpSettings,
}
