use super::*;
use crate::fixedmath::{const_pow2, exp_shape, interp_u32, linear_shape, saturate_u16};

/// Bit set in the phase accumulator when a stage has run to completion
const PHASE_CARRY: u32 = 1 << 24;
const PHASE_MASK: u32 = PHASE_CARRY - 1;
/// Output at the top of the attack stage
const LEVEL_MAX: i32 = u16::MAX as i32;
/// Increment used to clear a stolen voice: 8 updates (2ms at 4kHz)
const FAST_RELEASE_INCREMENT: u32 = PHASE_CARRY >> 3;

/// Phase increment per CV update for a stage time CV.
///
/// Time CV 0 is 1ms and every 256/15ths of the range doubles it, topping out
/// at about 32.8s (0xFFFF).  Entries are `2^24 / (seconds * CV_HZ)`.
const TIME_TABLE: [u32; 257] = {
    let mut table = [0u32; 257];
    // 2^24 / (0.001 * CV_HZ) = 2^22 at 4kHz
    let fastest = (PHASE_CARRY as f64) / (0.001f64 * crate::context::CV_HZ as f64);
    let mut i = 0;
    while i <= 256 {
        let octaves = 15f64 * (i as f64) / 256f64;
        table[i] = (fastest / const_pow2(octaves) + 0.5f64) as u32;
        i += 1;
    }
    table
};

/// Look up the 24 bit phase increment for a time CV, slowed down by `shift`
/// octaves.  Never returns zero, so every stage eventually completes.
pub fn time_increment(time: u16, shift: u8) -> u32 {
    (interp_u32(&TIME_TABLE, time) >> shift.min(16)).max(1)
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
/// The state of an [Env]
pub enum EnvStage {
    /// Idle; the owning voice is unassigned
    #[default]
    Wait,
    /// Rising towards full scale
    Attack,
    /// Falling from full scale towards the sustain level
    Decay,
    /// Holding at the sustain level while the gate is high
    Sustain,
    /// Falling to zero after the gate dropped
    Release,
    /// Release finished; waiting for the owner to reclaim the voice
    Done,
}

impl EnvStage {
    /// A short display name for the stage
    pub const fn to_str(&self) -> &'static str {
        ["Wait", "Attack", "Decay", "Sustain", "Release", "Done"][*self as usize]
    }
    /// True for every stage that produces (or is about to produce) output
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Wait | Self::Done)
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// The curve each envelope segment follows
pub enum EnvShape {
    /// Concave RC-style charge curve from an interpolated lookup table
    #[default]
    Exponential,
    /// Straight ramps
    Linear,
}

impl EnvShape {
    fn lookup(&self, phase: u32) -> u16 {
        match self {
            Self::Exponential => exp_shape(phase),
            Self::Linear => linear_shape(phase),
        }
    }
}

impl TryFrom<u8> for EnvShape {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        match value {
            0 => Ok(Self::Exponential),
            1 => Ok(Self::Linear),
            _ => Err("Conversion of u8 to EnvShape Overflowed"),
        }
    }
}

/// Parameters for an [Env].  Stage times are time CVs (see [time_increment]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvParams {
    /// Attack time CV
    pub attack: u16,
    /// Decay time CV
    pub decay: u16,
    /// Sustain level, full scale at 0xFFFF
    pub sustain: u16,
    /// Release time CV
    pub release: u16,
    /// Segment curve
    pub shape: EnvShape,
    /// Jump from the end of decay back into attack instead of sustaining
    pub looping: bool,
    /// Slow every stage down by this many octaves
    pub speed_shift: u8,
}

impl Default for EnvParams {
    fn default() -> Self {
        Self {
            attack: 0x1000,
            decay: 0x6000,
            sustain: 0xC000,
            release: 0x6000,
            shape: EnvShape::Exponential,
            looping: false,
            speed_shift: 0,
        }
    }
}

/// A gate-driven ADSR envelope generator.
///
/// Each stage runs a 24 bit phase accumulator from 0 to overflow and maps it
/// through the shape curve: `output = shape(phase) * mul + add`.  `add` and
/// `mul` are recomputed whenever a stage is entered so that the curve starts
/// at whatever the output currently is, which means gate changes never cause
/// a step in the output.
#[derive(Clone, Default, Debug)]
pub struct Env {
    stage: EnvStage,
    phase: u32,
    add: i32,
    mul: i32,
    output: u16,
    fast: bool,
}

impl Env {
    /// Constructor
    pub const fn new() -> Self {
        Self {
            stage: EnvStage::Wait,
            phase: 0,
            add: 0,
            mul: 0,
            output: 0,
            fast: false,
        }
    }
    /// The current stage
    pub fn stage(&self) -> EnvStage {
        self.stage
    }
    /// The most recent output
    pub fn output(&self) -> u16 {
        self.output
    }
    fn enter(&mut self, stage: EnvStage, target: i32) {
        self.stage = stage;
        self.phase = 0;
        self.fast = false;
        self.add = self.output as i32;
        self.mul = target - self.add;
    }
    /// Gate on forces Attack and gate off forces Release, from any active
    /// stage, continuing from the current output.
    pub fn set_gate(&mut self, gate: bool) {
        if gate {
            self.enter(EnvStage::Attack, LEVEL_MAX);
        } else if self.stage != EnvStage::Wait && self.stage != EnvStage::Done {
            self.enter(EnvStage::Release, 0);
        }
    }
    /// Release as quickly as possible, used when the voice has been stolen
    pub fn fast_release(&mut self) {
        if self.stage.is_active() {
            self.enter(EnvStage::Release, 0);
            self.fast = true;
        }
    }
    /// Drop straight back to Wait with zero output, bypassing release
    pub fn reset(&mut self) {
        *self = Self::new();
    }
    /// If the envelope has finished, move it to Wait and return true.
    pub fn acknowledge_done(&mut self) -> bool {
        if self.stage == EnvStage::Done {
            self.stage = EnvStage::Wait;
            self.output = 0;
            true
        } else {
            false
        }
    }
    fn stage_increment(&self, params: &EnvParams) -> u32 {
        let time = match self.stage {
            EnvStage::Attack => params.attack,
            EnvStage::Decay => params.decay,
            EnvStage::Release if self.fast => return FAST_RELEASE_INCREMENT,
            EnvStage::Release => params.release,
            _ => return 0,
        };
        time_increment(time, params.speed_shift)
    }
    fn complete_stage(&mut self, params: &EnvParams) {
        match self.stage {
            EnvStage::Attack => {
                self.output = u16::MAX;
                self.enter(EnvStage::Decay, params.sustain as i32);
            }
            EnvStage::Decay => {
                self.output = params.sustain;
                if params.looping {
                    self.enter(EnvStage::Attack, LEVEL_MAX);
                } else {
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Release => {
                self.output = 0;
                self.stage = EnvStage::Done;
            }
            _ => {}
        }
    }
    /// Advance by one CV update and return the new output
    pub fn update(&mut self, params: &EnvParams) -> u16 {
        match self.stage {
            EnvStage::Wait | EnvStage::Done => {
                self.output = 0;
            }
            EnvStage::Sustain => {
                if params.looping {
                    self.enter(EnvStage::Attack, LEVEL_MAX);
                } else {
                    self.output = params.sustain;
                }
            }
            EnvStage::Attack | EnvStage::Decay | EnvStage::Release => {
                if self.stage == EnvStage::Decay {
                    // follow a modulated sustain level
                    self.mul = params.sustain as i32 - self.add;
                }
                let increment = self.stage_increment(params);
                // phase < 2^24 and increment <= 2^22, so this cannot wrap u32
                self.phase = self.phase.wrapping_add(increment);
                if self.phase & PHASE_CARRY != 0 {
                    self.complete_stage(params);
                } else {
                    let shaped = params.shape.lookup(self.phase & PHASE_MASK) as i64;
                    let delta = ((shaped * self.mul as i64) >> 16) as i32;
                    self.output = saturate_u16(self.add + delta);
                }
            }
        }
        self.output
    }
}
