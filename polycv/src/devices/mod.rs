//! This module contains the per-voice and global modulation sources and the
//! audio-rate wavetable oscillator.

mod env;
mod lfo;
mod osc;

use crate::context::Context;
use serde::{Deserialize, Serialize};

pub use env::{time_increment, Env, EnvParams, EnvShape, EnvStage};
pub use lfo::{lfo_increment, speed_for_tempo, Lfo, LfoParams, LfoWave};
pub use osc::{OscOutput, SyncRole, WaveModTarget, WaveOsc};
