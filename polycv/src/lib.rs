//! This crate is the real-time core of a hybrid polyphonic synthesizer: it
//! turns note and controller events into per-voice control voltages and
//! oscillator samples for the DACs.
//!
//! It is `no_std` and never allocates.  Every collection has a fixed capacity
//! and every real-time path runs in bounded time.  Arithmetic is fixed point
//! throughout; phase accumulators rely on explicit wrapping arithmetic.
//!
//! The pieces, leaves first:
//!  - [wave]: the waveform slots the oscillators read from,
//!  - [devices]: the wavetable oscillator, ADSR envelope and LFO,
//!  - [assigner]: maps notes onto the voice pool,
//!  - [glide], [clock], [arp] and [debounce]: performance helpers run from the
//!    housekeeping tick,
//!  - [tuner]: offline calibration of the analog CV path,
//!  - [dma]: the tagged DAC command stream,
//!  - [engine]: the scheduler tying it all together.
//!
//! Most users only need [engine::Engine] and [preset::Preset].

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

mod fixedmath;

pub mod arp;
pub mod assigner;
pub mod clock;
pub mod context;
pub mod debounce;
pub mod devices;
pub mod dma;
pub mod engine;
pub mod event;
pub mod glide;
pub mod preset;
pub mod tuner;
pub mod wave;

pub use fixedmath::midi_note_to_frequency;
pub use fixedmath::note_to_pitch;
pub use fixedmath::pitch_to_frequency;
pub use fixedmath::Frequency as FrequencyFxP;
pub use fixedmath::Note as NoteFxP;
pub use fixedmath::Scalar as ScalarFxP;
/// A signed value in the range `[-1, 1)`, used for bipolar modulation depths
pub type IScalarFxP = fixedmath::IScalar;
pub use fixedmath::PITCH_PER_OCTAVE;

pub use context::Context;
pub use engine::{Engine, EngineInputs, QueueInputs, Readout};
pub use event::{EngineEvent, SourceFlags};
pub use preset::Preset;
