//! The engine: owns every voice, envelope, LFO and oscillator and runs them
//! at the three nested rates.
//!
//! - [Engine::tick_phase] is called from the timer interrupt at
//!   [CV_HZ](crate::context::CV_HZ).  Each call runs one of the
//!   [TICK_PHASES](crate::context::TICK_PHASES) phases of the housekeeping
//!   tick and then a full CV update.
//! - [Engine::fill] is called from the DMA half-transfer interrupt with the
//!   half of the [DmaPipeline](crate::dma::DmaPipeline) that was just drained.
//!
//! Control input reaches the engine through [EngineInputs], normally a pair
//! of SPSC queues ([QueueInputs]) filled by the foreground.  The engine is the
//! only writer of voice state; the foreground reads it back through
//! [Engine::readout].

use heapless::spsc::{Consumer, Queue};

use crate::arp::Arpeggiator;
use crate::assigner::{VoiceAssigner, MAX_VOICES};
use crate::clock::Clock;
use crate::context::Context;
use crate::debounce::{Debouncer, DigitalInputs};
use crate::devices::{Env, Lfo, LfoParams, SyncRole, WaveOsc};
use crate::dma::{CvMux, DacChannel, DacWord, Frame, GlobalCv, VoiceCv, OSCS_PER_VOICE};
use crate::event::{AssignFlags, AssignerEvent, AssignerSink, EngineEvent, PressureTargets, SourceFlags};
use crate::fixedmath::{note_to_pitch, saturate_u16, scale_u16, Scalar, PITCH_PER_OCTAVE};
use crate::glide::{Glide, GlideMode};
use crate::preset::{FilterSettings, Preset, GLOBAL_LFOS};
use crate::tuner::TuneTable;
use crate::wave::{WaveStore, Waveform};

mod voice;
pub use voice::{Voice, VoiceBank, VoiceCvs};
use voice::GlobalMod;

/// Capacity of the control event queue (holds one less than this)
pub const EVENT_QUEUE_LEN: usize = 64;
/// Capacity of the preset queue: two presets in flight
pub const PRESET_QUEUE_LEN: usize = 3;
/// Most events handled in one tick
pub const MAX_EVENTS_PER_TICK: usize = 32;

/// The control event queue
pub type EventQueue = Queue<EngineEvent, EVENT_QUEUE_LEN>;
/// The preset queue
pub type PresetQueue = Queue<Preset, PRESET_QUEUE_LEN>;

/// Where the engine gets its control input from
pub trait EngineInputs {
    /// The next queued control event
    fn next_event(&mut self) -> Option<EngineEvent>;
    /// The next queued preset
    fn next_preset(&mut self) -> Option<Preset>;
    /// Sample the raw digital input port
    fn digital_inputs(&mut self) -> u8;
}

/// The consumer ends of the event and preset queues, plus the digital input
/// port as last read by the caller
pub struct QueueInputs<'q> {
    events: Consumer<'q, EngineEvent, EVENT_QUEUE_LEN>,
    presets: Consumer<'q, Preset, PRESET_QUEUE_LEN>,
    /// Raw state of the digital input port
    pub digital: u8,
}

impl<'q> QueueInputs<'q> {
    /// Constructor
    pub fn new(
        events: Consumer<'q, EngineEvent, EVENT_QUEUE_LEN>,
        presets: Consumer<'q, Preset, PRESET_QUEUE_LEN>,
    ) -> Self {
        Self {
            events,
            presets,
            digital: 0,
        }
    }
}

impl EngineInputs for QueueInputs<'_> {
    fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.dequeue()
    }
    fn next_preset(&mut self) -> Option<Preset> {
        self.presets.dequeue()
    }
    fn digital_inputs(&mut self) -> u8 {
        self.digital
    }
}

/// A copy of the engine state the foreground displays
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readout {
    /// Amp envelope level of each voice, for metering
    pub visual_env: [u16; MAX_VOICES],
    /// The CVs of each voice
    pub cvs: [VoiceCvs; MAX_VOICES],
    /// Bit `n` set if voice `n` is assigned
    pub assigned_mask: u8,
    /// Bit `n` set if voice `n` is gated
    pub gated_mask: u8,
    /// Ticks since startup
    pub tick: u32,
}

/// The live performance controllers
#[derive(Clone, Copy, Debug, Default)]
struct Controllers {
    bend: i16,
    pressure: u16,
    pressure_targets: PressureTargets,
    mod_wheel: u16,
}

/// The engine
pub struct Engine {
    context: Context,
    preset: Preset,
    assigner: VoiceAssigner,
    voices: VoiceBank,
    global_lfos: [Lfo; GLOBAL_LFOS],
    global_lfo_params: [LfoParams; GLOBAL_LFOS],
    voice_lfo_params: LfoParams,
    clock: Clock,
    beats: u32,
    arp: Arpeggiator,
    debouncer: Debouncer,
    waves: WaveStore,
    tune: TuneTable,
    mux: CvMux,
    controllers: Controllers,
    sync_mask: u8,
    phase: u8,
    tick: u32,
}

impl Engine {
    /// An engine with the default preset
    pub fn new(context: Context) -> Self {
        Self::with_preset(context, Preset::default())
    }
    /// An engine with a starting preset
    pub fn with_preset(context: Context, preset: Preset) -> Self {
        let mut voices = VoiceBank::new();
        voices.configure(&preset);
        let mut assigner = VoiceAssigner::new();
        assigner.set_priority(preset.voicing.priority);
        assigner.set_pattern(preset.voicing.pattern, &mut voices);
        assigner.set_voice_mask(preset.voicing.voice_mask, &mut voices);
        Self {
            context,
            preset,
            assigner,
            voices,
            global_lfos: [Lfo::new(0x0123_4567), Lfo::new(0x89ab_cdef)],
            global_lfo_params: preset.lfo.global,
            voice_lfo_params: preset.lfo.voice,
            clock: Clock::new(),
            beats: 0,
            arp: Arpeggiator::default(),
            debouncer: Debouncer::new(),
            waves: WaveStore::new(),
            tune: TuneTable::nominal(),
            mux: CvMux::new(),
            controllers: Controllers::default(),
            sync_mask: 0,
            phase: 0,
            tick: 0,
        }
    }
    /// The processing context
    pub fn context(&self) -> &Context {
        &self.context
    }
    /// The preset in use
    pub fn preset(&self) -> &Preset {
        &self.preset
    }
    /// The voice assigner
    pub fn assigner(&self) -> &VoiceAssigner {
        &self.assigner
    }
    /// The voices
    pub fn voices(&self) -> &VoiceBank {
        &self.voices
    }
    /// The arpeggiator
    pub fn arp(&self) -> &Arpeggiator {
        &self.arp
    }
    /// The tempo clock
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
    /// The current tempo estimate
    pub fn tempo(&self) -> u16 {
        self.clock.tempo(&self.preset.clock)
    }
    /// Ticks since startup
    pub fn tick_count(&self) -> u32 {
        self.tick
    }
    /// The tick phase that runs next
    pub fn phase(&self) -> u8 {
        self.phase
    }
    /// Voices with hard sync latched
    pub fn sync_mask(&self) -> u8 {
        self.sync_mask
    }
    /// The waveform slots
    pub fn waves(&self) -> &WaveStore {
        &self.waves
    }
    /// Replace a waveform slot
    pub fn replace_wave(&mut self, slot: usize, wave: Waveform) {
        self.waves.replace(slot, wave);
    }
    /// The tuning table
    pub fn tune_table(&self) -> &TuneTable {
        &self.tune
    }
    /// Install a new tuning table
    pub fn set_tune_table(&mut self, table: TuneTable) {
        self.tune = table;
    }
    /// Copy out the displayed state
    pub fn readout(&self) -> Readout {
        let mut readout = Readout {
            assigned_mask: self.assigner.assigned_mask(),
            gated_mask: self.assigner.gated_mask(),
            tick: self.tick,
            ..Default::default()
        };
        for (i, v) in self.voices.voices().iter().enumerate() {
            readout.visual_env[i] = v.amp_env().output();
            readout.cvs[i] = *v.cvs();
        }
        readout
    }

    /// Switch to a new preset.  Voicing changes release the keys they
    /// affect; everything else takes effect at the next CV update.
    pub fn apply_preset(&mut self, preset: Preset) {
        let old = self.preset;
        self.voices.configure(&preset);
        self.assigner.set_priority(preset.voicing.priority);
        if preset.voicing.pattern != old.voicing.pattern {
            self.assigner.set_pattern(preset.voicing.pattern, &mut self.voices);
        }
        if preset.voicing.voice_mask != old.voicing.voice_mask {
            self.assigner
                .set_voice_mask(preset.voicing.voice_mask, &mut self.voices);
        }
        if old.arp.enabled && !preset.arp.enabled {
            if let Some(off) = self.arp.clear() {
                self.assign(off.note, false, 0, SourceFlags::ARP);
            }
        } else if !old.arp.enabled && preset.arp.enabled {
            self.assigner.all_keys_off(&mut self.voices);
            self.arp.restart();
        }
        self.preset = preset;
        log::debug!("preset applied");
    }

    fn assign(&mut self, note: u8, gate: bool, velocity: u16, source: SourceFlags) {
        self.assigner
            .assign_note(note, gate, velocity, source, &mut self.voices);
    }
    fn set_hold(&mut self, hold: bool) {
        self.assigner.hold_event(hold, &mut self.voices);
        if !hold {
            self.arp.release_hold();
        }
    }

    /// Handle one control event immediately
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Note {
                note,
                gate,
                velocity,
                flags,
            } => {
                if self.preset.arp.enabled && !flags.contains(SourceFlags::ARP) {
                    self.arp.note_event(note, gate, velocity, self.assigner.hold());
                } else {
                    self.assign(note, gate, velocity, flags);
                }
            }
            EngineEvent::Bend(bend) => self.controllers.bend = bend,
            EngineEvent::Pressure { value, targets } => {
                self.controllers.pressure = value;
                self.controllers.pressure_targets = targets;
            }
            EngineEvent::ModWheel(value) => self.controllers.mod_wheel = value,
            EngineEvent::Hold(hold) => self.set_hold(hold),
            EngineEvent::AllKeysOff => {
                if let Some(off) = self.arp.clear() {
                    self.assign(off.note, false, 0, SourceFlags::ARP);
                }
                self.assigner.all_keys_off(&mut self.voices);
            }
            EngineEvent::Panic => {
                self.arp.clear();
                self.assigner.panic_off(&mut self.voices);
                log::debug!("panic");
            }
        }
    }

    /// Run the next tick phase and a CV update
    pub fn tick_phase(&mut self, inputs: &mut impl EngineInputs) {
        match self.phase {
            0 => self.pump(inputs),
            1 => self.debounce(inputs.digital_inputs()),
            2 => self.housekeeping(),
            3 => self.advance_clock(),
            4 => self.voices.step_glides(self.preset.voicing.glide_time),
            5 => self.refresh_lfo_params(),
            6 => self.latch_sync(),
            _ => {
                self.tick = self.tick.wrapping_add(1);
                self.assigner.tick();
            }
        }
        self.phase = (self.phase + 1) % crate::context::TICK_PHASES as u8;
        self.update_cvs();
    }
    /// Run a whole tick: every phase once
    pub fn tick(&mut self, inputs: &mut impl EngineInputs) {
        for _ in 0..crate::context::TICK_PHASES {
            self.tick_phase(inputs);
        }
    }

    fn pump(&mut self, inputs: &mut impl EngineInputs) {
        let mut latest = None;
        while let Some(preset) = inputs.next_preset() {
            latest = Some(preset);
        }
        if let Some(preset) = latest {
            self.apply_preset(preset);
        }
        for _ in 0..MAX_EVENTS_PER_TICK {
            match inputs.next_event() {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }
    fn debounce(&mut self, raw: u8) {
        let edges = self.debouncer.update(raw);
        if edges.rising.contains(DigitalInputs::HOLD_PEDAL) {
            self.set_hold(true);
        }
        if edges.falling.contains(DigitalInputs::HOLD_PEDAL) {
            self.set_hold(false);
        }
        if edges.rising.contains(DigitalInputs::CLOCK_IN) {
            self.clock.external_pulse();
        }
    }
    fn housekeeping(&mut self) {
        let done = self.voices.collect_done();
        for voice in 0..MAX_VOICES {
            if done & (1 << voice) != 0 {
                self.assigner.voice_done(voice);
            }
        }
    }
    fn advance_clock(&mut self) {
        let tick = self.clock.tick(&self.preset.clock);
        if tick.beat {
            for (i, lfo) in self.global_lfos.iter_mut().enumerate() {
                let beats = self.preset.lfo.beats[i].max(1) as u32;
                if self.preset.lfo.clock_sync[i] && self.beats % beats == 0 {
                    lfo.reset_phase();
                }
            }
            self.beats = self.beats.wrapping_add(1);
        }
        if self.preset.arp.enabled && tick.pulses > 0 {
            let velocity = self.arp.velocity();
            for step in self.arp.advance(tick.pulses, &self.preset.arp) {
                self.assign(step.note, step.gate, velocity, SourceFlags::ARP);
            }
        }
    }
    fn refresh_lfo_params(&mut self) {
        let tempo = self.tempo();
        let settings = &self.preset.lfo;
        for (i, params) in self.global_lfo_params.iter_mut().enumerate() {
            *params = settings.global[i];
            if settings.clock_sync[i] && tempo > 0 {
                params.speed = crate::devices::speed_for_tempo(tempo, settings.beats[i]);
                params.shift = 0;
            }
        }
        self.voice_lfo_params = settings.voice;
    }
    fn latch_sync(&mut self) {
        self.sync_mask = if self.preset.osc.sync {
            self.assigner.assigned_mask() & self.assigner.voice_mask()
        } else {
            0
        };
        self.voices.latch_sync(self.sync_mask);
    }

    fn global_mod(&mut self) -> GlobalMod {
        let preset = &self.preset;
        let lfo1 = self.global_lfos[0].update(&self.global_lfo_params[0]) as i32;
        self.global_lfos[1].update(&self.global_lfo_params[1]);
        let lfo2 = self.global_lfos[1].output() as i32;
        let c = &self.controllers;

        let bend = c.bend as i32 * preset.voicing.bend_range as i32 * PITCH_PER_OCTAVE as i32
            / (12 * 0x8000);
        let pressure = scale_u16(c.pressure, Scalar::from_bits(preset.modulation.pressure_depth));
        let targets = c.pressure_targets | preset.modulation.pressure_targets;
        let routed = |target| {
            if targets.contains(target) {
                pressure
            } else {
                0
            }
        };
        let vibrato = preset
            .lfo
            .vibrato
            .saturating_add(scale_u16(c.mod_wheel, Scalar::from_bits(preset.modulation.wheel_vibrato)))
            .saturating_add(routed(PressureTargets::VIBRATO));
        let tremolo = !scale_u16(
            self.global_lfos[1].output_unipolar(),
            Scalar::from_bits(preset.modulation.lfo_amp),
        );
        GlobalMod {
            pitch: bend + ((lfo1 * preset.modulation.lfo_pitch as i32) >> 21),
            cutoff: ((lfo2 * preset.modulation.lfo_cutoff as i32) >> 15)
                + routed(PressureTargets::CUTOFF) as i32,
            wavemod: routed(PressureTargets::WAVEMOD) as i32,
            amp: routed(PressureTargets::AMP),
            vibrato,
            tremolo,
        }
    }

    fn update_cvs(&mut self) {
        let global = self.global_mod();
        self.voices.update(
            &self.context,
            &self.waves,
            &self.preset,
            &self.voice_lfo_params,
            &global,
            &self.tune,
        );
        for (i, v) in self.voices.voices().iter().enumerate() {
            for cv in VoiceCv::cvs() {
                self.mux.write(
                    DacChannel::Voice {
                        voice: i as u8,
                        cv: *cv,
                    },
                    v.cvs().get(*cv),
                );
            }
        }
        let globals = [
            self.global_lfos[0].output_unipolar(),
            self.global_lfos[1].output_unipolar(),
            self.controllers.mod_wheel,
        ];
        for (cv, value) in GlobalCv::cvs().iter().zip(globals) {
            self.mux.write(DacChannel::Global(*cv), value);
        }
    }

    /// Refill a drained DMA half: one frame per output sample
    pub fn fill(&mut self, frames: &mut [Frame]) {
        for frame in frames.iter_mut() {
            self.voices.fill_frame(&self.waves, frame);
            self.mux.fill(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::EnvStage;

    struct NoInputs;

    impl EngineInputs for NoInputs {
        fn next_event(&mut self) -> Option<EngineEvent> {
            None
        }
        fn next_preset(&mut self) -> Option<Preset> {
            None
        }
        fn digital_inputs(&mut self) -> u8 {
            0
        }
    }

    fn note(note: u8, gate: bool) -> EngineEvent {
        EngineEvent::Note {
            note,
            gate,
            velocity: 0xFFFF,
            flags: SourceFlags::KEYBOARD,
        }
    }

    #[test]
    fn phases_cycle() {
        let mut engine = Engine::new(Context::new_480());
        for i in 0..16u32 {
            assert_eq!(engine.phase() as u32, i % 8);
            engine.tick_phase(&mut NoInputs);
        }
        assert_eq!(engine.tick_count(), 2);
    }
    #[test]
    fn finished_voices_are_freed() {
        let mut engine = Engine::new(Context::new_480());
        engine.handle_event(note(60, true));
        assert_eq!(engine.assigner().assigned_mask(), 1);
        for _ in 0..20 {
            engine.tick(&mut NoInputs);
        }
        engine.handle_event(note(60, false));
        assert_eq!(engine.assigner().gated_mask(), 0);
        assert_eq!(engine.assigner().assigned_mask(), 1);
        // default release is about 50ms
        for _ in 0..100 {
            engine.tick(&mut NoInputs);
        }
        assert_eq!(engine.assigner().assigned_mask(), 0);
        assert_eq!(engine.voices().voice(0).amp_env().stage(), EnvStage::Wait);
    }
    #[test]
    fn bend_moves_pitch() {
        let mut engine = Engine::new(Context::new_480());
        engine.handle_event(note(60, true));
        engine.tick(&mut NoInputs);
        let before = engine.readout().cvs[0].pitch_a;
        assert_eq!(before, note_to_pitch(60));
        engine.handle_event(EngineEvent::Bend(i16::MAX));
        engine.tick(&mut NoInputs);
        let after = engine.readout().cvs[0].pitch_a;
        // two semitones, less one part in 32768
        assert!((after as i32 - note_to_pitch(62) as i32).abs() <= 1);
    }
    #[test]
    fn pressure_is_routed() {
        let mut engine = Engine::new(Context::new_480());
        engine.handle_event(note(60, true));
        engine.tick(&mut NoInputs);
        let before = engine.readout().cvs[0].wavemod;
        engine.handle_event(EngineEvent::Pressure {
            value: 0xFFFF,
            targets: PressureTargets::WAVEMOD,
        });
        engine.tick(&mut NoInputs);
        assert!(engine.readout().cvs[0].wavemod > before);
    }
    #[test]
    fn pressure_follows_preset_routing() {
        let mut preset = Preset::default();
        preset.modulation.pressure_targets = PressureTargets::AMP;
        preset.modulation.pressure_depth = 0xFFFF;
        preset.amp.level = 0x8000;
        let mut plain = Engine::with_preset(Context::new_480(), preset);
        let mut pressed = Engine::with_preset(Context::new_480(), preset);
        for engine in [&mut plain, &mut pressed] {
            engine.handle_event(note(60, true));
            for _ in 0..200 {
                engine.tick(&mut NoInputs);
            }
        }
        pressed.handle_event(EngineEvent::Pressure {
            value: 0xFFFF,
            targets: PressureTargets::empty(),
        });
        plain.tick(&mut NoInputs);
        pressed.tick(&mut NoInputs);
        let without = plain.readout().cvs[0];
        let with = pressed.readout().cvs[0];
        assert!(with.amp > without.amp, "{} {}", without.amp, with.amp);
        assert_eq!(with.cutoff, without.cutoff);
        assert_eq!(with.wavemod, without.wavemod);
    }
    #[test]
    fn debounced_hold_pedal() {
        struct Pedal(u8);
        impl EngineInputs for Pedal {
            fn next_event(&mut self) -> Option<EngineEvent> {
                None
            }
            fn next_preset(&mut self) -> Option<Preset> {
                None
            }
            fn digital_inputs(&mut self) -> u8 {
                self.0
            }
        }
        let mut engine = Engine::new(Context::new_480());
        let mut pedal = Pedal(DigitalInputs::HOLD_PEDAL.bits());
        for _ in 0..4 {
            engine.tick(&mut pedal);
        }
        assert!(engine.assigner().hold());
        engine.handle_event(note(60, true));
        engine.handle_event(note(60, false));
        assert_eq!(engine.assigner().gated_mask(), 1);
        pedal.0 = 0;
        for _ in 0..4 {
            engine.tick(&mut pedal);
        }
        assert!(!engine.assigner().hold());
        assert_eq!(engine.assigner().gated_mask(), 0);
    }
    #[test]
    fn fill_emits_audio_and_cvs() {
        let mut engine = Engine::new(Context::new_480());
        engine.handle_event(note(69, true));
        engine.tick(&mut NoInputs);
        let mut frames = [Frame::default(); 10];
        engine.fill(&mut frames);
        for frame in frames.iter() {
            assert_eq!(
                frame.words[Frame::audio_index(0, 1)].channel(),
                DacChannel::Audio { voice: 0, osc: 1 }
            );
        }
        let cv_words = frames
            .iter()
            .flat_map(|f| f.cv_slots().iter())
            .filter(|w| **w != DacWord::NOP)
            .count();
        // 45 channels are waiting, more than 10 frames of slots
        assert_eq!(cv_words, 10 * crate::dma::CV_SLOTS_PER_FRAME);
    }
}
