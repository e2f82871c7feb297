use super::*;

/// The CVs of one voice, as last computed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceCvs {
    /// Oscillator A pitch
    pub pitch_a: u16,
    /// Oscillator B pitch
    pub pitch_b: u16,
    /// Filter cutoff DAC code, after tuning
    pub cutoff: u16,
    /// Filter resonance
    pub resonance: u16,
    /// VCA level
    pub amp: u16,
    /// Noise level
    pub noise: u16,
    /// WaveMod amount
    pub wavemod: u16,
}

impl VoiceCvs {
    /// The value of one CV output
    pub fn get(&self, cv: VoiceCv) -> u16 {
        match cv {
            VoiceCv::PitchA => self.pitch_a,
            VoiceCv::PitchB => self.pitch_b,
            VoiceCv::Cutoff => self.cutoff,
            VoiceCv::Resonance => self.resonance,
            VoiceCv::Amp => self.amp,
            VoiceCv::Noise => self.noise,
            VoiceCv::WaveMod => self.wavemod,
        }
    }
}

/// Modulation shared by every voice, computed once per CV update
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct GlobalMod {
    /// Bend and global LFO, in pitch CV units
    pub pitch: i32,
    /// Global LFO and pressure, in cutoff CV units
    pub cutoff: i32,
    /// Pressure routed to WaveMod
    pub wavemod: i32,
    /// Pressure routed to the VCA
    pub amp: u16,
    /// Total vibrato depth
    pub vibrato: u16,
    /// Tremolo gain, full scale at 0xFFFF
    pub tremolo: u16,
}

/// Gate-on waiting for a stolen voice to finish its fast release
#[derive(Clone, Copy, Debug)]
struct PendingNote {
    note: u8,
    velocity: u16,
}

/// Cutoff offset from keyboard tracking and velocity, centered on 0x8000
fn cutoff_tracking(filter: &FilterSettings, note: u8, velocity: u16) -> u16 {
    let from_c4 = note_to_pitch(note) as i32 - note_to_pitch(60) as i32;
    let track = (from_c4 * filter.keytrack as i32) >> 16;
    let vel = scale_u16(velocity, Scalar::from_bits(filter.velocity)) as i32;
    saturate_u16(0x8000 + track + vel)
}

/// One voice: two oscillators, two envelopes, an LFO and two glides
#[derive(Clone, Debug)]
pub struct Voice {
    amp_env: Env,
    filter_env: Env,
    lfo: Lfo,
    oscs: [WaveOsc; OSCS_PER_VOICE],
    pitch: Glide,
    cutoff: Glide,
    note: u8,
    velocity: u16,
    played: bool,
    stolen: bool,
    pending: Option<PendingNote>,
    cvs: VoiceCvs,
}

impl Voice {
    fn new(seed: u64) -> Self {
        Self {
            amp_env: Env::new(),
            filter_env: Env::new(),
            lfo: Lfo::new(seed),
            oscs: [WaveOsc::new(), WaveOsc::new()],
            pitch: Glide::new(),
            cutoff: Glide::new(),
            note: 0,
            velocity: 0,
            played: false,
            stolen: false,
            pending: None,
            cvs: VoiceCvs::default(),
        }
    }
    /// The amplitude envelope
    pub fn amp_env(&self) -> &Env {
        &self.amp_env
    }
    /// The filter envelope
    pub fn filter_env(&self) -> &Env {
        &self.filter_env
    }
    /// The note last started on this voice
    pub fn note(&self) -> u8 {
        self.note
    }
    /// The last computed CVs
    pub fn cvs(&self) -> &VoiceCvs {
        &self.cvs
    }
    /// The current (gliding) pitch
    pub fn pitch(&self) -> u16 {
        self.pitch.value()
    }
    /// Oscillator `n` (0 is A)
    pub fn osc(&self, n: usize) -> &WaveOsc {
        &self.oscs[n.min(OSCS_PER_VOICE - 1)]
    }

    fn start(&mut self, config: &BankConfig, note: u8, velocity: u16, legato: bool) {
        let glide = self.played && config.glide_mode.applies(legato);
        self.note = note;
        self.velocity = velocity;
        self.played = true;
        self.pitch.set_target(note_to_pitch(note), glide);
        self.cutoff
            .set_target(cutoff_tracking(&config.filter, note, velocity), glide);
        if !legato {
            self.amp_env.set_gate(true);
            self.filter_env.set_gate(true);
            if config.key_reset {
                self.lfo.reset_phase();
            }
        }
    }
    fn gate_on(&mut self, config: &BankConfig, event: &AssignerEvent) {
        let legato = event.flags.contains(AssignFlags::LEGATO);
        if self.stolen {
            // the newest note wins, legato or not
            self.pending = Some(PendingNote {
                note: event.note,
                velocity: event.velocity,
            });
        } else {
            self.start(config, event.note, event.velocity, legato);
        }
    }
    fn gate_off(&mut self, flags: AssignFlags) {
        if flags.contains(AssignFlags::PANIC) {
            self.amp_env.reset();
            self.filter_env.reset();
            self.stolen = false;
            self.pending = None;
        } else if flags.contains(AssignFlags::STOLEN) {
            self.amp_env.fast_release();
            self.filter_env.fast_release();
            self.stolen = self.amp_env.stage().is_active();
            self.pending = None;
        } else if self.pending.take().is_none() {
            self.amp_env.set_gate(false);
            self.filter_env.set_gate(false);
        }
    }

    /// Restart a pending note once the stolen release has finished
    fn finish_steal(&mut self, config: &BankConfig) {
        if self.amp_env.stage().is_active() {
            return;
        }
        self.stolen = false;
        if let Some(p) = self.pending.take() {
            self.amp_env.acknowledge_done();
            self.filter_env.acknowledge_done();
            self.start(config, p.note, p.velocity, false);
        }
    }

    fn step_glides(&mut self, time: u16) {
        self.pitch.step(time);
        self.cutoff.step(time);
    }

    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        voice: usize,
        config: &BankConfig,
        context: &Context,
        waves: &WaveStore,
        preset: &Preset,
        lfo_params: &LfoParams,
        global: &GlobalMod,
        tune: &TuneTable,
    ) {
        let amp_env = self.amp_env.update(&preset.env.amp) as i32;
        let filter_env = self.filter_env.update(&preset.env.filter) as i32;
        if self.stolen {
            self.finish_steal(config);
        }
        let lfo = self.lfo.update(lfo_params) as i32;

        let vibrato = (lfo * global.vibrato as i32) >> 21;
        let pitch = self.pitch.value() as i32 + global.pitch + vibrato;
        let offset_b = preset.osc.transpose_b as i32 * PITCH_PER_OCTAVE as i32 / 12
            + preset.osc.detune_b as i32;
        let pitch_a = saturate_u16(pitch);
        let pitch_b = saturate_u16(pitch + offset_b);

        let wavemod = saturate_u16(
            preset.osc.wavemod as i32
                + ((filter_env * preset.osc.wavemod_env as i32) >> 15)
                + ((lfo * preset.osc.wavemod_lfo as i32) >> 16)
                + global.wavemod,
        );
        let slots = preset.osc.slots();
        for ((osc, slot), pitch) in self.oscs.iter_mut().zip(slots).zip([pitch_a, pitch_b]) {
            osc.set_waves(slot, Some(preset.osc.crossover_slot()));
            osc.set_parameters(context, waves, pitch, preset.osc.wavemod_target, wavemod);
        }

        let cutoff = preset.filter.cutoff as i32
            + ((filter_env * preset.filter.env_amount as i32) >> 15)
            + (self.cutoff.value() as i32 - 0x8000)
            + global.cutoff;

        let vel_loss = scale_u16(!self.velocity, Scalar::from_bits(preset.amp.velocity));
        let mut amp = scale_u16(amp_env as u16, Scalar::from_bits(!vel_loss));
        amp = scale_u16(amp, Scalar::from_bits(preset.amp.level));
        amp = scale_u16(amp, Scalar::from_bits(global.tremolo));
        let pressure = scale_u16(amp_env as u16, Scalar::from_bits(global.amp)) as i32;

        self.cvs = VoiceCvs {
            pitch_a,
            pitch_b,
            cutoff: tune.cv_for_pitch(voice, saturate_u16(cutoff)),
            resonance: preset.filter.resonance,
            amp: saturate_u16(amp as i32 + pressure),
            noise: preset.osc.noise,
            wavemod,
        };
    }

    /// Produce one sample from each oscillator.  B is the hard sync master.
    fn samples(&mut self, waves: &WaveStore) -> [u16; OSCS_PER_VOICE] {
        let b = self.oscs[1].update(waves, false);
        let a = self.oscs[0].update(waves, b.wrapped);
        [a.sample, b.sample]
    }
}

/// The parts of the preset the assigner event handler needs
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BankConfig {
    pub glide_mode: GlideMode,
    pub key_reset: bool,
    pub filter: FilterSettings,
}

/// Every voice, and the receiving end of the assigner's gate changes
#[derive(Clone, Debug)]
pub struct VoiceBank {
    voices: [Voice; MAX_VOICES],
    config: BankConfig,
}

impl VoiceBank {
    pub(crate) fn new() -> Self {
        Self {
            voices: core::array::from_fn(|i| Voice::new(0x5eed_0000 + i as u64)),
            config: BankConfig::default(),
        }
    }
    pub(crate) fn configure(&mut self, preset: &Preset) {
        self.config = BankConfig {
            glide_mode: preset.voicing.glide_mode,
            key_reset: preset.lfo.key_reset,
            filter: preset.filter,
        };
    }
    /// One voice (clamped)
    pub fn voice(&self, voice: usize) -> &Voice {
        &self.voices[voice.min(MAX_VOICES - 1)]
    }
    /// Every voice
    pub fn voices(&self) -> &[Voice; MAX_VOICES] {
        &self.voices
    }
    /// Move finished envelopes back to Wait.  Returns the voices to free.
    pub(crate) fn collect_done(&mut self) -> u8 {
        let mut done = 0;
        for (i, v) in self.voices.iter_mut().enumerate() {
            if v.amp_env.acknowledge_done() {
                v.filter_env.reset();
                v.stolen = false;
                done |= 1 << i;
            }
        }
        done
    }
    pub(crate) fn step_glides(&mut self, time: u16) {
        for v in self.voices.iter_mut() {
            v.step_glides(time);
        }
    }
    /// Latch the hard sync roles: B masters A on every voice in `mask`
    pub(crate) fn latch_sync(&mut self, mask: u8) {
        for (i, v) in self.voices.iter_mut().enumerate() {
            let on = mask & (1 << i) != 0;
            v.oscs[0].set_role(if on { SyncRole::Slave } else { SyncRole::None });
            v.oscs[1].set_role(if on { SyncRole::Master } else { SyncRole::None });
        }
    }
    pub(crate) fn update(
        &mut self,
        context: &Context,
        waves: &WaveStore,
        preset: &Preset,
        lfo_params: &LfoParams,
        global: &GlobalMod,
        tune: &TuneTable,
    ) {
        let config = self.config;
        for (i, v) in self.voices.iter_mut().enumerate() {
            v.update(i, &config, context, waves, preset, lfo_params, global, tune);
        }
    }
    pub(crate) fn fill_frame(&mut self, waves: &WaveStore, frame: &mut Frame) {
        for (i, v) in self.voices.iter_mut().enumerate() {
            for (osc, sample) in v.samples(waves).into_iter().enumerate() {
                frame.words[Frame::audio_index(i, osc)] = DacWord::new(
                    DacChannel::Audio {
                        voice: i as u8,
                        osc: osc as u8,
                    },
                    sample,
                );
            }
        }
    }
}

impl AssignerSink for VoiceBank {
    fn assigner_event(&mut self, event: AssignerEvent) {
        let config = self.config;
        let Some(voice) = self.voices.get_mut(event.voice as usize) else {
            return;
        };
        if event.gate {
            voice.gate_on(&config, &event);
        } else {
            voice.gate_off(event.flags);
        }
    }
}
