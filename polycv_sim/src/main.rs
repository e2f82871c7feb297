//! Runs the PolyCV engine on the desktop: tunes a bank of simulated VCOs,
//! then plays a scripted MIDI performance through the event queues and the
//! DMA pipeline the way the firmware interrupts would, logging what the
//! engine drives onto its DACs.

use polycv::dma::{DacChannel, DmaPipeline, Frame, GlobalCv, VoiceCv};
use polycv::engine::{EventQueue, PresetQueue, QueueInputs, Readout};
use polycv::event::PressureTargets;
use polycv::preset::Preset;
use polycv::tuner::{TuneTable, Tuner};
use polycv::{Context, Engine, EngineEvent};
use wmidi::MidiMessage;

mod performance;
mod vco;

use performance::Performance;
use vco::VcoBank;

/// Frames per DMA half: two CV updates worth at 48kHz
const HALF_FRAMES: usize = 24;

fn log_readout(readout: &Readout) {
    log::info!(
        "tick {:6} assigned {:06b} gated {:06b}",
        readout.tick,
        readout.assigned_mask,
        readout.gated_mask
    );
    for (voice, cvs) in readout.cvs.iter().enumerate() {
        if readout.assigned_mask & (1 << voice) == 0 {
            continue;
        }
        log::info!(
            "  voice {} env {:04x} pitch {:04x}/{:04x} cutoff {:04x} amp {:04x}",
            voice,
            readout.visual_env[voice],
            cvs.pitch_a,
            cvs.pitch_b,
            cvs.cutoff,
            cvs.amp
        );
    }
}

/// Counts the DAC writes seen on a few channels of interest
#[derive(Default)]
struct DacMonitor {
    audio: u32,
    voice_cv: u32,
    global_cv: u32,
    nop: u32,
    last_mod_wheel: u16,
}

impl DacMonitor {
    fn observe(&mut self, frames: &[Frame]) {
        for word in frames.iter().flat_map(|f| f.words.iter()) {
            match word.channel() {
                DacChannel::Nop => self.nop += 1,
                DacChannel::Audio { .. } => self.audio += 1,
                DacChannel::Voice { .. } => self.voice_cv += 1,
                DacChannel::Global(GlobalCv::ModWheel) => {
                    self.global_cv += 1;
                    self.last_mod_wheel = word.value();
                }
                DacChannel::Global(_) => self.global_cv += 1,
            }
        }
    }
}

fn tune(context: &Context) -> TuneTable {
    let mut bank = VcoBank::new(context.sample_rate());
    let mut table = TuneTable::nominal();
    let reports = Tuner::default().tune_all(&mut bank, 0x3F, &mut table);
    for report in reports.iter().flatten() {
        let codes = table.codes(report.voice);
        log::debug!("voice {} codes {:04x?}", report.voice, codes);
    }
    table
}

fn main() {
    colog::init();
    let seconds: u32 = match std::env::args().nth(1).map(|s| s.parse()) {
        Some(Ok(s)) => s,
        Some(Err(e)) => {
            log::error!("Invalid duration: {}", e);
            std::process::exit(1);
        }
        None => 4,
    };
    let context = Context::new_480();
    let mut engine = Engine::new(context);
    engine.set_tune_table(tune(&context));

    let mut events = EventQueue::new();
    let mut presets = PresetQueue::new();
    let (mut event_tx, event_rx) = events.split();
    let (mut preset_tx, preset_rx) = presets.split();
    let mut inputs = QueueInputs::new(event_rx, preset_rx);
    let mut dma = DmaPipeline::<HALF_FRAMES>::new();
    let mut monitor = DacMonitor::default();
    let mut performance = Performance::new();

    let cv_per_half = HALF_FRAMES as u32 * context.cv_rate() / context.sample_rate();
    let halves = seconds * context.sample_rate() / HALF_FRAMES as u32;
    let mut preset = Preset::default();
    for half in 0..halves {
        let now_ms = half as u64 * HALF_FRAMES as u64 * 1000 / context.sample_rate() as u64;
        for step in performance.due(now_ms) {
            match step {
                performance::Step::Midi(bytes) => match MidiMessage::try_from(bytes) {
                    Ok(msg) => {
                        // routing comes from the preset
                        if let Some(event) = EngineEvent::from_midi(&msg, PressureTargets::empty()) {
                            if event_tx.enqueue(event).is_err() {
                                log::warn!("Event queue full, dropped {:?}", msg);
                            }
                        }
                    }
                    Err(e) => log::warn!("Bad MIDI in script: {:?}", e),
                },
                performance::Step::Preset(change) => {
                    change(&mut preset);
                    if preset_tx.enqueue(preset).is_err() {
                        log::warn!("Preset queue full");
                    }
                }
            }
        }
        for _ in 0..cv_per_half {
            engine.tick_phase(&mut inputs);
        }
        let frames = dma.half_complete();
        engine.fill(frames);
        dma.refill_done();
        monitor.observe(dma.draining());
        if engine.phase() == 0 && engine.tick_count() % 250 == 0 {
            log_readout(&engine.readout());
        }
    }

    let cutoff = engine.readout().cvs[0].get(VoiceCv::Cutoff);
    log::info!(
        "done: {} audio words, {} voice CV writes, {} global CV writes, {} padding",
        monitor.audio,
        monitor.voice_cv,
        monitor.global_cv,
        monitor.nop
    );
    log::info!(
        "mod wheel {:04x}, voice 0 cutoff {:04x}, {} overruns",
        monitor.last_mod_wheel,
        cutoff,
        dma.overruns()
    );
}
