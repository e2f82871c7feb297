//! Events flowing into and out of the engine.
//!
//! [EngineEvent]s are produced by the foreground (keyboard scan, MIDI parser,
//! UI) and queued for the tick.  [AssignerEvent]s are produced by the voice
//! assigner and consumed by whatever triggers the envelopes.

use bitflags::bitflags;
use wmidi::{ControlFunction, MidiMessage};

bitflags! {
    /// Where a note event came from
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SourceFlags: u8 {
        /// The local keyboard
        const KEYBOARD = 1 << 0;
        /// MIDI input
        const MIDI = 1 << 1;
        /// The arpeggiator
        const ARP = 1 << 2;
    }
}

bitflags! {
    /// Flags attached to an [AssignerEvent]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AssignFlags: u8 {
        /// Gate off because the voice is being taken for another note
        const STOLEN = 1 << 0;
        /// Gate on that changes pitch without retriggering the envelopes
        const LEGATO = 1 << 1;
        /// Gate on for a voice that was already playing the same note
        const RETRIGGER = 1 << 2;
        /// Gate on restoring a held note after a mono note was released
        const RESTORED = 1 << 3;
        /// The note came from the local keyboard
        const KEYBOARD = 1 << 4;
        /// Gate off from a panic; skip the release stage
        const PANIC = 1 << 5;
    }
}

bitflags! {
    /// Where pressure (aftertouch) is routed
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    pub struct PressureTargets: u8 {
        /// Filter cutoff
        const CUTOFF = 1 << 0;
        /// Amplitude
        const AMP = 1 << 1;
        /// WaveMod amount
        const WAVEMOD = 1 << 2;
        /// Vibrato depth
        const VIBRATO = 1 << 3;
    }
}

/// A control event queued for the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A key going down (`gate`) or up
    Note {
        /// MIDI note number, 0..=127
        note: u8,
        /// True for note on
        gate: bool,
        /// Velocity, full scale at 0xFFFF
        velocity: u16,
        /// Where the note came from
        flags: SourceFlags,
    },
    /// Pitch bend, centered at 0
    Bend(i16),
    /// Channel pressure
    Pressure {
        /// Pressure, full scale at 0xFFFF
        value: u16,
        /// Destinations added to the preset's pressure routing
        targets: PressureTargets,
    },
    /// Mod wheel position, full scale at 0xFFFF
    ModWheel(u16),
    /// Hold (sustain) pedal
    Hold(bool),
    /// Release every key
    AllKeysOff,
    /// Silence everything immediately
    Panic,
}

/// Scale a 7 bit MIDI value to 16 bits, hitting 0xFFFF at 127
fn scale_u7(value: u8) -> u16 {
    let v = (value & 0x7F) as u16;
    (v << 9) | (v << 2) | (v >> 5)
}

impl EngineEvent {
    /// Convert a parsed MIDI message.  Messages the engine has no use for
    /// return `None`.  Pressure is tagged with `pressure_targets`.
    pub fn from_midi(msg: &MidiMessage, pressure_targets: PressureTargets) -> Option<Self> {
        match msg {
            MidiMessage::NoteOn(_, note, vel) => {
                let vel: u8 = (*vel).into();
                Some(Self::Note {
                    note: (*note).into(),
                    gate: vel != 0,
                    velocity: scale_u7(vel),
                    flags: SourceFlags::MIDI,
                })
            }
            MidiMessage::NoteOff(_, note, vel) => Some(Self::Note {
                note: (*note).into(),
                gate: false,
                velocity: scale_u7((*vel).into()),
                flags: SourceFlags::MIDI,
            }),
            MidiMessage::PitchBendChange(_, bend) => {
                let raw: u16 = (*bend).into();
                Some(Self::Bend(((raw as i32 - 0x2000) << 2) as i16))
            }
            MidiMessage::ChannelPressure(_, value) => Some(Self::Pressure {
                value: scale_u7((*value).into()),
                targets: pressure_targets,
            }),
            MidiMessage::ControlChange(_, cc, value) => {
                let value: u8 = (*value).into();
                match *cc {
                    ControlFunction::MODULATION_WHEEL => Some(Self::ModWheel(scale_u7(value))),
                    ControlFunction::DAMPER_PEDAL => Some(Self::Hold(value >= 64)),
                    ControlFunction::ALL_NOTES_OFF => Some(Self::AllKeysOff),
                    ControlFunction::ALL_SOUND_OFF => Some(Self::Panic),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// A gate change produced by the voice assigner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssignerEvent {
    /// Sounding note, including any pattern offset
    pub note: u8,
    /// True for gate on
    pub gate: bool,
    /// Voice index
    pub voice: u8,
    /// Velocity, full scale at 0xFFFF
    pub velocity: u16,
    /// Details of the transition
    pub flags: AssignFlags,
}

/// Receives the gate changes the voice assigner produces
pub trait AssignerSink {
    /// Handle one gate change
    fn assigner_event(&mut self, event: AssignerEvent);
}

/// Collects assigner events, for callers that want to process them later
impl<const N: usize> AssignerSink for heapless::Vec<AssignerEvent, N> {
    fn assigner_event(&mut self, event: AssignerEvent) {
        if self.push(event).is_err() {
            log::warn!("assigner event dropped: {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmidi::{Channel, Note, U14, U7};

    #[test]
    fn velocity_scaling() {
        assert_eq!(scale_u7(0), 0);
        assert_eq!(scale_u7(127), 0xFFFF);
        assert_eq!(scale_u7(64), 0x8102);
    }
    #[test]
    fn note_messages() {
        let on = MidiMessage::NoteOn(Channel::Ch1, Note::C4, U7::from_u8_lossy(100));
        assert_eq!(
            EngineEvent::from_midi(&on, PressureTargets::empty()),
            Some(EngineEvent::Note {
                note: 60,
                gate: true,
                velocity: scale_u7(100),
                flags: SourceFlags::MIDI
            })
        );
        let zero = MidiMessage::NoteOn(Channel::Ch1, Note::C4, U7::MIN);
        assert!(matches!(
            EngineEvent::from_midi(&zero, PressureTargets::empty()),
            Some(EngineEvent::Note { gate: false, .. })
        ));
        let off = MidiMessage::NoteOff(Channel::Ch2, Note::A4, U7::MAX);
        assert!(matches!(
            EngineEvent::from_midi(&off, PressureTargets::empty()),
            Some(EngineEvent::Note {
                note: 69,
                gate: false,
                ..
            })
        ));
    }
    #[test]
    fn controller_messages() {
        let bend = MidiMessage::PitchBendChange(Channel::Ch1, U14::try_from(0x3FFFu16).unwrap());
        assert_eq!(
            EngineEvent::from_midi(&bend, PressureTargets::empty()),
            Some(EngineEvent::Bend(0x7FFC))
        );
        let center = MidiMessage::PitchBendChange(Channel::Ch1, U14::try_from(0x2000u16).unwrap());
        assert_eq!(
            EngineEvent::from_midi(&center, PressureTargets::empty()),
            Some(EngineEvent::Bend(0))
        );
        let pedal =
            MidiMessage::ControlChange(Channel::Ch1, ControlFunction::DAMPER_PEDAL, U7::MAX);
        assert_eq!(
            EngineEvent::from_midi(&pedal, PressureTargets::empty()),
            Some(EngineEvent::Hold(true))
        );
        let panic =
            MidiMessage::ControlChange(Channel::Ch1, ControlFunction::ALL_SOUND_OFF, U7::MIN);
        assert_eq!(
            EngineEvent::from_midi(&panic, PressureTargets::empty()),
            Some(EngineEvent::Panic)
        );
        let pressure = MidiMessage::ChannelPressure(Channel::Ch1, U7::MAX);
        assert_eq!(
            EngineEvent::from_midi(&pressure, PressureTargets::CUTOFF),
            Some(EngineEvent::Pressure {
                value: 0xFFFF,
                targets: PressureTargets::CUTOFF
            })
        );
        let program = MidiMessage::ProgramChange(Channel::Ch1, U7::MIN);
        assert_eq!(EngineEvent::from_midi(&program, PressureTargets::empty()), None);
    }
    #[test]
    fn vec_sink_collects() {
        let mut sink = heapless::Vec::<AssignerEvent, 2>::new();
        for voice in 0..3 {
            sink.assigner_event(AssignerEvent {
                voice,
                ..Default::default()
            });
        }
        assert_eq!(sink.len(), 2);
    }
}
