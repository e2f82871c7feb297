//! The arpeggiator: captures held notes and plays them back one at a time on
//! clock divisions.

use arrayvec::ArrayVec;
use oorandom::Rand32;
use serde::{Deserialize, Serialize};

use crate::assigner::NoteState;

/// The most notes the arpeggiator will hold
pub const ARP_NOTES: usize = 16;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// Playback order
pub enum ArpMode {
    /// Lowest to highest
    #[default]
    Up,
    /// Highest to lowest
    Down,
    /// Up then down, without repeating the end notes
    UpDown,
    /// Random order
    Random,
}

impl ArpMode {
    const ELEM: [ArpMode; 4] = [Self::Up, Self::Down, Self::UpDown, Self::Random];
    /// Returns a slice to all of the possible modes
    pub const fn modes() -> &'static [ArpMode] {
        &Self::ELEM
    }
    /// Display name
    pub const fn to_str(&self) -> &'static str {
        ["Up", "Down", "Up/Down", "Random"][*self as usize]
    }
    /// Try to create an ArpMode from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
}

impl TryFrom<u8> for ArpMode {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        Self::new_from_u8(value).ok_or("Conversion of u8 to ArpMode Overflowed")
    }
}

/// Arpeggiator configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpSettings {
    /// Route notes through the arpeggiator
    pub enabled: bool,
    /// Playback order
    pub mode: ArpMode,
    /// Octave range, 1 to 4
    pub octaves: u8,
    /// Clock pulses per step (6 is a sixteenth note at 24ppqn)
    pub division: u8,
    /// Gate length as a fraction of the step, full scale at 0xFFFF
    pub gate: u16,
}

impl Default for ArpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ArpMode::Up,
            octaves: 1,
            division: 6,
            gate: 0x8000,
        }
    }
}

/// A note the arpeggiator wants played or released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpNote {
    /// MIDI note number
    pub note: u8,
    /// Gate on or off
    pub gate: bool,
}

/// Output of one [Arpeggiator::advance]; at most a gate off and a gate on
/// per pulse
pub type ArpOutput = ArrayVec<ArpNote, 8>;

/// The arpeggiator state
#[derive(Clone, Debug)]
pub struct Arpeggiator {
    held: ArrayVec<u8, ARP_NOTES>,
    pressed: NoteState,
    position: usize,
    descending: bool,
    pulses: u32,
    gate_pulses: u32,
    /// Pulses that did not fit in the last output
    backlog: u16,
    sounding: Option<u8>,
    velocity: u16,
    rng: Rand32,
}

impl Default for Arpeggiator {
    fn default() -> Self {
        Self::new(0x1ce4_e5b9_5a2f_0c73)
    }
}

impl Arpeggiator {
    /// Constructor
    pub fn new(seed: u64) -> Self {
        Self {
            held: ArrayVec::new(),
            pressed: NoteState::default(),
            position: 0,
            descending: false,
            pulses: 0,
            gate_pulses: 0,
            backlog: 0,
            sounding: None,
            velocity: 0xFFFF,
            rng: Rand32::new(seed),
        }
    }
    /// The captured notes, lowest first
    pub fn held(&self) -> &[u8] {
        &self.held
    }
    /// The note currently gated, if any
    pub fn sounding(&self) -> Option<u8> {
        self.sounding
    }
    /// Velocity of the most recent key press
    pub fn velocity(&self) -> u16 {
        self.velocity
    }
    /// Capture a key.  While `hold` is down released keys stay in the set,
    /// and the first key pressed after every key is up starts a new set.
    pub fn note_event(&mut self, note: u8, gate: bool, velocity: u16, hold: bool) {
        let note = note & 0x7F;
        if gate {
            if hold && !self.pressed.any() {
                self.held.clear();
            }
            self.pressed.set(note);
            self.velocity = velocity;
            if let Err(idx) = self.held.binary_search(&note) {
                if self.held.is_full() {
                    log::debug!("arpeggiator full, note {} ignored", note);
                } else {
                    self.held.insert(idx, note);
                }
            }
        } else {
            self.pressed.clear(note);
            if !hold {
                self.held.retain(|n| *n != note);
            }
        }
    }
    /// Hold pedal released: drop every note whose key is up
    pub fn release_hold(&mut self) {
        let pressed = self.pressed;
        self.held.retain(|n| pressed.contains(*n));
    }
    /// Forget every note.  Returns the gate off for the sounding note.
    pub fn clear(&mut self) -> Option<ArpNote> {
        self.held.clear();
        self.pressed = NoteState::default();
        self.position = 0;
        self.descending = false;
        self.sounding.take().map(|note| ArpNote { note, gate: false })
    }
    /// Restart the pattern from the first step
    pub fn restart(&mut self) {
        self.position = 0;
        self.descending = false;
        self.pulses = 0;
        self.backlog = 0;
    }

    fn sequence_len(&self, settings: &ArpSettings) -> usize {
        self.held.len() * settings.octaves.clamp(1, 4) as usize
    }
    fn note_at(&self, index: usize) -> u8 {
        let len = self.held.len().max(1);
        let octave = (index / len) as u8;
        self.held[index % len].saturating_add(12 * octave).min(127)
    }
    fn next_note(&mut self, settings: &ArpSettings) -> Option<u8> {
        let len = self.sequence_len(settings);
        if len == 0 {
            return None;
        }
        let index = match settings.mode {
            ArpMode::Up => {
                let i = self.position % len;
                self.position = (i + 1) % len;
                i
            }
            ArpMode::Down => {
                let i = self.position % len;
                self.position = (i + 1) % len;
                len - 1 - i
            }
            ArpMode::UpDown => {
                let i = self.position.min(len - 1);
                if len == 1 {
                    self.position = 0;
                } else if self.descending {
                    if i == 0 {
                        self.descending = false;
                        self.position = 1;
                    } else {
                        self.position = i - 1;
                    }
                } else if i + 1 >= len {
                    self.descending = true;
                    self.position = len - 2;
                } else {
                    self.position = i + 1;
                }
                i
            }
            ArpMode::Random => self.rng.rand_range(0..len as u32) as usize,
        };
        Some(self.note_at(index))
    }
    /// Advance by `pulses` clock pulses.  If the output fills up, the
    /// remaining pulses are run on the next call.
    pub fn advance(&mut self, pulses: u8, settings: &ArpSettings) -> ArpOutput {
        let mut out = ArpOutput::new();
        let division = settings.division.max(1) as u32;
        let gate_len = ((division * settings.gate as u32) >> 16).clamp(1, division);
        let mut remaining = self.backlog.saturating_add(pulses as u16);
        while remaining > 0 {
            remaining -= 1;
            if let Some(note) = self.sounding {
                self.gate_pulses += 1;
                if self.gate_pulses >= gate_len || self.held.is_empty() {
                    out.push(ArpNote { note, gate: false });
                    self.sounding = None;
                }
            }
            if self.pulses % division == 0 {
                if let Some(note) = self.sounding.take() {
                    out.push(ArpNote { note, gate: false });
                }
                if let Some(note) = self.next_note(settings) {
                    out.push(ArpNote { note, gate: true });
                    self.sounding = Some(note);
                    self.gate_pulses = 0;
                }
            }
            self.pulses = self.pulses.wrapping_add(1);
            if out.remaining_capacity() < 2 {
                break;
            }
        }
        self.backlog = remaining;
        out
    }
    /// Pulses waiting for the next [Arpeggiator::advance]
    pub fn backlog(&self) -> u16 {
        self.backlog
    }
}
