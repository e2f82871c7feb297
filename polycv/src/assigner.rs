//! The voice assigner maps note events onto the fixed voice pool.
//!
//! It only does bookkeeping: which voice plays which note and whether its gate
//! is high.  Every gate change is reported to an [AssignerSink], which is
//! where the envelopes actually get triggered.  Voices are freed when the
//! owner calls [VoiceAssigner::voice_done] after the amp envelope finishes.

use arrayvec::ArrayVec;
use core::cmp::Reverse;
use serde::{Deserialize, Serialize};

use crate::event::{AssignFlags, AssignerEvent, AssignerSink, SourceFlags};

/// The number of voices in the pool
pub const MAX_VOICES: usize = 6;
/// Mask with every voice enabled
pub const ALL_VOICES: u8 = (1 << MAX_VOICES) - 1;
/// Depth of the mono press-order stack
const PRESS_STACK: usize = 16;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// Which note wins when there are more notes than voices
pub enum Priority {
    /// The newest note wins
    #[default]
    Last,
    /// The lowest note wins
    Low,
    /// The highest note wins
    High,
}

impl Priority {
    const ELEM: [Priority; 3] = [Self::Last, Self::Low, Self::High];
    /// Returns a slice to all of the possible priorities
    pub const fn priorities() -> &'static [Priority] {
        &Self::ELEM
    }
    /// Display name
    pub const fn to_str(&self) -> &'static str {
        ["Last", "Low", "High"][*self as usize]
    }
    /// Try to create a Priority from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        Self::new_from_u8(value).ok_or("Conversion of u8 to Priority Overflowed")
    }
}

/// Semitone offsets from the root note, one voice per offset.  A single zero
/// offset plays one voice per key; more offsets stack unison or chords.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pattern {
    offsets: [i8; MAX_VOICES],
    len: u8,
    /// Play every key on the same voice(s)
    pub mono: bool,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::root(false)
    }
}

impl Pattern {
    /// The root note alone
    pub const fn root(mono: bool) -> Self {
        Self {
            offsets: [0; MAX_VOICES],
            len: 1,
            mono,
        }
    }
    /// Build a pattern from offsets.  Extra offsets are dropped and an empty
    /// slice gives the root pattern.
    pub fn new(offsets: &[i8], mono: bool) -> Self {
        let mut retval = Self::root(mono);
        let len = offsets.len().clamp(1, MAX_VOICES);
        for (dst, src) in retval.offsets.iter_mut().zip(offsets.iter()) {
            *dst = *src;
        }
        retval.len = len as u8;
        retval
    }
    /// `count` voices all on the root note
    pub fn unison(count: usize, mono: bool) -> Self {
        Self::new(&[0; MAX_VOICES][..count.clamp(1, MAX_VOICES)], mono)
    }
    /// The offsets in use
    pub fn offsets(&self) -> &[i8] {
        &self.offsets[..(self.len as usize).clamp(1, MAX_VOICES)]
    }
}

/// The set of physically held keys
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteState {
    bits: u128,
}

impl NoteState {
    /// Mark a key down
    pub fn set(&mut self, note: u8) {
        self.bits |= 1u128 << (note & 0x7F);
    }
    /// Mark a key up
    pub fn clear(&mut self, note: u8) {
        self.bits &= !(1u128 << (note & 0x7F));
    }
    /// Is this key down?
    pub fn contains(&self, note: u8) -> bool {
        self.bits & (1u128 << (note & 0x7F)) != 0
    }
    /// Is any key down?
    pub fn any(&self) -> bool {
        self.bits != 0
    }
    /// The lowest key down
    pub fn lowest(&self) -> Option<u8> {
        self.any().then(|| self.bits.trailing_zeros() as u8)
    }
    /// The highest key down
    pub fn highest(&self) -> Option<u8> {
        self.any().then(|| 127 - self.bits.leading_zeros() as u8)
    }
    /// Number of keys down
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }
    fn reset(&mut self) {
        self.bits = 0;
    }
}

/// The assigner's view of one voice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceSlot {
    /// Owned by a note (possibly releasing)
    pub assigned: bool,
    /// Gate high
    pub gated: bool,
    /// The root note's key is physically down
    pub key_pressed: bool,
    /// The note that was pressed
    pub root_note: u8,
    /// The sounding note: root plus pattern offset
    pub note: u8,
    /// Velocity of the last gate on
    pub velocity: u16,
    /// Allocation time, see [VoiceAssigner::tick]
    pub timestamp: u32,
    /// The note came from the local keyboard
    pub from_keyboard: bool,
}

/// Maps note events onto the voice pool.
#[derive(Clone, Debug)]
pub struct VoiceAssigner {
    voices: [VoiceSlot; MAX_VOICES],
    notes: NoteState,
    press_order: ArrayVec<u8, PRESS_STACK>,
    priority: Priority,
    pattern: Pattern,
    voice_mask: u8,
    hold: bool,
    clock: u32,
}

impl Default for VoiceAssigner {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceAssigner {
    /// A pool with every voice enabled, priority Last and the root pattern
    pub fn new() -> Self {
        Self {
            voices: [VoiceSlot::default(); MAX_VOICES],
            notes: NoteState::default(),
            press_order: ArrayVec::new(),
            priority: Priority::Last,
            pattern: Pattern::default(),
            voice_mask: ALL_VOICES,
            hold: false,
            clock: 0,
        }
    }
    /// Advance the allocation clock.  Called once per tick.
    pub fn tick(&mut self) {
        self.clock = self.clock.wrapping_add(1);
    }
    fn grant_timestamp(&mut self) -> u32 {
        self.clock = self.clock.wrapping_add(1);
        self.clock
    }
    fn age(&self, voice: usize) -> u32 {
        self.clock.wrapping_sub(self.voices[voice].timestamp)
    }
    fn enabled(&self, voice: usize) -> bool {
        self.voice_mask & (1 << voice) != 0
    }
    fn enabled_voices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_VOICES).filter(move |v| self.enabled(*v))
    }
    /// The oldest enabled voice matching `pred`
    fn oldest_where(&self, pred: impl Fn(&VoiceSlot) -> bool) -> Option<usize> {
        self.enabled_voices()
            .filter(|v| pred(&self.voices[*v]))
            .min_by_key(|v| Reverse(self.age(*v)))
    }

    /// The voice slot for `voice` (clamped)
    pub fn voice(&self, voice: usize) -> &VoiceSlot {
        &self.voices[voice.min(MAX_VOICES - 1)]
    }
    /// The sounding note of a voice, if it is assigned
    pub fn assignment(&self, voice: usize) -> Option<u8> {
        let slot = self.voice(voice);
        slot.assigned.then_some(slot.note)
    }
    /// Is any key physically down?
    pub fn any_pressed(&self) -> bool {
        self.notes.any()
    }
    /// Is any voice assigned?
    pub fn any_assigned(&self) -> bool {
        self.voices.iter().any(|v| v.assigned)
    }
    /// The physically held keys
    pub fn notes(&self) -> &NoteState {
        &self.notes
    }
    /// Bit `n` set if voice `n` is assigned
    pub fn assigned_mask(&self) -> u8 {
        self.mask_where(|v| v.assigned)
    }
    /// Bit `n` set if voice `n` has its gate high
    pub fn gated_mask(&self) -> u8 {
        self.mask_where(|v| v.gated)
    }
    fn mask_where(&self, pred: impl Fn(&VoiceSlot) -> bool) -> u8 {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| pred(v))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }
    /// The current priority
    pub fn priority(&self) -> Priority {
        self.priority
    }
    /// The current pattern
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
    /// The current voice mask
    pub fn voice_mask(&self) -> u8 {
        self.voice_mask
    }
    /// Is the hold pedal down?
    pub fn hold(&self) -> bool {
        self.hold
    }

    /// Set the note priority
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }
    /// Enable the voices whose bits are set.  Assigned voices that become
    /// disabled are gated off.  An empty mask is ignored.
    pub fn set_voice_mask(&mut self, mask: u8, sink: &mut impl AssignerSink) {
        let mask = mask & ALL_VOICES;
        if mask == 0 {
            log::warn!("ignoring empty voice mask");
            return;
        }
        self.voice_mask = mask;
        for voice in 0..MAX_VOICES {
            if !self.enabled(voice) && self.voices[voice].gated {
                self.gate_off_voice(voice, AssignFlags::empty(), sink);
                self.voices[voice].key_pressed = false;
            }
        }
    }
    /// Change the duplication pattern.  Every key is released first.
    pub fn set_pattern(&mut self, pattern: Pattern, sink: &mut impl AssignerSink) {
        self.all_keys_off(sink);
        self.pattern = pattern;
    }
    /// Hold pedal.  Releasing it gates off every voice whose key is up.
    pub fn hold_event(&mut self, hold: bool, sink: &mut impl AssignerSink) {
        self.hold = hold;
        if !hold {
            for voice in 0..MAX_VOICES {
                let slot = &self.voices[voice];
                if slot.gated && !slot.key_pressed {
                    self.gate_off_voice(voice, AssignFlags::empty(), sink);
                }
            }
        }
    }
    /// Release every key and gate off every voice, regardless of hold
    pub fn all_keys_off(&mut self, sink: &mut impl AssignerSink) {
        self.notes.reset();
        self.press_order.clear();
        for voice in 0..MAX_VOICES {
            self.voices[voice].key_pressed = false;
            if self.voices[voice].gated {
                self.gate_off_voice(voice, AssignFlags::empty(), sink);
            }
        }
    }
    /// Gate off and free every voice immediately.  The gate off events carry
    /// [AssignFlags::PANIC] so the envelopes skip their release.
    pub fn panic_off(&mut self, sink: &mut impl AssignerSink) {
        self.notes.reset();
        self.press_order.clear();
        self.hold = false;
        for voice in 0..MAX_VOICES {
            if self.voices[voice].assigned {
                self.emit(voice, false, AssignFlags::PANIC, sink);
            }
            let timestamp = self.voices[voice].timestamp;
            self.voices[voice] = VoiceSlot {
                timestamp,
                ..Default::default()
            };
        }
    }
    /// Free a voice once its envelope has finished
    pub fn voice_done(&mut self, voice: usize) {
        if let Some(slot) = self.voices.get_mut(voice) {
            if slot.gated {
                log::debug!("voice {} finished while gated", voice);
            }
            slot.assigned = false;
            slot.gated = false;
            slot.key_pressed = false;
        }
    }

    fn emit(&self, voice: usize, gate: bool, flags: AssignFlags, sink: &mut impl AssignerSink) {
        let slot = &self.voices[voice];
        let flags = if slot.from_keyboard {
            flags | AssignFlags::KEYBOARD
        } else {
            flags
        };
        sink.assigner_event(AssignerEvent {
            note: slot.note,
            gate,
            voice: voice as u8,
            velocity: slot.velocity,
            flags,
        });
    }
    fn gate_off_voice(&mut self, voice: usize, flags: AssignFlags, sink: &mut impl AssignerSink) {
        self.voices[voice].gated = false;
        self.emit(voice, false, flags, sink);
    }
    fn push_press(&mut self, note: u8) {
        self.remove_press(note);
        if self.press_order.is_full() {
            self.press_order.remove(0);
        }
        self.press_order.push(note);
    }
    fn remove_press(&mut self, note: u8) {
        self.press_order.retain(|n| *n != note);
    }

    /// Handle a key going down (`gate`) or up.
    pub fn assign_note(
        &mut self,
        note: u8,
        gate: bool,
        velocity: u16,
        source: SourceFlags,
        sink: &mut impl AssignerSink,
    ) {
        let note = note & 0x7F;
        let keyboard = source.contains(SourceFlags::KEYBOARD);
        if gate {
            self.notes.set(note);
            self.push_press(note);
            if self.pattern.mono {
                self.mono_gate_on(note, velocity, keyboard, sink);
            } else {
                self.poly_gate_on(note, velocity, keyboard, sink);
            }
        } else {
            self.notes.clear(note);
            self.remove_press(note);
            if self.pattern.mono {
                self.mono_gate_off(note, sink);
            } else {
                self.release_root(note, sink);
            }
        }
    }

    fn poly_gate_on(&mut self, note: u8, velocity: u16, keyboard: bool, sink: &mut impl AssignerSink) {
        let mut flags = AssignFlags::empty();
        let start = if let Some(v) = self.oldest_where(|s| s.assigned && s.root_note == note) {
            flags |= AssignFlags::RETRIGGER;
            Some(v)
        } else if let Some(v) = self.oldest_where(|s| !s.assigned) {
            Some(v)
        } else {
            self.steal_candidate(note)
        };
        let Some(start) = start else {
            log::trace!("no voice for note {}, dropped", note);
            return;
        };
        self.assign_pattern(start, note, velocity, keyboard, flags, sink);
    }

    /// Pick a voice to steal for `note`.  Voices whose key is already up go
    /// first (oldest of them); otherwise the priority decides, comparing each
    /// voice against the requested note.
    fn steal_candidate(&self, note: u8) -> Option<usize> {
        let notes = self.notes;
        if let Some(v) = self.oldest_where(|s| s.assigned && !notes.contains(s.root_note)) {
            return Some(v);
        }
        let candidates = self.enabled_voices().filter(|v| self.voices[*v].assigned);
        match self.priority {
            Priority::Last => candidates.min_by_key(|v| Reverse(self.age(*v))),
            Priority::Low => candidates
                .filter(|v| self.voices[*v].root_note > note)
                .max_by_key(|v| (self.voices[*v].root_note, self.age(*v))),
            Priority::High => candidates
                .filter(|v| self.voices[*v].root_note < note)
                .min_by_key(|v| (self.voices[*v].root_note, u32::MAX - self.age(*v))),
        }
    }

    /// Enabled voices in order starting from `start`, wrapping around
    fn span_from(&self, start: usize) -> ArrayVec<usize, MAX_VOICES> {
        (0..MAX_VOICES)
            .map(|i| (start + i) % MAX_VOICES)
            .filter(|v| self.enabled(*v))
            .take(self.pattern.offsets().len())
            .collect()
    }

    fn assign_pattern(
        &mut self,
        start: usize,
        note: u8,
        velocity: u16,
        keyboard: bool,
        flags: AssignFlags,
        sink: &mut impl AssignerSink,
    ) {
        let pattern = self.pattern;
        for (voice, offset) in self.span_from(start).into_iter().zip(pattern.offsets()) {
            let slot = self.voices[voice];
            let retrigger = slot.assigned && slot.root_note == note;
            // a mono voice that is only releasing is simply retriggered
            let releasing = pattern.mono && !slot.gated;
            if slot.assigned && !retrigger && !releasing && !flags.contains(AssignFlags::RESTORED) {
                log::trace!("voice {} stolen from note {} for {}", voice, slot.note, note);
                self.gate_off_voice(voice, AssignFlags::STOLEN, sink);
            }
            let timestamp = self.grant_timestamp();
            self.voices[voice] = VoiceSlot {
                assigned: true,
                gated: true,
                key_pressed: true,
                root_note: note,
                note: (note as i16 + *offset as i16).clamp(0, 127) as u8,
                velocity,
                timestamp,
                from_keyboard: keyboard,
            };
            self.emit(voice, true, flags, sink);
        }
    }

    /// Gate off every voice playing `note` as its root, unless held
    fn release_root(&mut self, note: u8, sink: &mut impl AssignerSink) {
        for voice in 0..MAX_VOICES {
            let slot = &mut self.voices[voice];
            if slot.assigned && slot.key_pressed && slot.root_note == note {
                slot.key_pressed = false;
                if !self.hold && slot.gated {
                    self.gate_off_voice(voice, AssignFlags::empty(), sink);
                }
            }
        }
    }

    fn mono_start(&self) -> Option<usize> {
        self.enabled_voices().next()
    }
    /// The held note that should be sounding in mono mode
    fn mono_winner(&self) -> Option<u8> {
        match self.priority {
            Priority::Last => self.press_order.last().copied().or(self.notes.highest()),
            Priority::Low => self.notes.lowest(),
            Priority::High => self.notes.highest(),
        }
    }

    fn mono_gate_on(&mut self, note: u8, velocity: u16, keyboard: bool, sink: &mut impl AssignerSink) {
        if self.mono_winner() != Some(note) {
            // a higher priority note is already sounding
            return;
        }
        let Some(start) = self.mono_start() else {
            return;
        };
        let current = self.voices[start];
        if current.gated {
            // legato: move the sounding voices without retriggering.  Voices
            // that joined the span since the last trigger start fresh.
            let pattern = self.pattern;
            for (voice, offset) in self.span_from(start).into_iter().zip(pattern.offsets()) {
                let sounding = self.voices[voice].gated;
                let timestamp = if sounding {
                    self.voices[voice].timestamp
                } else {
                    self.grant_timestamp()
                };
                self.voices[voice] = VoiceSlot {
                    assigned: true,
                    gated: true,
                    key_pressed: true,
                    root_note: note,
                    note: (note as i16 + *offset as i16).clamp(0, 127) as u8,
                    velocity,
                    timestamp,
                    from_keyboard: keyboard,
                };
                let flags = if sounding {
                    AssignFlags::LEGATO
                } else {
                    AssignFlags::empty()
                };
                self.emit(voice, true, flags, sink);
            }
        } else {
            self.assign_pattern(start, note, velocity, keyboard, AssignFlags::empty(), sink);
        }
    }

    fn mono_gate_off(&mut self, note: u8, sink: &mut impl AssignerSink) {
        let Some(start) = self.mono_start() else {
            return;
        };
        let current = self.voices[start];
        if !(current.assigned && current.key_pressed && current.root_note == note) {
            return;
        }
        match self.mono_winner() {
            Some(restore) => {
                let velocity = current.velocity;
                let keyboard = current.from_keyboard;
                self.assign_pattern(start, restore, velocity, keyboard, AssignFlags::RESTORED, sink);
            }
            None => self.release_root(note, sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    type Events = Vec<AssignerEvent, 64>;

    fn on(a: &mut VoiceAssigner, note: u8, sink: &mut Events) {
        a.assign_note(note, true, 0x8000, SourceFlags::KEYBOARD, sink);
    }
    fn off(a: &mut VoiceAssigner, note: u8, sink: &mut Events) {
        a.assign_note(note, false, 0, SourceFlags::KEYBOARD, sink);
    }

    #[test]
    fn distinct_voices_up_to_pool_size() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        for (i, note) in [40u8, 45, 50, 55, 60, 65].iter().enumerate() {
            on(&mut a, *note, &mut ev);
            a.tick();
            assert_eq!(a.assignment(i), Some(*note));
        }
        assert!(ev.iter().all(|e| e.gate && !e.flags.contains(AssignFlags::STOLEN)));
        let mut voices: ArrayVec<u8, 6> = ev.iter().map(|e| e.voice).collect();
        voices.sort();
        assert_eq!(voices.as_slice(), &[0, 1, 2, 3, 4, 5]);
    }
    #[test]
    fn three_note_example() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        for note in [60, 64, 67] {
            on(&mut a, note, &mut ev);
        }
        assert_eq!(a.assignment(0), Some(60));
        assert_eq!(a.assignment(1), Some(64));
        assert_eq!(a.assignment(2), Some(67));
        assert!(a.voice(0).timestamp < a.voice(1).timestamp);
        assert!(a.voice(1).timestamp < a.voice(2).timestamp);
        ev.clear();
        off(&mut a, 64, &mut ev);
        assert_eq!(ev.len(), 1);
        assert_eq!((ev[0].voice, ev[0].gate, ev[0].note), (1, false, 64));
        assert_eq!(a.gated_mask(), 0b101);
        assert_eq!(a.assigned_mask(), 0b111);
    }
    #[test]
    fn stealing_emits_one_stolen_gate_off() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        for note in 60..66 {
            on(&mut a, note, &mut ev);
        }
        ev.clear();
        on(&mut a, 70, &mut ev);
        let stolen: ArrayVec<&AssignerEvent, 6> = ev
            .iter()
            .filter(|e| e.flags.contains(AssignFlags::STOLEN))
            .collect();
        assert_eq!(stolen.len(), 1);
        assert_eq!((stolen[0].voice, stolen[0].note, stolen[0].gate), (0, 60, false));
        assert_eq!(ev.len(), 2);
        assert!(ev[1].gate && ev[1].voice == 0 && ev[1].note == 70);
    }
    #[test]
    fn steal_prefers_released_keys() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        for note in 60..66 {
            on(&mut a, note, &mut ev);
        }
        // 63's key is up but its voice is still releasing
        off(&mut a, 63, &mut ev);
        ev.clear();
        on(&mut a, 70, &mut ev);
        assert_eq!(a.assignment(3), Some(70));
        assert_eq!(ev[0].voice, 3);
        assert!(ev[0].flags.contains(AssignFlags::STOLEN));
    }
    #[test]
    fn low_and_high_priority_steals() {
        let mut a = VoiceAssigner::new();
        a.set_priority(Priority::Low);
        let mut ev = Events::new();
        for note in 60..66 {
            on(&mut a, note, &mut ev);
        }
        on(&mut a, 50, &mut ev);
        assert_eq!(a.assignment(5), Some(50));
        // nothing is higher priority than a low note, so 70 is dropped
        ev.clear();
        on(&mut a, 70, &mut ev);
        assert!(ev.is_empty());
        assert!((0..6).all(|v| a.assignment(v) != Some(70)));

        let mut a = VoiceAssigner::new();
        a.set_priority(Priority::High);
        for note in 60..66 {
            on(&mut a, note, &mut ev);
        }
        on(&mut a, 70, &mut ev);
        assert_eq!(a.assignment(0), Some(70));
        ev.clear();
        on(&mut a, 55, &mut ev);
        assert!(ev.is_empty());
    }
    #[test]
    fn free_voices_are_least_recently_used() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        for note in 60..66 {
            on(&mut a, note, &mut ev);
            a.tick();
        }
        off(&mut a, 62, &mut ev);
        off(&mut a, 61, &mut ev);
        a.voice_done(2);
        a.voice_done(1);
        // voice 1 was granted first, so it is the least recently used
        on(&mut a, 80, &mut ev);
        assert_eq!(a.assignment(1), Some(80));
        assert_eq!(a.assignment(2), None);
    }
    #[test]
    fn same_note_retriggers_in_place() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        on(&mut a, 60, &mut ev);
        on(&mut a, 62, &mut ev);
        off(&mut a, 60, &mut ev);
        ev.clear();
        on(&mut a, 60, &mut ev);
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].voice, 0);
        assert!(ev[0].flags.contains(AssignFlags::RETRIGGER));
        assert!(!ev[0].flags.contains(AssignFlags::STOLEN));
    }
    #[test]
    fn timestamps_survive_wrap() {
        let mut a = VoiceAssigner::new();
        a.clock = u32::MAX - 3;
        let mut ev = Events::new();
        for note in 60..66 {
            on(&mut a, note, &mut ev);
        }
        on(&mut a, 70, &mut ev);
        assert_eq!(a.assignment(0), Some(70));
    }
    #[test]
    fn mono_legato_and_restore() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::root(true), &mut ev);
        on(&mut a, 60, &mut ev);
        assert_eq!(a.assignment(0), Some(60));
        assert!(ev[0].flags.is_empty() || ev[0].flags == AssignFlags::KEYBOARD);
        ev.clear();
        on(&mut a, 67, &mut ev);
        assert_eq!(a.assignment(0), Some(67));
        assert_eq!(ev.len(), 1);
        assert!(ev[0].flags.contains(AssignFlags::LEGATO));
        assert!(a.voice(0).gated);
        ev.clear();
        off(&mut a, 67, &mut ev);
        assert_eq!(a.assignment(0), Some(60));
        assert_eq!(ev.len(), 1);
        assert!(ev[0].gate);
        assert!(ev[0].flags.contains(AssignFlags::RESTORED));
        assert!(!ev[0].flags.contains(AssignFlags::LEGATO));
        ev.clear();
        off(&mut a, 60, &mut ev);
        assert_eq!(ev.len(), 1);
        assert!(!ev[0].gate);
        assert_eq!(a.assigned_mask(), 1);
        assert_eq!(a.gated_mask(), 0);
    }
    #[test]
    fn mono_releasing_voice_is_retriggered() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::root(true), &mut ev);
        on(&mut a, 60, &mut ev);
        off(&mut a, 60, &mut ev);
        ev.clear();
        on(&mut a, 64, &mut ev);
        assert_eq!(ev.len(), 1);
        assert!(ev[0].gate);
        assert!(!ev[0].flags.intersects(AssignFlags::STOLEN | AssignFlags::LEGATO));
        ev.clear();
        on(&mut a, 67, &mut ev);
        assert_eq!(ev.len(), 1);
        assert!(ev[0].flags.contains(AssignFlags::LEGATO));
        assert_eq!(a.assignment(0), Some(67));
    }
    #[test]
    fn mono_legato_starts_voices_new_to_the_span() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::unison(2, true), &mut ev);
        on(&mut a, 60, &mut ev);
        assert_eq!(a.gated_mask(), 0b011);
        a.set_voice_mask(0b101, &mut ev);
        assert_eq!(a.gated_mask(), 0b001);
        ev.clear();
        on(&mut a, 64, &mut ev);
        assert_eq!(ev.len(), 2);
        assert_eq!(ev[0].voice, 0);
        assert!(ev[0].flags.contains(AssignFlags::LEGATO));
        assert_eq!(ev[1].voice, 2);
        assert!(ev[1].gate && !ev[1].flags.contains(AssignFlags::LEGATO));
        assert_eq!(a.assignment(2), Some(64));
        assert_eq!(a.gated_mask(), 0b101);
    }
    #[test]
    fn mono_low_priority() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_priority(Priority::Low);
        a.set_pattern(Pattern::root(true), &mut ev);
        on(&mut a, 60, &mut ev);
        ev.clear();
        on(&mut a, 64, &mut ev);
        // 64 loses to the held 60
        assert!(ev.is_empty());
        assert_eq!(a.assignment(0), Some(60));
        on(&mut a, 55, &mut ev);
        assert_eq!(a.assignment(0), Some(55));
        ev.clear();
        off(&mut a, 55, &mut ev);
        assert_eq!(a.assignment(0), Some(60));
        assert!(ev[0].flags.contains(AssignFlags::RESTORED));
        // releasing a note that is not sounding changes nothing
        ev.clear();
        off(&mut a, 64, &mut ev);
        assert!(ev.is_empty());
    }
    #[test]
    fn mono_last_uses_press_order() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::root(true), &mut ev);
        for note in [60, 72, 48] {
            on(&mut a, note, &mut ev);
        }
        off(&mut a, 48, &mut ev);
        assert_eq!(a.assignment(0), Some(72));
        off(&mut a, 72, &mut ev);
        assert_eq!(a.assignment(0), Some(60));
    }
    #[test]
    fn hold_pedal() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        on(&mut a, 60, &mut ev);
        on(&mut a, 64, &mut ev);
        a.hold_event(true, &mut ev);
        ev.clear();
        off(&mut a, 60, &mut ev);
        assert!(ev.is_empty());
        assert!(a.voice(0).gated);
        a.hold_event(false, &mut ev);
        assert_eq!(ev.len(), 1);
        assert_eq!((ev[0].voice, ev[0].gate), (0, false));
        assert!(a.voice(1).gated);
    }
    #[test]
    fn voice_mask() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        on(&mut a, 60, &mut ev);
        a.set_voice_mask(0b110, &mut ev);
        assert!(!a.voice(0).gated);
        on(&mut a, 62, &mut ev);
        on(&mut a, 64, &mut ev);
        on(&mut a, 65, &mut ev);
        // only voices 1 and 2 ever play
        assert!(ev.iter().filter(|e| e.gate).skip(1).all(|e| e.voice == 1 || e.voice == 2));
        assert_eq!(a.assignment(0), Some(60));
        a.set_voice_mask(0, &mut ev);
        assert_eq!(a.voice_mask(), 0b110);
    }
    #[test]
    fn unison_pattern() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::new(&[0, 7, 12], false), &mut ev);
        on(&mut a, 60, &mut ev);
        assert_eq!(a.assignment(0), Some(60));
        assert_eq!(a.assignment(1), Some(67));
        assert_eq!(a.assignment(2), Some(72));
        on(&mut a, 62, &mut ev);
        assert_eq!(a.assignment(3), Some(62));
        assert_eq!(a.assignment(5), Some(74));
        ev.clear();
        off(&mut a, 60, &mut ev);
        assert_eq!(ev.len(), 3);
        assert!(ev.iter().all(|e| !e.gate && e.voice < 3));
    }
    #[test]
    fn pattern_wraps_and_clamps() {
        let p = Pattern::new(&[0, 1, 2, 3, 4, 5, 6, 7], false);
        assert_eq!(p.offsets().len(), MAX_VOICES);
        assert_eq!(Pattern::new(&[], true).offsets(), &[0]);
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        a.set_pattern(Pattern::new(&[0, 24], false), &mut ev);
        on(&mut a, 120, &mut ev);
        assert_eq!(a.assignment(1), Some(127));
    }
    #[test]
    fn panic_frees_everything() {
        let mut a = VoiceAssigner::new();
        let mut ev = Events::new();
        on(&mut a, 60, &mut ev);
        on(&mut a, 64, &mut ev);
        ev.clear();
        a.panic_off(&mut ev);
        assert_eq!(ev.len(), 2);
        assert!(ev.iter().all(|e| e.flags.contains(AssignFlags::PANIC)));
        assert!(!a.any_assigned());
        assert!(!a.any_pressed());
    }
    #[test]
    fn note_state_queries() {
        let mut n = NoteState::default();
        assert_eq!(n.lowest(), None);
        n.set(0);
        n.set(127);
        n.set(64);
        assert_eq!(n.lowest(), Some(0));
        assert_eq!(n.highest(), Some(127));
        assert_eq!(n.count(), 3);
        n.clear(0);
        assert_eq!(n.lowest(), Some(64));
        assert!(n.contains(127));
    }
}
