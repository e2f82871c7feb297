//! A scripted performance: timestamped MIDI bytes and preset edits.

use polycv::arp::ArpMode;
use polycv::assigner::Pattern;
use polycv::preset::Preset;

/// One scripted action
#[derive(Clone, Copy)]
pub enum Step {
    /// Raw MIDI bytes to parse and queue
    Midi(&'static [u8]),
    /// An edit to the current preset, which is then queued whole
    Preset(fn(&mut Preset)),
}

const SCRIPT: &[(u64, Step)] = &[
    // a C major chord, then a held pedal while it changes to F
    (0, Step::Midi(&[0x90, 60, 100])),
    (5, Step::Midi(&[0x90, 64, 90])),
    (10, Step::Midi(&[0x90, 67, 80])),
    (400, Step::Midi(&[0xB0, 64, 127])),
    (500, Step::Midi(&[0x80, 64, 0])),
    (500, Step::Midi(&[0x80, 67, 0])),
    (520, Step::Midi(&[0x90, 65, 100])),
    (520, Step::Midi(&[0x90, 69, 100])),
    (600, Step::Midi(&[0xB0, 1, 96])),
    (700, Step::Midi(&[0xE0, 0x00, 0x50])),
    (800, Step::Midi(&[0xD0, 70])),
    (900, Step::Midi(&[0xE0, 0x00, 0x40])),
    (1000, Step::Midi(&[0xB0, 64, 0])),
    (1000, Step::Midi(&[0x80, 60, 0])),
    (1000, Step::Midi(&[0x80, 65, 0])),
    (1000, Step::Midi(&[0x80, 69, 0])),
    // a mono unison lead with glide
    (1200, Step::Preset(|p| {
        p.voicing.pattern = Pattern::unison(3, true);
        p.voicing.glide_time = 0x4000;
    })),
    (1300, Step::Midi(&[0x90, 48, 110])),
    (1500, Step::Midi(&[0x90, 55, 110])),
    (1700, Step::Midi(&[0x80, 55, 0])),
    (1900, Step::Midi(&[0x80, 48, 0])),
    // the arpeggiator over a held chord
    (2100, Step::Preset(|p| {
        p.voicing.pattern = Pattern::root(false);
        p.arp.enabled = true;
        p.arp.mode = ArpMode::UpDown;
        p.arp.octaves = 2;
    })),
    (2200, Step::Midi(&[0x90, 57, 100])),
    (2200, Step::Midi(&[0x90, 60, 100])),
    (2200, Step::Midi(&[0x90, 64, 100])),
    (3500, Step::Midi(&[0xB0, 123, 0])),
    (3600, Step::Preset(|p| p.arp.enabled = false)),
];

/// Plays [SCRIPT] back against the simulated clock
#[derive(Default)]
pub struct Performance {
    next: usize,
}

impl Performance {
    pub fn new() -> Self {
        Default::default()
    }
    /// Steps due at or before `now_ms` that have not been played yet
    pub fn due(&mut self, now_ms: u64) -> impl Iterator<Item = Step> {
        let start = self.next;
        while self.next < SCRIPT.len() && SCRIPT[self.next].0 <= now_ms {
            self.next += 1;
        }
        SCRIPT[start..self.next].iter().map(|(_, step)| *step)
    }
}
