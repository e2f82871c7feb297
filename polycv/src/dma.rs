//! The DAC command stream and the double buffered DMA pipeline that carries it.
//!
//! Every DAC write is a 32 bit word: a channel tag in the top half and the
//! value in the bottom half.  A [Frame] holds one output sample period: the
//! audio sample of every oscillator followed by a few slots of multiplexed CV
//! writes.  CVs change at the CV rate but there are far more of them than
//! slots, so [CvMux] queues them and hands them out round robin.

use heapless::Deque;

use crate::assigner::MAX_VOICES;

/// Oscillators per voice
pub const OSCS_PER_VOICE: usize = 2;
/// Multiplexed CV slots in each frame
pub const CV_SLOTS_PER_FRAME: usize = 4;
/// Words in each frame
pub const FRAME_WORDS: usize = MAX_VOICES * OSCS_PER_VOICE + CV_SLOTS_PER_FRAME;
/// Pending CV writes the multiplexer can hold
pub const CV_QUEUE_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
/// The CV outputs of each voice
pub enum VoiceCv {
    /// Oscillator A pitch
    PitchA,
    /// Oscillator B pitch
    PitchB,
    /// Filter cutoff
    Cutoff,
    /// Filter resonance
    Resonance,
    /// VCA level
    Amp,
    /// Noise level
    Noise,
    /// WaveMod amount
    WaveMod,
}

impl VoiceCv {
    const ELEM: [VoiceCv; 7] = [
        Self::PitchA,
        Self::PitchB,
        Self::Cutoff,
        Self::Resonance,
        Self::Amp,
        Self::Noise,
        Self::WaveMod,
    ];
    /// Every voice CV, in output order
    pub const fn cvs() -> &'static [VoiceCv] {
        &Self::ELEM
    }
    /// Try to create a VoiceCv from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
/// CV outputs shared by every voice
pub enum GlobalCv {
    /// Global LFO 1, unipolar
    Lfo1,
    /// Global LFO 2, unipolar
    Lfo2,
    /// Mod wheel
    ModWheel,
}

impl GlobalCv {
    const ELEM: [GlobalCv; 3] = [Self::Lfo1, Self::Lfo2, Self::ModWheel];
    /// Every global CV, in output order
    pub const fn cvs() -> &'static [GlobalCv] {
        &Self::ELEM
    }
    /// Try to create a GlobalCv from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
}

/// A DAC destination
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DacChannel {
    /// Padding; the DAC ignores it
    #[default]
    Nop,
    /// Audio output of one oscillator
    Audio {
        /// Voice index
        voice: u8,
        /// 0 for A, 1 for B
        osc: u8,
    },
    /// A per-voice CV
    Voice {
        /// Voice index
        voice: u8,
        /// Which CV
        cv: VoiceCv,
    },
    /// A global CV
    Global(GlobalCv),
}

const TAG_AUDIO: u16 = 0x0100;
const TAG_VOICE: u16 = 0x0200;
const TAG_GLOBAL: u16 = 0x0300;

impl DacChannel {
    /// The 16 bit tag for this channel
    pub const fn tag(&self) -> u16 {
        match *self {
            Self::Nop => 0,
            Self::Audio { voice, osc } => TAG_AUDIO | ((voice as u16) << 1) | (osc as u16 & 1),
            Self::Voice { voice, cv } => TAG_VOICE | ((voice as u16) << 4) | cv as u16,
            Self::Global(cv) => TAG_GLOBAL | cv as u16,
        }
    }
    /// Decode a tag.  Unknown tags decode as [DacChannel::Nop].
    pub const fn from_tag(tag: u16) -> Self {
        let low = (tag & 0xFF) as u8;
        match tag & 0xFF00 {
            TAG_AUDIO => Self::Audio {
                voice: low >> 1,
                osc: low & 1,
            },
            TAG_VOICE => match VoiceCv::new_from_u8(low & 0xF) {
                Some(cv) => Self::Voice { voice: low >> 4, cv },
                None => Self::Nop,
            },
            TAG_GLOBAL => match GlobalCv::new_from_u8(low) {
                Some(cv) => Self::Global(cv),
                None => Self::Nop,
            },
            _ => Self::Nop,
        }
    }
}

/// One tagged DAC write
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DacWord(pub u32);

impl DacWord {
    /// The padding word
    pub const NOP: Self = Self(0);
    /// Tag a value for a channel
    pub const fn new(channel: DacChannel, value: u16) -> Self {
        Self(((channel.tag() as u32) << 16) | value as u32)
    }
    /// The destination
    pub const fn channel(&self) -> DacChannel {
        DacChannel::from_tag((self.0 >> 16) as u16)
    }
    /// The value
    pub const fn value(&self) -> u16 {
        self.0 as u16
    }
}

/// One output sample period of DAC writes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Frame {
    /// Oscillator words first (voice major, A then B), then the CV slots
    pub words: [DacWord; FRAME_WORDS],
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            words: [DacWord::NOP; FRAME_WORDS],
        }
    }
}

impl Frame {
    /// Word index of an oscillator's audio sample
    pub const fn audio_index(voice: usize, osc: usize) -> usize {
        voice * OSCS_PER_VOICE + osc
    }
    /// The multiplexed CV slots
    pub fn cv_slots(&self) -> &[DacWord] {
        &self.words[MAX_VOICES * OSCS_PER_VOICE..]
    }
}

/// Queues CV writes and spreads them over frame slots.
///
/// A channel is queued at most once: writing a channel that is already
/// waiting just updates the pending value, so the queue cannot grow beyond
/// the number of channels and every channel gets its turn.
#[derive(Clone, Debug, Default)]
pub struct CvMux {
    queue: Deque<DacWord, CV_QUEUE_LEN>,
}

impl CvMux {
    /// Constructor
    pub fn new() -> Self {
        Default::default()
    }
    /// Queue a CV write.  Returns false if the queue was full.
    pub fn write(&mut self, channel: DacChannel, value: u16) -> bool {
        let word = DacWord::new(channel, value);
        let tag = word.0 >> 16;
        if let Some(pending) = self.queue.iter_mut().find(|w| w.0 >> 16 == tag) {
            *pending = word;
            return true;
        }
        self.queue.push_back(word).is_ok()
    }
    /// Writes waiting for a slot
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
    /// Fill a frame's CV slots, padding with [DacWord::NOP]
    pub fn fill(&mut self, frame: &mut Frame) {
        for slot in frame.words[MAX_VOICES * OSCS_PER_VOICE..].iter_mut() {
            *slot = self.queue.pop_front().unwrap_or(DacWord::NOP);
        }
    }
}

/// Two halves of `FRAMES` frames each.  DMA drains one half while the
/// engine fills the other.
#[derive(Clone, Debug)]
pub struct DmaPipeline<const FRAMES: usize> {
    halves: [[Frame; FRAMES]; 2],
    draining: usize,
    refilled: bool,
    overruns: u32,
}

impl<const FRAMES: usize> Default for DmaPipeline<FRAMES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const FRAMES: usize> DmaPipeline<FRAMES> {
    /// Both halves silent, DMA on half 0
    pub fn new() -> Self {
        Self {
            halves: [[Frame::default(); FRAMES]; 2],
            draining: 0,
            refilled: true,
            overruns: 0,
        }
    }
    /// The half DMA is reading
    pub fn draining(&self) -> &[Frame; FRAMES] {
        &self.halves[self.draining]
    }
    /// Index of the half DMA is reading
    pub fn draining_index(&self) -> usize {
        self.draining
    }
    /// Half transfer complete: DMA moves on to the other half and the half
    /// it just finished is returned for refilling.
    pub fn half_complete(&mut self) -> &mut [Frame; FRAMES] {
        if !self.refilled {
            self.overruns = self.overruns.wrapping_add(1);
        }
        self.refilled = false;
        let done = self.draining;
        self.draining ^= 1;
        &mut self.halves[done]
    }
    /// Mark the refill of the last returned half finished
    pub fn refill_done(&mut self) {
        self.refilled = true;
    }
    /// Half transfers that arrived before the previous refill finished
    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_decode() {
        let channels = [
            DacChannel::Nop,
            DacChannel::Audio { voice: 5, osc: 1 },
            DacChannel::Voice {
                voice: 3,
                cv: VoiceCv::WaveMod,
            },
            DacChannel::Global(GlobalCv::Lfo2),
        ];
        for ch in channels {
            let word = DacWord::new(ch, 0x1234);
            assert_eq!(word.channel(), ch);
            assert_eq!(word.value(), 0x1234);
        }
        assert_eq!(DacChannel::from_tag(0x0207), DacChannel::Nop);
        assert_eq!(DacChannel::from_tag(0x7700), DacChannel::Nop);
    }
    #[test]
    fn mux_is_round_robin() {
        let mut mux = CvMux::new();
        let ch = |voice| DacChannel::Voice {
            voice,
            cv: VoiceCv::Cutoff,
        };
        for v in 0..6 {
            assert!(mux.write(ch(v), v as u16));
        }
        // rewriting a waiting channel keeps its place
        mux.write(ch(0), 100);
        assert_eq!(mux.pending(), 6);
        let mut frame = Frame::default();
        mux.fill(&mut frame);
        let values: Vec<u16> = frame.cv_slots().iter().map(|w| w.value()).collect();
        assert_eq!(values, [100, 1, 2, 3]);
        mux.fill(&mut frame);
        assert_eq!(frame.cv_slots()[0].value(), 4);
        assert_eq!(frame.cv_slots()[1].value(), 5);
        assert_eq!(frame.cv_slots()[2], DacWord::NOP);
    }
    #[test]
    fn halves_alternate() {
        let mut dma = DmaPipeline::<4>::new();
        assert_eq!(dma.draining_index(), 0);
        let half = dma.half_complete();
        half[0].words[0] = DacWord(7);
        dma.refill_done();
        assert_eq!(dma.draining_index(), 1);
        dma.half_complete();
        dma.refill_done();
        assert_eq!(dma.draining()[0].words[0], DacWord(7));
        assert_eq!(dma.overruns(), 0);
        dma.half_complete();
        dma.half_complete();
        assert_eq!(dma.overruns(), 1);
    }
}
