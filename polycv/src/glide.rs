//! Portamento for pitch and cutoff CVs, stepped once per tick.

use serde::{Deserialize, Serialize};

use crate::context::TICK_PHASES;
use crate::devices::time_increment;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
/// When glide is applied
pub enum GlideMode {
    /// Jump straight to every new note
    #[default]
    Off,
    /// Glide to every new note
    Always,
    /// Glide only between overlapping (legato) notes
    Legato,
}

impl GlideMode {
    const ELEM: [GlideMode; 3] = [Self::Off, Self::Always, Self::Legato];
    /// Returns a slice to all of the possible modes
    pub const fn modes() -> &'static [GlideMode] {
        &Self::ELEM
    }
    /// Display name
    pub const fn to_str(&self) -> &'static str {
        ["Off", "Always", "Legato"][*self as usize]
    }
    /// Try to create a GlideMode from a u8
    pub const fn new_from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ELEM.len() {
            Some(Self::ELEM[value as usize])
        } else {
            None
        }
    }
    /// Should a transition glide?
    pub const fn applies(&self, legato: bool) -> bool {
        match self {
            Self::Off => false,
            Self::Always => true,
            Self::Legato => legato,
        }
    }
}

impl TryFrom<u8> for GlideMode {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, &'static str> {
        Self::new_from_u8(value).ok_or("Conversion of u8 to GlideMode Overflowed")
    }
}

/// Per tick step, in CV units with 16 fractional bits, for a time CV.  The
/// time CV sets how long the glide takes to cover one octave (4096 units).
pub fn glide_step(time: u16) -> u32 {
    // 4096 << 16 units per octave, over 2^24 / (increment * TICK_PHASES) ticks
    time_increment(time, 0).saturating_mul(TICK_PHASES * 16)
}

/// A slew limiter that walks a 16 bit CV towards its target
#[derive(Clone, Copy, Debug, Default)]
pub struct Glide {
    current: u32,
    target: u16,
}

impl Glide {
    /// Constructor
    pub const fn new() -> Self {
        Self {
            current: 0,
            target: 0,
        }
    }
    /// Set a new target.  Without `glide` the output jumps there.
    pub fn set_target(&mut self, target: u16, glide: bool) {
        self.target = target;
        if !glide {
            self.current = (target as u32) << 16;
        }
    }
    /// The target CV
    pub fn target(&self) -> u16 {
        self.target
    }
    /// The current CV
    pub fn value(&self) -> u16 {
        (self.current >> 16) as u16
    }
    /// True once the output has reached the target
    pub fn settled(&self) -> bool {
        self.current == (self.target as u32) << 16
    }
    /// Move one tick towards the target
    pub fn step(&mut self, time: u16) -> u16 {
        let target = (self.target as u32) << 16;
        let step = glide_step(time);
        self.current = if self.current < target {
            self.current.saturating_add(step).min(target)
        } else {
            self.current.saturating_sub(step).max(target)
        };
        self.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TICK_HZ;

    #[test]
    fn mode_conversions() {
        assert_eq!(GlideMode::try_from(2), Ok(GlideMode::Legato));
        assert!(GlideMode::try_from(3).is_err());
        assert!(!GlideMode::Legato.applies(false));
        assert!(GlideMode::Always.applies(false));
    }
    #[test]
    fn jump_without_glide() {
        let mut g = Glide::new();
        g.set_target(0x4000, false);
        assert_eq!(g.value(), 0x4000);
        assert!(g.settled());
    }
    #[test]
    fn glide_takes_time_cv_per_octave() {
        let mut g = Glide::new();
        g.set_target(0x1000, false);
        g.set_target(0x2000, true);
        let time = 0x8000;
        // 2^24 / (increment * 8) ticks to cover the octave
        let expected = (1u32 << 24) / (time_increment(time, 0) * TICK_PHASES);
        let mut ticks = 0;
        let mut last = g.value();
        while !g.settled() {
            let v = g.step(time);
            assert!(v >= last);
            last = v;
            ticks += 1;
            assert!(ticks < TICK_HZ * 100);
        }
        assert!(ticks.abs_diff(expected) <= 1, "{} vs {}", ticks, expected);
        assert_eq!(g.value(), 0x2000);
    }
    #[test]
    fn glide_down_does_not_overshoot() {
        let mut g = Glide::new();
        g.set_target(0xFFFF, false);
        g.set_target(0x0010, true);
        for _ in 0..10_000 {
            g.step(0);
        }
        assert_eq!(g.value(), 0x0010);
    }
}
