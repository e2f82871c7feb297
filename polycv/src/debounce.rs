//! Counter based debouncing of the 8 bit digital input port.

use bitflags::bitflags;

bitflags! {
    /// Bits of the digital input port
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DigitalInputs: u8 {
        /// Sustain/hold pedal
        const HOLD_PEDAL = 1 << 0;
        /// External clock input
        const CLOCK_IN = 1 << 1;
        /// Spare inputs
        const AUX = 0b1111_1100;
    }
}

/// Consecutive samples an input must disagree with its stable state before
/// the change is accepted
pub const DEBOUNCE_SAMPLES: u8 = 3;

/// Stable transitions seen during one update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Edges {
    /// Inputs that went high
    pub rising: DigitalInputs,
    /// Inputs that went low
    pub falling: DigitalInputs,
}

/// Debounces every bit of the input port independently
#[derive(Clone, Debug, Default)]
pub struct Debouncer {
    stable: u8,
    counters: [u8; 8],
}

impl Debouncer {
    /// Constructor, with every input low
    pub const fn new() -> Self {
        Self {
            stable: 0,
            counters: [0; 8],
        }
    }
    /// The debounced state
    pub fn state(&self) -> DigitalInputs {
        DigitalInputs::from_bits_retain(self.stable)
    }
    /// Sample the raw port and report stable edges
    pub fn update(&mut self, raw: u8) -> Edges {
        let mut rising = 0u8;
        let mut falling = 0u8;
        for (bit, counter) in self.counters.iter_mut().enumerate() {
            let mask = 1u8 << bit;
            if (raw ^ self.stable) & mask == 0 {
                *counter = 0;
                continue;
            }
            *counter += 1;
            if *counter >= DEBOUNCE_SAMPLES {
                *counter = 0;
                self.stable ^= mask;
                if self.stable & mask != 0 {
                    rising |= mask;
                } else {
                    falling |= mask;
                }
            }
        }
        Edges {
            rising: DigitalInputs::from_bits_retain(rising),
            falling: DigitalInputs::from_bits_retain(falling),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounces_are_ignored() {
        let mut d = Debouncer::new();
        for raw in [1, 0, 1, 0, 1, 1] {
            let e = d.update(raw);
            assert!(e.rising.is_empty());
        }
        let e = d.update(1);
        assert_eq!(e.rising, DigitalInputs::HOLD_PEDAL);
        assert!(d.state().contains(DigitalInputs::HOLD_PEDAL));
    }
    #[test]
    fn independent_bits() {
        let mut d = Debouncer::new();
        let mut rises = DigitalInputs::empty();
        for _ in 0..DEBOUNCE_SAMPLES {
            rises |= d.update(0b11).rising;
        }
        assert_eq!(rises, DigitalInputs::HOLD_PEDAL | DigitalInputs::CLOCK_IN);
        let mut falls = DigitalInputs::empty();
        for _ in 0..DEBOUNCE_SAMPLES {
            falls |= d.update(0b01).falling;
        }
        assert_eq!(falls, DigitalInputs::CLOCK_IN);
        assert_eq!(d.state(), DigitalInputs::HOLD_PEDAL);
    }
}
