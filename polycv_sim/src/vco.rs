//! Simulated analog oscillators for exercising the tuner.
//!
//! Each VCO follows an exponential response with its own scale and offset
//! error.  The last one stops oscillating near the top of its range so the
//! tuner has to extrapolate.

use polycv::assigner::MAX_VOICES;
use polycv::tuner::{Measurement, TuneProbe, ZeroCrossingCounter, NOMINAL_CV_PER_OCTAVE};

/// C1, the frequency of an ideal VCO at code zero
const BASE_HZ: f64 = 32.703;
/// Samples captured per measurement
const CAPTURE_SAMPLES: usize = 12000;

#[derive(Clone, Copy, Debug)]
struct Vco {
    /// Octaves per nominal octave of CV
    scale: f64,
    /// Frequency ratio at code zero
    offset: f64,
    /// Codes above this produce silence
    dead_above: u16,
}

impl Vco {
    fn frequency(&self, cv: u16) -> Option<f64> {
        if cv > self.dead_above {
            return None;
        }
        let octaves = cv as f64 * self.scale / NOMINAL_CV_PER_OCTAVE as f64;
        Some(BASE_HZ * self.offset * octaves.exp2())
    }
}

pub struct VcoBank {
    sample_rate: u32,
    vcos: [Vco; MAX_VOICES],
    cv: [u16; MAX_VOICES],
    buffer: Vec<u16>,
}

impl VcoBank {
    pub fn new(sample_rate: u32) -> Self {
        let mut vcos = [Vco {
            scale: 1.0,
            offset: 1.0,
            dead_above: u16::MAX,
        }; MAX_VOICES];
        for (i, vco) in vcos.iter_mut().enumerate() {
            vco.scale = 0.97 + 0.012 * i as f64;
            vco.offset = 0.98 + 0.008 * i as f64;
        }
        vcos[MAX_VOICES - 1].dead_above = 0xD000;
        Self {
            sample_rate,
            vcos,
            cv: [0; MAX_VOICES],
            buffer: vec![0; CAPTURE_SAMPLES],
        }
    }
}

impl TuneProbe for VcoBank {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn set_cv(&mut self, voice: usize, cv: u16) {
        if let Some(c) = self.cv.get_mut(voice) {
            *c = cv;
        }
    }
    fn measure(&mut self, voice: usize) -> Option<Measurement> {
        let vco = self.vcos.get(voice)?;
        let freq = vco.frequency(self.cv[voice])?;
        let step = core::f64::consts::TAU * freq / self.sample_rate as f64;
        for (n, s) in self.buffer.iter_mut().enumerate() {
            let x = (n as f64 * step).sin();
            *s = (0x8000 as f64 + x * 0x7000 as f64) as u16;
        }
        let mut counter = ZeroCrossingCounter::new(0x800);
        counter.feed(&self.buffer);
        counter.measurement()
    }
}
