//! Per-block waveform generators.
//!
//! Each oscillator fills a scratch slice and returns the phase to resume
//! from. Periodic kinds are pure functions of phase; noise kinds own a
//! seeded PRNG so that two instances built from the same seed produce
//! identical output. Supersaw keeps its own detuned phase bank and ignores
//! the caller's phase.

use std::f64::consts::{PI, TAU};

/// Number of detuned saws inside the supersaw.
const SUPERSAW_VOICES: usize = 7;

/// Relative detune per supersaw voice, spread around unity.
const SUPERSAW_DETUNE: [f64; SUPERSAW_VOICES] =
    [1.0, 0.9924, 1.0076, 0.9849, 1.0151, 0.9775, 1.0227];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscKind {
    Sine,
    Saw,
    Square,
    Triangle,
    Supersaw,
    White,
    Pink,
    Brown,
    Dust,
}

impl OscKind {
    /// Map a `sound`/`wave` token to an oscillator. `None` means the token
    /// names a sample, not a synth.
    pub fn from_name(name: &str) -> Option<OscKind> {
        match name {
            "sine" | "sin" => Some(OscKind::Sine),
            "saw" | "sawtooth" => Some(OscKind::Saw),
            "square" | "sq" | "pulse" => Some(OscKind::Square),
            "tri" | "triangle" => Some(OscKind::Triangle),
            "supersaw" => Some(OscKind::Supersaw),
            "white" | "noise" => Some(OscKind::White),
            "pink" => Some(OscKind::Pink),
            "brown" => Some(OscKind::Brown),
            "dust" | "crackle" => Some(OscKind::Dust),
            _ => None,
        }
    }
}

/// Single periodic sample at `phase` radians. Range [-1, 1].
pub fn wave_sample(kind: OscKind, phase: f64) -> f32 {
    match kind {
        OscKind::Sine => phase.sin() as f32,
        OscKind::Saw => {
            let t = (phase / TAU).rem_euclid(1.0);
            (2.0 * t - 1.0) as f32
        }
        OscKind::Square => {
            if phase.sin() >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        OscKind::Triangle => ((2.0 / PI) * phase.sin().asin()) as f32,
        // aperiodic kinds are handled by Oscillator::fill
        _ => 0.0,
    }
}

/// One oscillator instance owned by a voice.
pub struct Oscillator {
    kind: OscKind,
    rng: fastrand::Rng,
    supersaw_phases: [f64; SUPERSAW_VOICES],
    // Paul Kellet 7-pole pink filter state
    pink: [f32; 7],
    brown: f32,
}

impl Oscillator {
    pub fn new(kind: OscKind, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let supersaw_phases = std::array::from_fn(|_| rng.f64() * TAU);
        Oscillator {
            kind,
            rng,
            supersaw_phases,
            pink: [0.0; 7],
            brown: 0.0,
        }
    }

    pub fn kind(&self) -> OscKind {
        self.kind
    }

    /// Fill `buf` starting at `phase` with increment `phase_inc` per sample;
    /// returns the phase after the last sample. Noise kinds ignore phase.
    pub fn fill(&mut self, buf: &mut [f32], phase: f64, phase_inc: f64) -> f64 {
        match self.kind {
            OscKind::Sine | OscKind::Saw | OscKind::Square | OscKind::Triangle => {
                let mut p = phase;
                for s in buf.iter_mut() {
                    *s = wave_sample(self.kind, p);
                    p += phase_inc;
                }
                p.rem_euclid(TAU)
            }
            OscKind::Supersaw => {
                let norm = 1.0 / SUPERSAW_VOICES as f64;
                for s in buf.iter_mut() {
                    let mut sum = 0.0;
                    for (i, p) in self.supersaw_phases.iter_mut().enumerate() {
                        let t = (*p / TAU).rem_euclid(1.0);
                        sum += 2.0 * t - 1.0;
                        *p += phase_inc * SUPERSAW_DETUNE[i];
                    }
                    *s = (sum * norm) as f32;
                }
                phase
            }
            OscKind::White => {
                for s in buf.iter_mut() {
                    *s = self.white();
                }
                phase
            }
            OscKind::Pink => {
                for s in buf.iter_mut() {
                    *s = self.pink();
                }
                phase
            }
            OscKind::Brown => {
                for s in buf.iter_mut() {
                    *s = self.brown();
                }
                phase
            }
            OscKind::Dust => {
                // Impulse probability per sample tracks the requested
                // frequency: phase_inc/tau cycles per sample.
                let density = (phase_inc / TAU).clamp(0.0, 1.0);
                for s in buf.iter_mut() {
                    *s = if (self.rng.f64()) < density {
                        self.rng.f32() * 2.0 - 1.0
                    } else {
                        0.0
                    };
                }
                phase
            }
        }
    }

    fn white(&mut self) -> f32 {
        self.rng.f32() * 2.0 - 1.0
    }

    /// Paul Kellet's economy pink noise filter.
    fn pink(&mut self) -> f32 {
        let w = self.white();
        let b = &mut self.pink;
        b[0] = 0.99886 * b[0] + w * 0.0555179;
        b[1] = 0.99332 * b[1] + w * 0.0750759;
        b[2] = 0.96900 * b[2] + w * 0.1538520;
        b[3] = 0.86650 * b[3] + w * 0.3104856;
        b[4] = 0.55000 * b[4] + w * 0.5329522;
        b[5] = -0.7616 * b[5] - w * 0.0168980;
        let out = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + w * 0.5362;
        b[6] = w * 0.115926;
        out * 0.11
    }

    /// Leaky-integrated white noise.
    fn brown(&mut self) -> f32 {
        let w = self.white();
        self.brown = (self.brown + 0.02 * w) / 1.02;
        self.brown * 3.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_new(kind: OscKind, seed: u64, len: usize, inc: f64) -> Vec<f32> {
        let mut osc = Oscillator::new(kind, seed);
        let mut buf = vec![0.0; len];
        osc.fill(&mut buf, 0.0, inc);
        buf
    }

    #[test]
    fn sine_starts_at_zero_and_peaks() {
        let inc = TAU * 440.0 / 48_000.0;
        let buf = fill_new(OscKind::Sine, 0, 48_000 / 440, inc);
        assert!(buf[0].abs() < 1e-6);
        let peak = buf.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.99 && peak <= 1.0);
    }

    #[test]
    fn fill_resumes_phase_continuously() {
        let inc = TAU * 100.0 / 48_000.0;
        let mut osc = Oscillator::new(OscKind::Sine, 0);
        let mut whole = vec![0.0; 512];
        osc.fill(&mut whole, 0.0, inc);

        let mut osc2 = Oscillator::new(OscKind::Sine, 0);
        let mut parts = vec![0.0; 512];
        let mid = osc2.fill(&mut parts[..200], 0.0, inc);
        osc2.fill(&mut parts[200..], mid, inc);
        for (a, b) in whole.iter().zip(parts.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn waves_stay_in_range() {
        let inc = TAU * 700.0 / 48_000.0;
        for kind in [
            OscKind::Sine,
            OscKind::Saw,
            OscKind::Square,
            OscKind::Triangle,
            OscKind::Supersaw,
        ] {
            let buf = fill_new(kind, 7, 4096, inc);
            for s in &buf {
                assert!(s.abs() <= 1.000_001, "{kind:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn equal_seeds_produce_identical_noise() {
        for kind in [OscKind::White, OscKind::Pink, OscKind::Brown, OscKind::Dust] {
            let a = fill_new(kind, 1234, 1024, 0.05);
            let b = fill_new(kind, 1234, 1024, 0.05);
            assert_eq!(a, b, "{kind:?} not reproducible");
            let c = fill_new(kind, 4321, 1024, 0.05);
            assert_ne!(a, c, "{kind:?} ignores seed");
        }
    }

    #[test]
    fn dust_is_sparse() {
        let inc = TAU * 50.0 / 48_000.0; // ~50 impulses/sec at 48k
        let buf = fill_new(OscKind::Dust, 9, 48_000, inc);
        let nonzero = buf.iter().filter(|s| **s != 0.0).count();
        assert!(nonzero > 5 && nonzero < 500, "impulse count {nonzero}");
    }

    #[test]
    fn names_resolve() {
        assert_eq!(OscKind::from_name("sine"), Some(OscKind::Sine));
        assert_eq!(OscKind::from_name("supersaw"), Some(OscKind::Supersaw));
        assert_eq!(OscKind::from_name("bd"), None);
    }
}
