//! Per-voice filter stages.
//!
//! Every stage processes a scratch slice in place and keeps its own state
//! across blocks. Parameter updates sanitize their inputs (NaN and infinite
//! values fall back to defaults, cutoffs clamp below Nyquist) and state is
//! flushed of denormals so garbage can never be handed on to the orbit
//! delay and reverb lines.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type as BiquadType};
use std::f32::consts::TAU;

/// Zero out numbers too small to matter before they go denormal.
#[inline]
pub fn flush_denormal(x: f32) -> f32 {
    if x.abs() < 1.0e-20 {
        0.0
    } else {
        x
    }
}

fn sane_hz(hz: f32, fallback: f32, sample_rate: f32) -> f32 {
    if hz.is_finite() && hz > 0.0 {
        hz.min(sample_rate * 0.49)
    } else {
        fallback
    }
}

fn sane_q(q: f32) -> f32 {
    if q.is_finite() && q > 0.05 {
        q.min(40.0)
    } else {
        0.707
    }
}

/// A filter stage in a voice's chain.
pub trait Stage: Send {
    fn process(&mut self, buf: &mut [f32]);
}

// ── One-pole ────────────────────────────────────────────────────────────

pub struct OnePole {
    highpass: bool,
    coeff: f32,
    state: f32,
}

impl OnePole {
    pub fn lowpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        Self::new(false, cutoff_hz, sample_rate)
    }

    pub fn highpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        Self::new(true, cutoff_hz, sample_rate)
    }

    fn new(highpass: bool, cutoff_hz: f32, sample_rate: f32) -> Self {
        let hz = sane_hz(cutoff_hz, 1000.0, sample_rate);
        OnePole {
            highpass,
            coeff: (-TAU * hz / sample_rate).exp(),
            state: 0.0,
        }
    }
}

impl Stage for OnePole {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            self.state = flush_denormal(*s + self.coeff * (self.state - *s));
            *s = if self.highpass {
                *s - self.state
            } else {
                self.state
            };
        }
    }
}

// ── Chamberlin state-variable ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvfMode {
    Low,
    High,
    Band,
    Notch,
}

pub struct Svf {
    mode: SvfMode,
    f: f32,
    damp: f32,
    low: f32,
    band: f32,
}

impl Svf {
    pub fn new(mode: SvfMode, cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        let mut svf = Svf {
            mode,
            f: 0.0,
            damp: 0.0,
            low: 0.0,
            band: 0.0,
        };
        svf.retune(cutoff_hz, q, sample_rate);
        svf
    }

    /// Recompute coefficients and reset the integrators.
    pub fn retune(&mut self, cutoff_hz: f32, q: f32, sample_rate: f32) {
        let hz = sane_hz(cutoff_hz, 1000.0, sample_rate);
        self.f = 2.0 * (std::f32::consts::PI * hz / sample_rate).sin();
        self.damp = 1.0 / sane_q(q);
        self.low = 0.0;
        self.band = 0.0;
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        self.low += self.f * self.band;
        let high = input - self.low - self.damp * self.band;
        self.band += self.f * high;
        self.low = flush_denormal(self.low);
        self.band = flush_denormal(self.band);
        match self.mode {
            SvfMode::Low => self.low,
            SvfMode::High => high,
            SvfMode::Band => self.band,
            SvfMode::Notch => high + self.low,
        }
    }
}

impl Stage for Svf {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = self.tick(*s);
        }
    }
}

// ── Resonant biquad (the cutoff / hcutoff voice filters) ────────────────

pub struct BiquadStage {
    filter: DirectForm2Transposed<f32>,
}

impl BiquadStage {
    pub fn lowpass(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        Self::new(BiquadType::LowPass, cutoff_hz, q, sample_rate)
    }

    pub fn highpass(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        Self::new(BiquadType::HighPass, cutoff_hz, q, sample_rate)
    }

    fn new(kind: BiquadType<f32>, cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        let hz = sane_hz(cutoff_hz, 1000.0, sample_rate);
        let coeffs = Coefficients::<f32>::from_params(
            kind,
            sample_rate.hz(),
            hz.hz(),
            sane_q(q),
        )
        .unwrap_or_else(|_| {
            Coefficients::<f32>::from_params(
                BiquadType::LowPass,
                sample_rate.hz(),
                1000.0.hz(),
                0.707,
            )
            .expect("default biquad coefficients")
        });
        BiquadStage {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
        }
    }
}

impl Stage for BiquadStage {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = flush_denormal(self.filter.run(*s));
        }
    }
}

// ── Formant ─────────────────────────────────────────────────────────────

/// Vowel formant tables: (center Hz, gain dB) for three parallel bands.
fn vowel_bands(vowel: char) -> [(f32, f32); 3] {
    match vowel {
        'e' => [(400.0, 0.0), (1600.0, -12.0), (2700.0, -18.0)],
        'i' => [(250.0, 0.0), (1750.0, -24.0), (2600.0, -24.0)],
        'o' => [(400.0, 0.0), (750.0, -9.0), (2400.0, -24.0)],
        'u' => [(350.0, 0.0), (600.0, -18.0), (2700.0, -30.0)],
        _ => [(800.0, 0.0), (1150.0, -6.0), (2900.0, -24.0)], // 'a'
    }
}

pub struct Formant {
    bands: Vec<(Svf, f32)>,
    scratch: Vec<f32>,
}

impl Formant {
    pub fn vowel(vowel: char, sample_rate: f32) -> Self {
        let bands = vowel_bands(vowel)
            .into_iter()
            .map(|(hz, db)| {
                (
                    Svf::new(SvfMode::Band, hz, 6.0, sample_rate),
                    10f32.powf(db / 20.0),
                )
            })
            .collect();
        Formant {
            bands,
            scratch: Vec::new(),
        }
    }
}

impl Stage for Formant {
    fn process(&mut self, buf: &mut [f32]) {
        // Bands run in parallel from a copy of the input into a cleared
        // output, so later bands see the dry signal, not earlier bands.
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        buf.fill(0.0);
        for (svf, gain) in &mut self.bands {
            for (out, dry) in buf.iter_mut().zip(self.scratch.iter()) {
                *out += svf.tick(*dry) * *gain;
            }
        }
    }
}

// ── Bitcrush / sample-rate reduction ────────────────────────────────────

pub struct Bitcrush {
    levels: f32,
}

impl Bitcrush {
    pub fn new(bits: f32) -> Self {
        let bits = if bits.is_finite() {
            bits.clamp(1.0, 16.0)
        } else {
            16.0
        };
        Bitcrush {
            levels: 2f32.powf(bits),
        }
    }
}

impl Stage for Bitcrush {
    fn process(&mut self, buf: &mut [f32]) {
        let half = self.levels / 2.0;
        for s in buf.iter_mut() {
            *s = (*s * half).round() / half;
        }
    }
}

/// Zero-order hold: every `factor`-th sample is kept and repeated.
pub struct Coarse {
    factor: u32,
    held: f32,
    countdown: u32,
}

impl Coarse {
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor as u32
        } else {
            1
        };
        Coarse {
            factor,
            held: 0.0,
            countdown: 0,
        }
    }
}

impl Stage for Coarse {
    fn process(&mut self, buf: &mut [f32]) {
        if self.factor <= 1 {
            return;
        }
        for s in buf.iter_mut() {
            if self.countdown == 0 {
                self.held = *s;
                self.countdown = self.factor;
            }
            self.countdown -= 1;
            *s = self.held;
        }
    }
}

// ── Tremolo ─────────────────────────────────────────────────────────────

pub struct Tremolo {
    phase: f32,
    inc: f32,
    depth: f32,
}

impl Tremolo {
    pub fn new(rate_hz: f32, depth: f32, sample_rate: f32) -> Self {
        Tremolo {
            phase: 0.0,
            inc: TAU * sane_hz(rate_hz, 4.0, sample_rate) / sample_rate,
            depth: if depth.is_finite() {
                depth.clamp(0.0, 1.0)
            } else {
                0.5
            },
        }
    }
}

impl Stage for Tremolo {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            let lfo = 1.0 - self.depth * (0.5 + 0.5 * self.phase.sin());
            *s *= lfo;
            self.phase += self.inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

// ── Distortion ──────────────────────────────────────────────────────────

pub struct Distortion {
    drive: f32,
    norm: f32,
}

impl Distortion {
    pub fn new(drive: f32) -> Self {
        let drive = if drive.is_finite() {
            drive.clamp(0.01, 50.0)
        } else {
            1.0
        };
        Distortion {
            drive,
            norm: 1.0 / drive.tanh().max(0.1),
        }
    }
}

impl Stage for Distortion {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = (*s * self.drive).tanh() * self.norm;
        }
    }
}

// ── Phaser ──────────────────────────────────────────────────────────────

const PHASER_STAGES: usize = 6;

pub struct Phaser {
    allpass: [f32; PHASER_STAGES],
    lfo_phase: f32,
    lfo_inc: f32,
    depth: f32,
    feedback: f32,
    last: f32,
    sample_rate: f32,
}

impl Phaser {
    pub fn new(rate_hz: f32, depth: f32, sample_rate: f32) -> Self {
        Phaser {
            allpass: [0.0; PHASER_STAGES],
            lfo_phase: 0.0,
            lfo_inc: TAU * sane_hz(rate_hz, 0.5, sample_rate) / sample_rate,
            depth: if depth.is_finite() {
                depth.clamp(0.0, 1.0)
            } else {
                0.5
            },
            feedback: 0.5,
            last: 0.0,
            sample_rate,
        }
    }
}

impl Stage for Phaser {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            // LFO sweeps the all-pass corner between 200 Hz and 2 kHz
            let sweep = 200.0 + 1800.0 * (0.5 + 0.5 * self.lfo_phase.sin());
            let coeff = {
                let t = (std::f32::consts::PI * sweep / self.sample_rate).tan();
                (t - 1.0) / (t + 1.0)
            };
            let mut x = *s + self.last * self.feedback;
            for ap in self.allpass.iter_mut() {
                let y = coeff * x + *ap;
                *ap = flush_denormal(x - coeff * y);
                x = y;
            }
            self.last = flush_denormal(x);
            *s += x * self.depth;
            self.lfo_phase += self.lfo_inc;
            if self.lfo_phase >= TAU {
                self.lfo_phase -= TAU;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (TAU * freq * i as f32 / SR).sin())
            .collect()
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn one_pole_lowpass_attenuates_highs() {
        let mut lp = OnePole::lowpass(500.0, SR);
        let mut high = sine(8000.0, 4096);
        let before = rms(&high);
        lp.process(&mut high);
        assert!(rms(&high) < before * 0.25);

        let mut lp2 = OnePole::lowpass(500.0, SR);
        let mut low = sine(100.0, 4096);
        let before = rms(&low);
        lp2.process(&mut low);
        assert!(rms(&low) > before * 0.8);
    }

    #[test]
    fn svf_modes_shape_the_spectrum() {
        let mut lp = Svf::new(SvfMode::Low, 1000.0, 0.707, SR);
        let mut buf = sine(6000.0, 4096);
        let before = rms(&buf);
        lp.process(&mut buf);
        assert!(rms(&buf) < before * 0.3);

        let mut hp = Svf::new(SvfMode::High, 1000.0, 0.707, SR);
        let mut buf = sine(6000.0, 4096);
        let before = rms(&buf);
        hp.process(&mut buf);
        assert!(rms(&buf) > before * 0.7);
    }

    #[test]
    fn svf_retune_resets_integrators() {
        let mut svf = Svf::new(SvfMode::Low, 1000.0, 0.707, SR);
        let mut buf = sine(200.0, 512);
        svf.process(&mut buf);
        svf.retune(2000.0, 1.0, SR);
        assert_eq!(svf.low, 0.0);
        assert_eq!(svf.band, 0.0);
    }

    #[test]
    fn biquad_lowpass_passes_lows() {
        let mut bq = BiquadStage::lowpass(1000.0, 0.707, SR);
        let mut low = sine(100.0, 4096);
        let before = rms(&low);
        bq.process(&mut low);
        assert!(rms(&low) > before * 0.8);
    }

    #[test]
    fn insane_parameters_fall_back() {
        // NaN cutoff must not poison state
        let mut bq = BiquadStage::lowpass(f32::NAN, f32::INFINITY, SR);
        let mut buf = sine(440.0, 1024);
        bq.process(&mut buf);
        assert!(buf.iter().all(|s| s.is_finite()));

        let mut svf = Svf::new(SvfMode::Band, -10.0, f32::NAN, SR);
        let mut buf = sine(440.0, 1024);
        svf.process(&mut buf);
        assert!(buf.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn bitcrush_quantizes() {
        let mut crush = Bitcrush::new(2.0); // 4 levels
        let mut buf = sine(440.0, 1024);
        crush.process(&mut buf);
        let mut distinct: Vec<i32> = buf.iter().map(|s| (s * 100.0).round() as i32).collect();
        distinct.sort_unstable();
        distinct.dedup();
        assert!(distinct.len() <= 5, "levels: {}", distinct.len());
    }

    #[test]
    fn coarse_holds_samples() {
        let mut coarse = Coarse::new(4.0);
        let mut buf: Vec<f32> = (0..16).map(|i| i as f32).collect();
        coarse.process(&mut buf);
        assert_eq!(&buf[..8], &[0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn tremolo_modulates_amplitude() {
        let mut trem = Tremolo::new(8.0, 1.0, SR);
        let mut buf = vec![1.0f32; 48_000];
        trem.process(&mut buf);
        let min = buf.iter().fold(f32::MAX, |m, s| m.min(*s));
        let max = buf.iter().fold(f32::MIN, |m, s| m.max(*s));
        assert!(min < 0.05);
        assert!(max > 0.9);
    }

    #[test]
    fn distortion_is_bounded_and_hot() {
        let mut dist = Distortion::new(10.0);
        let mut buf = sine(440.0, 2048);
        dist.process(&mut buf);
        for s in &buf {
            assert!(s.abs() <= 10.0 / 0.1);
            assert!(s.is_finite());
        }
    }

    #[test]
    fn phaser_output_is_finite_and_alive() {
        let mut phaser = Phaser::new(1.0, 0.8, SR);
        let mut buf = sine(440.0, 48_000);
        let dry = buf.clone();
        phaser.process(&mut buf);
        assert!(buf.iter().all(|s| s.is_finite()));
        assert_ne!(buf, dry);
    }

    #[test]
    fn formant_output_is_finite() {
        for vowel in ['a', 'e', 'i', 'o', 'u'] {
            let mut f = Formant::vowel(vowel, SR);
            let mut buf = sine(110.0, 4096);
            f.process(&mut buf);
            assert!(buf.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn denormals_are_flushed() {
        assert_eq!(flush_denormal(1.0e-30), 0.0);
        assert_eq!(flush_denormal(0.5), 0.5);
        assert_eq!(flush_denormal(-1.0e-30), 0.0);
    }
}
