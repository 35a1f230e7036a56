//! Frame-domain ADSR envelope.
//!
//! The envelope is a pure function of the frame offset since voice start and
//! the gate length, so voices can evaluate it sample-accurately anywhere in
//! a block without carrying phase state across blocks.

/// ADSR with times in frames. Sustain is a level, not a time.
#[derive(Debug, Clone, Copy)]
pub struct Adsr {
    pub attack: i64,
    pub decay: i64,
    pub sustain: f64,
    pub release: i64,
}

impl Adsr {
    pub fn from_seconds(
        attack: f64,
        decay: f64,
        sustain: f64,
        release: f64,
        sample_rate: f64,
    ) -> Self {
        let frames = |s: f64| {
            if s.is_finite() && s > 0.0 {
                (s * sample_rate) as i64
            } else {
                0
            }
        };
        Adsr {
            attack: frames(attack),
            decay: frames(decay),
            sustain: if sustain.is_finite() {
                sustain.clamp(0.0, 1.0)
            } else {
                1.0
            },
            release: frames(release),
        }
    }

    /// Shape while the gate is held.
    fn held_level(&self, t: i64) -> f64 {
        if t < 0 {
            0.0
        } else if t < self.attack {
            t as f64 / self.attack as f64
        } else if t < self.attack + self.decay {
            let progress = (t - self.attack) as f64 / self.decay as f64;
            1.0 + (self.sustain - 1.0) * progress
        } else {
            self.sustain
        }
    }

    /// Envelope level at frame offset `t` for a gate of `gate_len` frames.
    pub fn level(&self, t: i64, gate_len: i64) -> f64 {
        if t < 0 {
            return 0.0;
        }
        if t < gate_len {
            return self.held_level(t);
        }
        if self.release <= 0 {
            return 0.0;
        }
        let base = self.held_level(gate_len);
        let rel = t - gate_len;
        if rel >= self.release {
            0.0
        } else {
            base * (1.0 - rel as f64 / self.release as f64)
        }
    }

    /// Frame offset at which the envelope has fully released.
    pub fn finished_at(&self, gate_len: i64) -> i64 {
        gate_len + self.release
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0,
            decay: 0,
            sustain: 1.0,
            release: 0,
        }
    }
}
