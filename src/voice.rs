//! Voices: one in-flight sounding instance, synth or sample.
//!
//! A `VoiceSpec` is the decoded description of a voice; promotion turns it
//! into a `Voice` with live DSP state. Per block a voice fills the shared
//! scratchpad from its source, runs its filter chain in place, then mixes
//! into its orbit with a sample-accurate start offset, envelope level, and
//! equal-power pan. Everything a voice touches is owned by the audio thread
//! and handed down through `RenderCtx` - no globals.

use crate::envelope::Adsr;
use crate::filters::Stage;
use crate::orbit::{OrbitBank, ORBIT_COUNT};
use crate::osc::{wave_sample, OscKind, Oscillator};
use crate::ringlink::{LoadedSample, SampleRequest};
use std::f64::consts::{FRAC_PI_4, TAU};
use std::sync::Arc;

/// Sample playback rate bounds.
const RATE_MIN: f64 = 0.125;
const RATE_MAX: f64 = 8.0;

/// Shared per-block render state, built once by the audio thread.
pub struct RenderCtx {
    pub scratch: Vec<f32>,
    pub block_start: i64,
    pub block_frames: usize,
    pub sample_rate: f64,
}

impl RenderCtx {
    pub fn new(block_frames: usize, sample_rate: f64) -> Self {
        RenderCtx {
            scratch: vec![0.0; block_frames],
            block_start: 0,
            block_frames,
            sample_rate,
        }
    }
}

/// What a voice sounds like, before PCM resolution.
pub enum SourceSpec {
    Synth {
        kind: OscKind,
        freq_hz: f64,
    },
    Sample {
        req: SampleRequest,
        /// Target pitch; `None` plays the recording at its own pitch.
        target_hz: Option<f64>,
        speed: f64,
        /// `unit = "c"`: stretch playback so the sample spans the event.
        cycle_unit: bool,
    },
}

/// Decoded per-voice parameters. Produced by the event decoder, consumed at
/// promotion time.
pub struct VoiceSpec {
    pub source: SourceSpec,
    pub orbit: usize,
    pub gain: f64,
    pub pan: f64,
    pub adsr: Adsr,
    /// Samples without an explicit envelope hold until their end frame.
    pub hold_to_end: bool,
    pub filters: Vec<Box<dyn Stage>>,
    pub delay_amount: f64,
    pub delay_time: Option<f64>,
    pub delay_feedback: Option<f64>,
    pub reverb_room: Option<f64>,
    pub reverb_size: Option<f64>,
    pub vib_rate: f64,
    pub vib_depth: f64,
}

impl VoiceSpec {
    pub fn sample_request(&self) -> Option<&SampleRequest> {
        match &self.source {
            SourceSpec::Sample { req, .. } => Some(req),
            SourceSpec::Synth { .. } => None,
        }
    }

    /// Promote to a live voice. Sample specs need their PCM; `None` there
    /// means the caller must drop the voice.
    pub fn into_voice(
        self,
        start_frame: i64,
        gate_end_frame: i64,
        end_frame: i64,
        sample: Option<&LoadedSample>,
        sample_rate: f64,
    ) -> Option<Voice> {
        let source = match self.source {
            SourceSpec::Synth { kind, freq_hz } => {
                // seed from the start frame so a re-render is identical
                let osc = Oscillator::new(kind, start_frame as u64 ^ 0x9E3779B97F4A7C15);
                Source::Synth {
                    osc,
                    phase: 0.0,
                    phase_inc: TAU * freq_hz / sample_rate,
                }
            }
            SourceSpec::Sample {
                target_hz,
                speed,
                cycle_unit,
                ..
            } => {
                let sample = sample?;
                let pitch_ratio = match target_hz {
                    Some(hz) if sample.pitch_hz > 0.0 => hz / sample.pitch_hz,
                    _ => 1.0,
                };
                let mut rate =
                    (sample.sample_rate as f64 / sample_rate) * pitch_ratio * speed.abs();
                if cycle_unit {
                    let event_frames = (gate_end_frame - start_frame).max(1) as f64;
                    rate = (sample.pcm.len() as f64 / event_frames) * speed.abs();
                }
                Source::Sample {
                    pcm: Arc::clone(&sample.pcm),
                    rate: rate.clamp(RATE_MIN, RATE_MAX),
                    playhead: 0.0,
                    consumed: false,
                }
            }
        };
        let env_gate = if self.hold_to_end {
            end_frame - start_frame
        } else {
            gate_end_frame - start_frame
        };
        Some(Voice {
            start_frame,
            end_frame,
            env_gate,
            orbit: self.orbit.min(ORBIT_COUNT - 1),
            gain: self.gain,
            pan: self.pan.clamp(-1.0, 1.0),
            adsr: self.adsr,
            filters: self.filters,
            delay_amount: self.delay_amount,
            delay_time: self.delay_time,
            delay_feedback: self.delay_feedback,
            reverb_room: self.reverb_room,
            reverb_size: self.reverb_size,
            vib_rate: self.vib_rate,
            vib_depth: self.vib_depth,
            vib_phase: 0.0,
            source,
        })
    }
}

enum Source {
    Synth {
        osc: Oscillator,
        phase: f64,
        phase_inc: f64,
    },
    Sample {
        pcm: Arc<Vec<f32>>,
        rate: f64,
        playhead: f64,
        consumed: bool,
    },
}

/// A live voice, mutated only by the render thread.
pub struct Voice {
    pub start_frame: i64,
    pub end_frame: i64,
    env_gate: i64,
    orbit: usize,
    gain: f64,
    pan: f64,
    adsr: Adsr,
    filters: Vec<Box<dyn Stage>>,
    delay_amount: f64,
    delay_time: Option<f64>,
    delay_feedback: Option<f64>,
    reverb_room: Option<f64>,
    reverb_size: Option<f64>,
    vib_rate: f64,
    vib_depth: f64,
    vib_phase: f64,
    source: Source,
}

impl Voice {
    /// Render this voice's slice of the current block into its orbit.
    /// Returns `true` while the voice should stay active.
    pub fn render(&mut self, ctx: &mut RenderCtx, orbits: &mut OrbitBank) -> bool {
        let block_start = ctx.block_start;
        let block_frames = ctx.block_frames as i64;
        let block_end = block_start + block_frames;

        let offset = (self.start_frame - block_start).max(0);
        if offset < block_frames {
            let length = (block_frames - offset)
                .min(self.end_frame - (block_start + offset))
                .max(0) as usize;
            if length > 0 {
                self.render_slice(ctx, orbits, offset as usize, length);
            }
        }

        let consumed = matches!(
            self.source,
            Source::Sample { consumed: true, .. }
        );
        let env_done = (block_end - self.start_frame) >= self.adsr.finished_at(self.env_gate);
        !(consumed || env_done || block_end >= self.end_frame)
    }

    fn render_slice(
        &mut self,
        ctx: &mut RenderCtx,
        orbits: &mut OrbitBank,
        offset: usize,
        length: usize,
    ) {
        let scratch = &mut ctx.scratch[..length];

        // 1. source fill
        match &mut self.source {
            Source::Synth {
                osc,
                phase,
                phase_inc,
            } => {
                let periodic = matches!(
                    osc.kind(),
                    OscKind::Sine | OscKind::Saw | OscKind::Square | OscKind::Triangle
                );
                if self.vib_depth > 0.0 && periodic {
                    let vib_inc = TAU * self.vib_rate / ctx.sample_rate;
                    let mut p = *phase;
                    for s in scratch.iter_mut() {
                        *s = wave_sample(osc.kind(), p);
                        p += *phase_inc * (1.0 + self.vib_phase.sin() * self.vib_depth);
                        self.vib_phase += vib_inc;
                    }
                    *phase = p.rem_euclid(TAU);
                    self.vib_phase = self.vib_phase.rem_euclid(TAU);
                } else {
                    *phase = osc.fill(scratch, *phase, *phase_inc);
                }
            }
            Source::Sample {
                pcm,
                rate,
                playhead,
                consumed,
            } => {
                for s in scratch.iter_mut() {
                    let i0 = *playhead as usize;
                    if i0 + 1 >= pcm.len() {
                        *consumed = true;
                        *s = 0.0;
                    } else {
                        let frac = (*playhead - i0 as f64) as f32;
                        *s = pcm[i0] * (1.0 - frac) + pcm[i0 + 1] * frac;
                        *playhead += *rate;
                    }
                }
            }
        }

        // 2. filter chain, in order, in place
        for stage in &mut self.filters {
            stage.process(scratch);
        }

        // 3. orbit parameter updates land at block granularity
        let cell = orbits.cell(self.orbit);
        if self.delay_time.is_some() || self.delay_feedback.is_some() {
            cell.set_delay_params(self.delay_time, self.delay_feedback);
        }
        if self.reverb_room.is_some() || self.reverb_size.is_some() {
            cell.set_reverb_params(self.reverb_room, self.reverb_size);
        }

        // 4. envelope, equal-power pan, mix + delay send
        let angle = (self.pan + 1.0) * FRAC_PI_4;
        let gain_l = angle.cos() * self.gain;
        let gain_r = angle.sin() * self.gain;
        let send_gain = self.delay_amount;
        if send_gain > 0.0 {
            cell.mark_send();
        }
        let base_t = ctx.block_start + offset as i64 - self.start_frame;
        for (i, s) in scratch.iter().enumerate() {
            let level = self.adsr.level(base_t + i as i64, self.env_gate);
            let wet = *s as f64 * level;
            let j = offset + i;
            cell.mix.left[j] += wet * gain_l;
            cell.mix.right[j] += wet * gain_r;
            if send_gain > 0.0 {
                cell.send.left[j] += wet * gain_l * send_gain;
                cell.send.right[j] += wet * gain_r * send_gain;
            }
        }
    }
}
