//! Engine assembly: wires both ends of RingLink into an audio side and a
//! control side, plus the offline render path.
//!
//! The audio side is a plain struct the platform layer drives one block at
//! a time; it owns every piece of real-time state and never blocks. The
//! control side is the `ControlLoop` from [`crate::control`], run as a
//! tokio task for live playback or ticked synchronously for offline
//! rendering.

use crate::config::EngineConfig;
use crate::control::ControlLoop;
use crate::orbit::OrbitBank;
use crate::pattern::Pattern;
use crate::renderer::Renderer;
use crate::ringlink::{ring_link, AudioLink, Feedback};
use crate::sample_store::{DirSampleSource, SampleSource, SampleStore};
use crate::scheduler::Scheduler;
use crate::voice::RenderCtx;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wav write failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Everything the real-time thread owns.
pub struct AudioSide {
    link: AudioLink,
    scheduler: Scheduler,
    orbits: OrbitBank,
    renderer: Renderer,
    ctx: RenderCtx,
    cursor: i64,
    playback_id: String,
    block_size: usize,
}

impl AudioSide {
    /// Drain pending commands and render the next block of interleaved
    /// stereo i16. Advances the cursor and reports it back.
    pub fn render_block(&mut self, out: &mut [i16]) {
        while let Some(cmd) = self.link.recv() {
            self.scheduler.handle_cmd(cmd, &mut self.link);
        }
        self.ctx.block_start = self.cursor;
        self.renderer.render_block(
            &mut self.ctx,
            &mut self.scheduler,
            &mut self.orbits,
            &mut self.link,
            out,
        );
        self.cursor += self.block_size as i64;
        let _ = self.link.send(Feedback::UpdateCursorFrame {
            playback_id: self.playback_id.clone(),
            frame: self.cursor,
        });
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn active_voices(&self) -> usize {
        self.scheduler.active_voices()
    }
}

/// Build a connected audio side + control loop pair.
pub fn build(
    config: &EngineConfig,
    pattern: Pattern,
    source: Arc<dyn SampleSource>,
) -> (AudioSide, ControlLoop) {
    let playback_id = "playback-0";
    let (control_link, audio_link) = ring_link(config.ring_capacity);
    let sample_rate = config.sample_rate as f64;
    let audio = AudioSide {
        link: audio_link,
        scheduler: Scheduler::new(playback_id, sample_rate),
        orbits: OrbitBank::new(sample_rate, config.block_size),
        renderer: Renderer::new(config.block_size),
        ctx: RenderCtx::new(config.block_size, sample_rate),
        cursor: 0,
        playback_id: playback_id.to_string(),
        block_size: config.block_size,
    };
    let store = SampleStore::new(playback_id, source);
    let control = ControlLoop::new(control_link, store, config.clone(), playback_id, pattern);
    (audio, control)
}

/// Build with the default directory sample source.
pub fn build_default(config: &EngineConfig, pattern: Pattern) -> (AudioSide, ControlLoop) {
    let root = config
        .sample_root
        .clone()
        .unwrap_or_else(DirSampleSource::default_root);
    build(config, pattern, Arc::new(DirSampleSource::new(root)))
}

/// Summary of an offline render.
#[derive(Debug, Clone)]
pub struct RenderStats {
    pub frames: usize,
    pub peak: f64,
    pub rms: f64,
}

/// Render `seconds` of the pattern without a device, optionally writing a
/// 16-bit stereo WAV. The control loop is ticked in lock-step with the
/// block cursor; sample decodes run inline since there is no runtime.
pub fn render_offline(
    config: &EngineConfig,
    pattern: Pattern,
    seconds: f64,
    wav_path: Option<&Path>,
) -> Result<RenderStats, EngineError> {
    let (mut audio, mut control) = build_default(config, pattern);
    let block = config.block_size;
    let total_frames = (seconds.max(0.0) * config.sample_rate as f64) as usize;
    let blocks = total_frames.div_ceil(block);

    let mut writer = match wav_path {
        Some(path) => Some(hound::WavWriter::create(
            path,
            hound::WavSpec {
                channels: 2,
                sample_rate: config.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
        )?),
        None => None,
    };

    let mut out = vec![0i16; 2 * block];
    let mut sum_squares = 0.0f64;
    let mut peak = 0.0f64;
    for _ in 0..blocks {
        control.tick_at(audio.cursor());
        audio.render_block(&mut out);
        for s in &out {
            let x = *s as f64 / 32_768.0;
            sum_squares += x * x;
            peak = peak.max(x.abs());
        }
        if let Some(writer) = writer.as_mut() {
            for s in &out {
                writer.write_sample(*s)?;
            }
        }
    }
    if let Some(writer) = writer {
        writer.finalize()?;
    }

    let frames = blocks * block;
    let stats = RenderStats {
        frames,
        peak,
        rms: (sum_squares / (2 * frames) as f64).sqrt(),
    };
    info!(
        frames = stats.frames,
        peak = stats.peak,
        rms = stats.rms,
        "offline render complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::sound;

    #[test]
    fn offline_render_produces_sound_and_stays_bounded() {
        let config = EngineConfig::default();
        let stats =
            render_offline(&config, sound("sine sine sine sine"), 2.0, None).unwrap();
        assert!(stats.peak > 0.1, "silent render: {stats:?}");
        assert!(stats.peak <= 1.0);
        assert_eq!(stats.frames % config.block_size, 0);
    }

    #[test]
    fn silence_renders_silence() {
        let config = EngineConfig::default();
        let stats = render_offline(&config, Pattern::silence(), 0.5, None).unwrap();
        assert_eq!(stats.peak, 0.0);
        assert_eq!(stats.rms, 0.0);
    }

    #[test]
    fn offline_render_writes_a_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let config = EngineConfig::default();
        render_offline(&config, sound("sine"), 0.25, Some(&path)).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, config.sample_rate);
        assert!(reader.len() > 0);
    }
}
