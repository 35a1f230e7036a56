//! Platform audio output: hands rendered blocks to a cpal stream.
//!
//! Thin glue outside the engine core. The device callback pulls whole
//! blocks from the audio side as needed and carries any remainder over to
//! the next callback, so the engine's block size and the device's buffer
//! size never have to agree.

use crate::engine::AudioSide;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no default output device")]
    NoDevice,
    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// Open the default output device and start streaming. The returned stream
/// keeps playing until dropped.
pub fn start_stream(mut audio: AudioSide, sample_rate: u32) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
    info!(
        device = device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate, "opening output"
    );
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut block = vec![0i16; 2 * audio.block_size()];
    let mut carry: VecDeque<i16> = VecDeque::new();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for out in data.iter_mut() {
                if carry.is_empty() {
                    audio.render_block(&mut block);
                    carry.extend(block.iter().copied());
                }
                let s = carry.pop_front().unwrap_or(0);
                *out = s as f32 / 32_768.0;
            }
        },
        |err| error!(%err, "output stream error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}
