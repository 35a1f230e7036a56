//! RingLink: the bounded SPSC message bus between the control side and the
//! audio side.
//!
//! Two lock-free ring buffers (`ringbuf` crate) carry commands one way and
//! feedback the other. Each channel is single-producer/single-consumer from
//! its owner's side. `send` never blocks: on a full ring it returns `false`
//! and the producer decides whether to coalesce or drop. The audio side
//! drains its consumer at block boundaries only.

use crate::pattern::Value;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::cmp::Ordering;
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 8192;

/// Identity of a sample to resolve and load. Equality is field-wise over all
/// four components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SampleRequest {
    pub bank: Option<String>,
    pub sound: Option<String>,
    pub index: Option<u32>,
    pub note: Option<i32>,
}

impl SampleRequest {
    pub fn sound(name: &str) -> Self {
        SampleRequest {
            sound: Some(name.to_string()),
            ..SampleRequest::default()
        }
    }

    pub fn indexed(name: &str, index: u32) -> Self {
        SampleRequest {
            sound: Some(name.to_string()),
            index: Some(index),
            ..SampleRequest::default()
        }
    }
}

/// Decoded PCM published to the audio side.
#[derive(Debug, Clone)]
pub struct LoadedSample {
    pub pcm: Arc<Vec<f32>>,
    pub sample_rate: u32,
    pub note: Option<f64>,
    /// Base pitch of the recording; playback rate scales target/base.
    pub pitch_hz: f64,
}

/// A voice the control side has placed on the timeline, in absolute frames.
/// The raw event rides along and is decoded at promotion time.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub start_frame: i64,
    pub gate_end_frame: i64,
    pub end_frame: i64,
    pub event: Value,
}

impl PartialEq for ScheduledVoice {
    fn eq(&self, other: &Self) -> bool {
        self.start_frame == other.start_frame
            && self.gate_end_frame == other.gate_end_frame
            && self.end_frame == other.end_frame
    }
}

impl Eq for ScheduledVoice {}

impl PartialOrd for ScheduledVoice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledVoice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_frame
            .cmp(&other.start_frame)
            .then_with(|| self.gate_end_frame.cmp(&other.gate_end_frame))
            .then_with(|| self.end_frame.cmp(&other.end_frame))
    }
}

/// Control -> audio messages.
#[derive(Debug, Clone)]
pub enum Cmd {
    ScheduleVoice {
        playback_id: String,
        voice: ScheduledVoice,
    },
    SampleComplete {
        playback_id: String,
        req: SampleRequest,
        sample: LoadedSample,
    },
    /// Large PCM crosses in slices; the audio side reassembles by offset and
    /// materializes the sample when the last chunk lands.
    SampleChunk {
        playback_id: String,
        req: SampleRequest,
        chunk_offset: usize,
        total_size: usize,
        is_last_chunk: bool,
        sample_rate: u32,
        note: Option<f64>,
        pitch_hz: f64,
        data: Vec<f32>,
    },
    SampleNotFound {
        playback_id: String,
        req: SampleRequest,
    },
}

/// Audio -> control messages.
#[derive(Debug, Clone)]
pub enum Feedback {
    UpdateCursorFrame { playback_id: String, frame: i64 },
    RequestSample { playback_id: String, req: SampleRequest },
}

/// Control-side endpoint: produces commands, consumes feedback.
pub struct ControlLink {
    cmd_tx: HeapProd<Cmd>,
    feedback_rx: HeapCons<Feedback>,
}

impl ControlLink {
    /// Non-blocking send; `false` means the ring was full and the command
    /// was not enqueued.
    pub fn send(&mut self, cmd: Cmd) -> bool {
        self.cmd_tx.try_push(cmd).is_ok()
    }

    pub fn recv(&mut self) -> Option<Feedback> {
        self.feedback_rx.try_pop()
    }
}

/// Audio-side endpoint: consumes commands, produces feedback.
pub struct AudioLink {
    cmd_rx: HeapCons<Cmd>,
    feedback_tx: HeapProd<Feedback>,
}

impl AudioLink {
    pub fn recv(&mut self) -> Option<Cmd> {
        self.cmd_rx.try_pop()
    }

    pub fn send(&mut self, feedback: Feedback) -> bool {
        self.feedback_tx.try_push(feedback).is_ok()
    }
}

/// Build both ends of the bus. Capacity is rounded up to a power of two.
pub fn ring_link(capacity: usize) -> (ControlLink, AudioLink) {
    let capacity = capacity.max(2).next_power_of_two();
    let (cmd_tx, cmd_rx) = HeapRb::<Cmd>::new(capacity).split();
    let (feedback_tx, feedback_rx) = HeapRb::<Feedback>::new(capacity).split();
    (
        ControlLink {
            cmd_tx,
            feedback_rx,
        },
        AudioLink {
            cmd_rx,
            feedback_tx,
        },
    )
}
