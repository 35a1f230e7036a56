//! The voice scheduler: future events in a min-heap, promotion into active
//! voices, and per-block render dispatch.
//!
//! Promotion is best-effort for samples: a voice whose PCM has not arrived
//! by its start frame is dropped (with one `RequestSample` feedback) rather
//! than stalling the audio thread. The audio-side sample table is fed purely
//! by RingLink commands, including chunked PCM reassembly.

use crate::decoder;
use crate::orbit::OrbitBank;
use crate::ringlink::{AudioLink, Cmd, Feedback, LoadedSample, SampleRequest, ScheduledVoice};
use crate::voice::{RenderCtx, Voice};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{trace, warn};

/// Audio-side view of one sample id.
enum SampleEntry {
    Loaded(LoadedSample),
    /// Resolution failed; voices for this id drop silently from now on.
    Missing,
}

/// In-flight chunked transfer, reassembled by offset.
struct PartialPcm {
    data: Vec<f32>,
    sample_rate: u32,
    note: Option<f64>,
    pitch_hz: f64,
}

pub struct Scheduler {
    heap: BinaryHeap<Reverse<ScheduledVoice>>,
    active: Vec<Voice>,
    samples: HashMap<SampleRequest, SampleEntry>,
    partial: HashMap<SampleRequest, PartialPcm>,
    /// Requests already relayed to the control side, so a missing sample
    /// produces one feedback, not one per dropped voice.
    requested: HashSet<SampleRequest>,
    playback_id: String,
    sample_rate: f64,
}

impl Scheduler {
    pub fn new(playback_id: &str, sample_rate: f64) -> Self {
        Scheduler {
            heap: BinaryHeap::new(),
            active: Vec::new(),
            samples: HashMap::new(),
            partial: HashMap::new(),
            requested: HashSet::new(),
            playback_id: playback_id.to_string(),
            sample_rate,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.active.len()
    }

    pub fn pending_voices(&self) -> usize {
        self.heap.len()
    }

    pub fn sample_available(&self, req: &SampleRequest) -> bool {
        matches!(self.samples.get(req), Some(SampleEntry::Loaded(_)))
    }

    /// Place a voice on the timeline. If it designates a sample that has not
    /// been delivered yet, a prefetch hint goes back to the control side.
    pub fn schedule(&mut self, voice: ScheduledVoice, link: &mut AudioLink) {
        if let Some(spec) = decoder::decode(&voice.event, self.sample_rate) {
            if let Some(req) = spec.sample_request() {
                if !self.samples.contains_key(req) {
                    self.hint_sample(req.clone(), link);
                }
            }
        }
        self.heap.push(Reverse(voice));
    }

    /// Apply one command from the bus.
    pub fn handle_cmd(&mut self, cmd: Cmd, link: &mut AudioLink) {
        match cmd {
            Cmd::ScheduleVoice { voice, .. } => self.schedule(voice, link),
            Cmd::SampleComplete { req, sample, .. } => {
                self.requested.remove(&req);
                self.samples.insert(req, SampleEntry::Loaded(sample));
            }
            Cmd::SampleChunk {
                req,
                chunk_offset,
                total_size,
                is_last_chunk,
                sample_rate,
                note,
                pitch_hz,
                data,
                ..
            } => {
                let partial = self.partial.entry(req.clone()).or_insert_with(|| PartialPcm {
                    data: vec![0.0; total_size],
                    sample_rate,
                    note,
                    pitch_hz,
                });
                let end = (chunk_offset + data.len()).min(partial.data.len());
                if chunk_offset < end {
                    partial.data[chunk_offset..end]
                        .copy_from_slice(&data[..end - chunk_offset]);
                }
                if is_last_chunk {
                    let partial = self.partial.remove(&req).expect("partial just inserted");
                    self.requested.remove(&req);
                    self.samples.insert(
                        req,
                        SampleEntry::Loaded(LoadedSample {
                            pcm: Arc::new(partial.data),
                            sample_rate: partial.sample_rate,
                            note: partial.note,
                            pitch_hz: partial.pitch_hz,
                        }),
                    );
                }
            }
            Cmd::SampleNotFound { req, .. } => {
                self.requested.remove(&req);
                self.samples.insert(req, SampleEntry::Missing);
            }
        }
    }

    fn hint_sample(&mut self, req: SampleRequest, link: &mut AudioLink) {
        if self.requested.insert(req.clone()) {
            let sent = link.send(Feedback::RequestSample {
                playback_id: self.playback_id.clone(),
                req: req.clone(),
            });
            if !sent {
                // ring full; allow a retry on the next miss
                self.requested.remove(&req);
            }
        }
    }

    /// One block: promote due voices, render the active set, drop the dead.
    pub fn process(&mut self, ctx: &mut RenderCtx, orbits: &mut OrbitBank, link: &mut AudioLink) {
        let cursor = ctx.block_start;
        let horizon = cursor + ctx.block_frames as i64;

        // 1. promote everything starting inside this block
        while matches!(self.heap.peek(), Some(Reverse(v)) if v.start_frame < horizon) {
            let Some(Reverse(sv)) = self.heap.pop() else {
                break;
            };
            if sv.end_frame <= cursor {
                trace!(start = sv.start_frame, "skipping stale voice");
                continue;
            }
            self.promote(sv, link);
        }

        // 2. render, 3. compact dead voices by swap-remove
        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].render(ctx, orbits) {
                i += 1;
            } else {
                self.active.swap_remove(i);
            }
        }
    }

    fn promote(&mut self, sv: ScheduledVoice, link: &mut AudioLink) {
        let Some(spec) = decoder::decode(&sv.event, self.sample_rate) else {
            return;
        };
        let sample = match spec.sample_request() {
            Some(req) => match self.samples.get(req) {
                Some(SampleEntry::Loaded(sample)) => Some(sample.clone()),
                Some(SampleEntry::Missing) => {
                    trace!(?req, "sample unresolved, dropping voice");
                    return;
                }
                None => {
                    warn!(?req, "pcm not delivered by start frame, dropping voice");
                    self.hint_sample(req.clone(), link);
                    return;
                }
            },
            None => None,
        };
        if let Some(voice) = spec.into_voice(
            sv.start_frame,
            sv.gate_end_frame,
            sv.end_frame,
            sample.as_ref(),
            self.sample_rate,
        ) {
            self.active.push(voice);
        }
    }
}
