//! The control loop: pattern queries ahead of the audio cursor, voice
//! scheduling, and feedback handling.
//!
//! Decoupled from the audio clock: the audio side reports its frame cursor
//! through RingLink and the loop extrapolates between reports with a
//! monotonic clock. Each tick queries the active pattern for the window
//! between what has already been scheduled and cursor + lookahead, so
//! windows never overlap and no event is scheduled twice. The active
//! pattern sits behind an `ArcSwap`; live code replaces it wholesale
//! without ever blocking a query.

use crate::config::EngineConfig;
use crate::decoder;
use crate::fraction::Fraction;
use crate::pattern::{Event, Pattern, QueryCtx, Span};
use crate::ringlink::{Cmd, ControlLink, Feedback, ScheduledVoice};
use crate::sample_store::SampleStore;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub struct ControlLoop {
    link: ControlLink,
    store: SampleStore,
    config: EngineConfig,
    playback_id: String,
    pattern: Arc<ArcSwap<Pattern>>,
    query_ctx: QueryCtx,
    scheduled_until: Fraction,
    last_cursor_frame: i64,
    last_cursor_at: Instant,
}

impl ControlLoop {
    pub fn new(
        link: ControlLink,
        store: SampleStore,
        config: EngineConfig,
        playback_id: &str,
        pattern: Pattern,
    ) -> Self {
        let query_ctx = QueryCtx {
            sample_rate: config.sample_rate as f64,
            rng_seed: config.rng_seed,
        };
        ControlLoop {
            link,
            store,
            config,
            playback_id: playback_id.to_string(),
            pattern: Arc::new(ArcSwap::from_pointee(pattern)),
            query_ctx,
            scheduled_until: Fraction::zero(),
            last_cursor_frame: 0,
            last_cursor_at: Instant::now(),
        }
    }

    /// Handle for replacing the active pattern from the outside (live
    /// coding). Swaps are atomic; the next tick queries the new tree.
    pub fn pattern_handle(&self) -> Arc<ArcSwap<Pattern>> {
        Arc::clone(&self.pattern)
    }

    /// Run on the configured cadence until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cursor = self.estimated_cursor();
                    self.tick_at(cursor);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(playback = %self.playback_id, "control loop stopped");
    }

    /// Audio cursor estimate: the last reported frame plus wall-clock drift.
    fn estimated_cursor(&self) -> i64 {
        let elapsed = self.last_cursor_at.elapsed().as_secs_f64();
        self.last_cursor_frame + (elapsed * self.config.sample_rate as f64) as i64
    }

    /// One scheduling pass against an explicit cursor position. Split from
    /// `run` so offline rendering and tests can drive it directly.
    pub fn tick_at(&mut self, cursor_frame: i64) {
        self.drain_feedback();

        let fpc = self.config.frames_per_cycle();
        let cursor_cycles = cursor_frame as f64 / fpc;
        let target = Fraction::approximate(cursor_cycles + self.config.lookahead_cycles);
        let from = self
            .scheduled_until
            .max(Fraction::approximate(cursor_cycles));
        if from < target {
            let window = Span::new(from, target);
            let pattern = self.pattern.load_full();
            let events = pattern.query(window, &self.query_ctx);
            trace!(
                from = %window.begin,
                to = %window.end,
                events = events.len(),
                "tick"
            );
            for event in &events {
                self.schedule_event(event, fpc);
            }
            self.scheduled_until = target;
        }

        // forward sample deliveries produced by the store
        while let Some(cmd) = self.store.next_cmd() {
            if !self.link.send(cmd) {
                warn!("ring full, sample delivery delayed");
                break;
            }
        }
    }

    fn drain_feedback(&mut self) {
        while let Some(feedback) = self.link.recv() {
            match feedback {
                Feedback::UpdateCursorFrame { frame, .. } => {
                    if frame > self.last_cursor_frame {
                        self.last_cursor_frame = frame;
                        self.last_cursor_at = Instant::now();
                    }
                }
                Feedback::RequestSample { req, .. } => {
                    self.store.prefetch(req);
                }
            }
        }
    }

    fn schedule_event(&mut self, event: &Event, fpc: f64) {
        // only onsets start voices; boundary continuations already played
        if !event.is_onset() {
            return;
        }
        let Some(whole) = event.whole else {
            return;
        };
        let start_frame = (whole.begin.to_f64() * fpc).round() as i64;
        let gate_end_frame = ((whole.end.to_f64() * fpc).round() as i64).max(start_frame + 1);
        let end_frame = gate_end_frame + self.config.max_release_frames();

        // resolve PCM ahead of the start frame
        if let Some(spec) = decoder::decode(&event.value, self.config.sample_rate as f64) {
            if let Some(req) = spec.sample_request() {
                self.store.prefetch(req.clone());
            }
        }

        let sent = self.link.send(Cmd::ScheduleVoice {
            playback_id: self.playback_id.clone(),
            voice: ScheduledVoice {
                start_frame,
                gate_end_frame,
                end_frame,
                event: event.value.clone(),
            },
        });
        if !sent {
            // stale schedules are droppable; never block toward the audio side
            warn!(start_frame, "ring full, dropping schedule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::sound;
    use crate::ringlink::{ring_link, AudioLink};
    use crate::sample_store::{DirSampleSource, SampleStore};

    fn harness(pattern: Pattern) -> (ControlLoop, AudioLink) {
        let (control_link, audio_link) = ring_link(256);
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new("p0", Arc::new(DirSampleSource::new(dir.path())));
        let control = ControlLoop::new(
            control_link,
            store,
            EngineConfig::default(),
            "p0",
            pattern,
        );
        (control, audio_link)
    }

    fn drain_schedules(audio: &mut AudioLink) -> Vec<ScheduledVoice> {
        let mut voices = Vec::new();
        while let Some(cmd) = audio.recv() {
            if let Cmd::ScheduleVoice { voice, .. } = cmd {
                voices.push(voice);
            }
        }
        voices
    }

    #[test]
    fn tick_schedules_lookahead_onsets_in_frames() {
        // four sine hits per cycle; cps 0.5 at 48k means 96000 frames/cycle
        let (mut control, mut audio) = harness(sound("sine sine sine sine"));
        control.tick_at(0);
        let voices = drain_schedules(&mut audio);
        // lookahead 0.75 cycles covers onsets at 0, 1/4, 2/4
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[0].start_frame, 0);
        assert_eq!(voices[1].start_frame, 24_000);
        assert_eq!(voices[2].start_frame, 48_000);
        assert_eq!(voices[0].gate_end_frame, 24_000);
        assert!(voices[0].end_frame > voices[0].gate_end_frame);
    }

    #[test]
    fn repeated_ticks_never_double_schedule() {
        let (mut control, mut audio) = harness(sound("sine sine sine sine"));
        control.tick_at(0);
        control.tick_at(0);
        assert_eq!(drain_schedules(&mut audio).len(), 3);
        // advancing the cursor opens a new window
        control.tick_at(48_000);
        let more = drain_schedules(&mut audio);
        assert!(!more.is_empty());
        let firsts: Vec<i64> = more.iter().map(|v| v.start_frame).collect();
        assert!(firsts.iter().all(|f| *f >= 72_000), "{firsts:?}");
    }

    #[test]
    fn missing_samples_turn_into_not_found_commands() {
        // "bd" cannot resolve against an empty sample dir; without a tokio
        // runtime the store loads inline, so the tick that schedules also
        // forwards the NotFound
        let (mut control, mut audio) = harness(sound("bd"));
        control.tick_at(0);
        let mut saw_not_found = false;
        while let Some(cmd) = audio.recv() {
            if matches!(cmd, Cmd::SampleNotFound { .. }) {
                saw_not_found = true;
            }
        }
        assert!(saw_not_found);
    }

    #[test]
    fn cursor_feedback_moves_the_estimate() {
        let (mut control, mut audio) = harness(sound("sine"));
        audio.send(Feedback::UpdateCursorFrame {
            playback_id: "p0".into(),
            frame: 200_000,
        });
        control.tick_at(0);
        control.drain_feedback();
        assert!(control.estimated_cursor() >= 200_000);
    }

    #[test]
    fn pattern_swap_takes_effect_next_tick() {
        let (mut control, mut audio) = harness(sound("sine"));
        control.tick_at(0);
        drain_schedules(&mut audio);
        control
            .pattern_handle()
            .store(Arc::new(sound("sine sine sine sine sine sine sine sine")));
        control.tick_at(96_000);
        let voices = drain_schedules(&mut audio);
        assert!(voices.len() >= 5, "swapped pattern not queried");
    }
}
