//! Control-side sample store: resolution, async PCM decode, and
//! exactly-once delivery toward the audio side.
//!
//! Each request runs through `InFlight -> Sent | NotFound`. The first caller
//! starts the load on the blocking pool; later callers join the in-flight
//! load and await the same completion. Every `Cmd::Sample*` message for a
//! request is produced exactly once until an explicit `clear`. Outgoing
//! commands queue internally and are drained onto RingLink by the control
//! loop, which owns the producer side of the bus.

use crate::decoder::DEFAULT_SAMPLE_PITCH_HZ;
use crate::ringlink::{Cmd, LoadedSample, SampleRequest};
use crate::tones;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// PCM larger than this crosses RingLink in chunks.
pub const CHUNK_SAMPLES: usize = 65_536;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no sample matches {0:?}")]
    NotFound(SampleRequest),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("wav decode failed: {0}")]
    Decode(#[from] hound::Error),
}

/// Resolves a request to decoded PCM. Implementations may block; the store
/// always calls them off the async threads.
pub trait SampleSource: Send + Sync + 'static {
    fn load(&self, req: &SampleRequest) -> Result<LoadedSample, SampleError>;
}

/// Externally visible lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    InFlight,
    Sent,
    NotFound,
}

enum Entry {
    InFlight(watch::Receiver<bool>),
    Sent,
    NotFound,
}

pub struct SampleStore {
    source: Arc<dyn SampleSource>,
    playback_id: String,
    entries: Arc<Mutex<HashMap<SampleRequest, Entry>>>,
    out_tx: mpsc::UnboundedSender<Cmd>,
    out_rx: mpsc::UnboundedReceiver<Cmd>,
}

impl SampleStore {
    pub fn new(playback_id: &str, source: Arc<dyn SampleSource>) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        SampleStore {
            source,
            playback_id: playback_id.to_string(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            out_tx,
            out_rx,
        }
    }

    pub fn state(&self, req: &SampleRequest) -> Option<SampleState> {
        let entries = self.entries.lock().expect("store lock");
        entries.get(req).map(|e| match e {
            Entry::InFlight(_) => SampleState::InFlight,
            Entry::Sent => SampleState::Sent,
            Entry::NotFound => SampleState::NotFound,
        })
    }

    /// Forget terminal states so samples can be re-sent (e.g. after the
    /// audio side restarts). In-flight loads are left alone.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("store lock");
        entries.retain(|_, e| matches!(e, Entry::InFlight(_)));
    }

    /// Fire-and-forget load.
    pub fn prefetch(&self, req: SampleRequest) {
        self.begin_load(req);
    }

    /// Resolve every request to a terminal state before returning.
    pub async fn ensure_loaded(&self, reqs: &[SampleRequest]) {
        let waiters: Vec<_> = reqs
            .iter()
            .filter_map(|req| self.begin_load(req.clone()))
            .collect();
        for mut rx in waiters {
            loop {
                if *rx.borrow() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Next queued outgoing command, if any. Drained by the control loop.
    pub fn next_cmd(&mut self) -> Option<Cmd> {
        self.out_rx.try_recv().ok()
    }

    /// Start or join a load; `None` when the request is already terminal.
    fn begin_load(&self, req: SampleRequest) -> Option<watch::Receiver<bool>> {
        let mut entries = self.entries.lock().expect("store lock");
        match entries.get(&req) {
            Some(Entry::Sent) | Some(Entry::NotFound) => None,
            Some(Entry::InFlight(rx)) => Some(rx.clone()),
            None => {
                let (done_tx, done_rx) = watch::channel(false);
                entries.insert(req.clone(), Entry::InFlight(done_rx.clone()));
                drop(entries);
                self.spawn_load(req, done_tx);
                Some(done_rx)
            }
        }
    }

    fn spawn_load(&self, req: SampleRequest, done_tx: watch::Sender<bool>) {
        let source = Arc::clone(&self.source);
        let entries = Arc::clone(&self.entries);
        let out = self.out_tx.clone();
        let playback_id = self.playback_id.clone();
        let work = move || {
            let result = source.load(&req);
            let mut entries = entries.lock().expect("store lock");
            match result {
                Ok(sample) => {
                    debug!(?req, frames = sample.pcm.len(), "sample loaded");
                    for cmd in delivery_cmds(&playback_id, &req, &sample) {
                        let _ = out.send(cmd);
                    }
                    entries.insert(req, Entry::Sent);
                }
                Err(err) => {
                    warn!(?req, %err, "sample load failed");
                    let _ = out.send(Cmd::SampleNotFound {
                        playback_id,
                        req: req.clone(),
                    });
                    entries.insert(req, Entry::NotFound);
                }
            }
            let _ = done_tx.send(true);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(work);
            }
            // no runtime (offline rendering): decode inline
            Err(_) => work(),
        }
    }
}

/// Build the message(s) that carry one sample across the bus.
fn delivery_cmds(playback_id: &str, req: &SampleRequest, sample: &LoadedSample) -> Vec<Cmd> {
    let total = sample.pcm.len();
    if total <= CHUNK_SAMPLES {
        return vec![Cmd::SampleComplete {
            playback_id: playback_id.to_string(),
            req: req.clone(),
            sample: sample.clone(),
        }];
    }
    let mut cmds = Vec::with_capacity(total.div_ceil(CHUNK_SAMPLES));
    let mut offset = 0;
    while offset < total {
        let end = (offset + CHUNK_SAMPLES).min(total);
        cmds.push(Cmd::SampleChunk {
            playback_id: playback_id.to_string(),
            req: req.clone(),
            chunk_offset: offset,
            total_size: total,
            is_last_chunk: end == total,
            sample_rate: sample.sample_rate,
            note: sample.note,
            pitch_hz: sample.pitch_hz,
            data: sample.pcm[offset..end].to_vec(),
        });
        offset = end;
    }
    cmds
}

// ── Directory source ────────────────────────────────────────────────────

/// Resolves requests against a dirt-samples style tree:
/// `root/[bank/]sound/*.wav`, with `index` picking among the sorted files.
pub struct DirSampleSource {
    root: PathBuf,
}

impl DirSampleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirSampleSource { root: root.into() }
    }

    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join("dirt-samples"))
            .unwrap_or_else(|| PathBuf::from("dirt-samples"))
    }

    fn resolve(&self, req: &SampleRequest) -> Result<PathBuf, SampleError> {
        let sound = req
            .sound
            .as_deref()
            .ok_or_else(|| SampleError::NotFound(req.clone()))?;
        let mut dir = self.root.clone();
        if let Some(bank) = &req.bank {
            dir.push(bank);
        }
        dir.push(sound);
        let Ok(listing) = std::fs::read_dir(&dir) else {
            return Err(SampleError::NotFound(req.clone()));
        };
        let mut wavs: Vec<PathBuf> = listing
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .collect();
        if wavs.is_empty() {
            return Err(SampleError::NotFound(req.clone()));
        }
        wavs.sort();
        let idx = req.index.unwrap_or(0) as usize % wavs.len();
        Ok(wavs.swap_remove(idx))
    }
}

impl SampleSource for DirSampleSource {
    fn load(&self, req: &SampleRequest) -> Result<LoadedSample, SampleError> {
        let path = self.resolve(req)?;
        let mut reader = hound::WavReader::open(&path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        let note = req.note.map(f64::from);
        Ok(LoadedSample {
            pcm: Arc::new(mono),
            sample_rate: spec.sample_rate,
            note,
            pitch_hz: note
                .map(tones::midi_to_hz)
                .unwrap_or(DEFAULT_SAMPLE_PITCH_HZ),
        })
    }
}
