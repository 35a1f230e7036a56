//! # Roton - live coding music engine
//!
//! Roton turns a scripted pattern into stereo audio in real time. A pattern
//! is a pure query from a rational time window to events; a control loop
//! schedules those events as voices a little ahead of the audio cursor; a
//! lock-free message bus hands them to the real-time side, where a
//! scheduler renders synth and sample voices through per-voice filters into
//! 16 effect buses (delay + reverb) and a final limiter.
//!
//! ## Quick start
//!
//! ```
//! use roton::config::EngineConfig;
//! use roton::engine::render_offline;
//! use roton::notation::sound;
//!
//! let config = EngineConfig::default();
//! let pattern = sound("sine ~ sine sine");
//! let stats = render_offline(&config, pattern, 2.0, None).unwrap();
//! assert!(stats.peak > 0.0);
//! ```
//!
//! ## Architecture
//!
//! - [`pattern`] - the query model: atoms, sequences, stacks, time maps,
//!   euclidean rhythms, seeded random operators
//! - [`fraction`] - exact rational time underneath all pattern arithmetic
//! - [`notation`] / [`tones`] - the thin front toward the script language
//!   and the music-theory collaborator
//! - [`control`] / [`sample_store`] - the control side: lookahead
//!   scheduling and async PCM resolution
//! - [`ringlink`] - the bounded SPSC bus between the two sides
//! - [`scheduler`] / [`voice`] / [`osc`] / [`filters`] - the audio side
//! - [`orbit`] / [`renderer`] - effect buses, limiter, interleave
//! - [`engine`] / [`audio`] - assembly and the platform output layer
//!
//! Timing is exact where it matters: pattern arithmetic is all rational,
//! and conversion to frames happens once, at the scheduler boundary.

pub mod audio;
pub mod config;
pub mod control;
pub mod decoder;
pub mod engine;
pub mod envelope;
pub mod filters;
pub mod fraction;
pub mod notation;
pub mod orbit;
pub mod osc;
pub mod pattern;
pub mod renderer;
pub mod ringlink;
pub mod sample_store;
pub mod scheduler;
pub mod tones;
pub mod voice;
