//! Engine configuration.
//!
//! Everything the two sides need to agree on up front: rates, block size,
//! the control loop's cadence and lookahead, and where samples live. Loads
//! from TOML or falls back to defaults field by field.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub cycles_per_second: f64,
    /// How far ahead of the audio cursor the control loop schedules, in
    /// cycles. Must exceed one block's worth of cycles.
    pub lookahead_cycles: f64,
    pub tick_interval_ms: u64,
    pub ring_capacity: usize,
    /// Upper bound on a voice's release tail, so late releases cannot leak
    /// voices forever.
    pub max_release_seconds: f64,
    /// Root of the dirt-samples style sample tree. `None` picks a default
    /// under the user's home directory.
    pub sample_root: Option<PathBuf>,
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 48_000,
            block_size: 512,
            cycles_per_second: 0.5,
            lookahead_cycles: 0.75,
            tick_interval_ms: 10,
            ring_capacity: 8192,
            max_release_seconds: 8.0,
            sample_root: None,
            rng_seed: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn frames_per_cycle(&self) -> f64 {
        self.sample_rate as f64 / self.cycles_per_second
    }

    pub fn max_release_frames(&self) -> i64 {
        (self.max_release_seconds * self.sample_rate as f64) as i64
    }

    /// Block length expressed in cycles; the lookahead must stay above this.
    pub fn block_cycles(&self) -> f64 {
        self.block_size as f64 / self.frames_per_cycle()
    }
}
