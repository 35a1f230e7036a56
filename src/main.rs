//! Roton CLI: play a pattern live or render it to a WAV file.

use clap::{Parser, Subcommand};
use roton::config::EngineConfig;
use roton::engine;
use roton::notation::{note, sound};
use roton::pattern::Pattern;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roton", about = "Live coding music engine", version)]
struct Cli {
    /// Path to an engine config TOML; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a pattern through the default output device.
    Play {
        /// Sound pattern, e.g. "bd hh sd hh" or "sine ~ saw ~".
        #[arg(default_value = "sine ~ sine sine")]
        pattern: String,

        /// Optional note pattern stacked on top, e.g. "c4 e4 g4".
        #[arg(long)]
        notes: Option<String>,

        /// How long to play before exiting.
        #[arg(long, default_value_t = 30.0)]
        seconds: f64,
    },
    /// Render a pattern offline to a 16-bit stereo WAV.
    Render {
        pattern: String,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long, default_value_t = 4.0)]
        seconds: f64,

        #[arg(short, long, default_value = "roton.wav")]
        output: PathBuf,
    },
}

fn build_pattern(source: &str, notes: Option<&str>) -> Pattern {
    let base = sound(source);
    match notes {
        Some(tokens) => Pattern::stack(vec![base, note(tokens)]),
        None => base,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Play {
            pattern,
            notes,
            seconds,
        } => {
            let pattern = build_pattern(&pattern, notes.as_deref());
            let (audio_side, control) = engine::build_default(&config, pattern);
            let sample_rate = config.sample_rate;

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let control_task = tokio::spawn(control.run(shutdown_rx));

            let stream = roton::audio::start_stream(audio_side, sample_rate)?;
            info!(seconds, "playing");
            tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;

            shutdown_tx.send(true).ok();
            control_task.await.ok();
            drop(stream);
        }
        Command::Render {
            pattern,
            notes,
            seconds,
            output,
        } => {
            let pattern = build_pattern(&pattern, notes.as_deref());
            let stats = engine::render_offline(&config, pattern, seconds, Some(&output))?;
            println!(
                "wrote {} ({} frames, peak {:.3}, rms {:.3})",
                output.display(),
                stats.frames,
                stats.peak,
                stats.rms
            );
        }
    }
    Ok(())
}
