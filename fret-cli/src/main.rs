//! # fret-cli - Terminal Front End
//!
//! Thin consumer shell over `fret-core`: listen on the microphone and
//! print analysis frames, or step through a WAV file and print what the
//! song is playing at each position. All detection lives in the core
//! crate; this binary only formats and schedules.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use fret_core::engine::LiveEngine;
use fret_core::song::{SongAnalyzer, SongBuffer};
use serde_json::json;

#[derive(Parser)]
#[command(name = "fret-cli", about = "Guitar pitch and fretboard analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen on the default input device and print analysis frames
    Live {
        /// How long to listen, in seconds
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,
    },
    /// Step through a WAV file and print the detected pitches
    Song {
        path: PathBuf,
        /// Analysis step, in seconds
        #[arg(long, default_value_t = 0.25)]
        step: f32,
        /// Emit one JSON object per analyzed position
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Live { seconds } => run_live(seconds),
        Command::Song { path, step, json } => run_song(&path, step, json),
    }
}

fn run_live(seconds: f32) -> Result<()> {
    let mut engine = LiveEngine::new();
    let subscription = engine.subscribe(|frame| {
        let Some(pitch) = frame.pitch else {
            return;
        };
        let Some(note) = &frame.note else {
            return;
        };
        let position = frame
            .position
            .map(|p| format!("string {} fret {}", p.string_index + 1, p.fret))
            .unwrap_or_else(|| "unresolved".to_string());
        println!(
            "{pitch:>7.2} Hz  {note} {:+3} cents  [{position}]  rms {:.3}",
            note.cents, frame.rms
        );
    });

    engine.start()?;
    std::thread::sleep(Duration::from_secs_f32(seconds.max(0.0)));
    engine.unsubscribe(subscription);
    engine.stop();
    Ok(())
}

fn run_song(path: &Path, step: f32, as_json: bool) -> Result<()> {
    if !(step > 0.0) {
        bail!("step must be positive");
    }

    let buffer = SongBuffer::from_wav(path)?;
    let duration = buffer.duration();
    let analyzer = SongAnalyzer::new(buffer);

    let mut time = 0.0_f32;
    while time < duration {
        if let Some(hit) = analyzer.pitch_at(time) {
            if as_json {
                println!(
                    "{}",
                    json!({
                        "time": time,
                        "pitch": hit.pitch,
                        "note": hit.note.name,
                        "octave": hit.note.octave,
                        "cents": hit.note.cents,
                        "string": hit.position.map(|p| p.string_index),
                        "fret": hit.position.map(|p| p.fret),
                    })
                );
            } else {
                let position = hit
                    .position
                    .map(|p| format!("string {} fret {}", p.string_index + 1, p.fret))
                    .unwrap_or_else(|| "unresolved".to_string());
                println!("{time:>7.2}s  {:>7.2} Hz  {}  [{position}]", hit.pitch, hit.note);
            }
        }
        time += step;
    }
    Ok(())
}
