//! Command-line interface implementation

use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};

use crate::audio::{AudioError, PlaybackOutcome, PlaybackReport};
use crate::config::Settings;

/// Command-line arguments for pocket-player
#[derive(Parser, Debug)]
#[command(author, version, about = "Decode-ahead audio player for MP3 and WAV files", long_about = None)]
pub struct Args {
    /// Audio file to play (.mp3 or .wav)
    pub file: PathBuf,

    /// Output device: an ALSA PCM name, or "null" to play silently in real time
    #[arg(short = 'd', long, env = "POCKET_PLAYER_DEVICE")]
    pub device: Option<String>,

    /// Config file path
    #[arg(short, long, env = "POCKET_PLAYER_CONFIG")]
    pub config: Option<String>,

    /// Number of PCM chunks decoded ahead
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Chunks to decode before playback starts
    #[arg(long)]
    pub prefill: Option<usize>,

    /// Chunks submitted to the output at once
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// CLI user interface for the player
pub struct Cli {
    pub args: Args,
}

impl Cli {
    /// Create a new CLI instance
    pub fn new() -> Self {
        Cli {
            args: Args::parse(),
        }
    }

    /// Path of the config file to load
    pub fn config_path(&self) -> PathBuf {
        match &self.args.config {
            Some(path) => Path::new(path).to_path_buf(),
            None => Settings::default_path(),
        }
    }

    /// Command-line values take precedence over the config file
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(device) = &self.args.device {
            settings.output_device = device.clone();
        }
        if let Some(pool_size) = self.args.pool_size {
            settings.pipeline.pool_size = pool_size;
            // Keep prefill legal when only the pool shrinks.
            if self.args.prefill.is_none() {
                settings.pipeline.prefill_chunks = settings.pipeline.prefill_chunks.min(pool_size);
            }
        }
        if let Some(prefill) = self.args.prefill {
            settings.pipeline.prefill_chunks = prefill;
        }
        if let Some(max_in_flight) = self.args.max_in_flight {
            settings.pipeline.max_in_flight = max_in_flight;
        }
    }

    /// Display what is about to play
    pub fn display_start(&self, settings: &Settings) {
        println!("\nNow playing: {}", self.args.file.display());
        println!("Output: {}", settings.output_device);
        println!(
            "Pipeline: {} chunks, prefill {}, {} in flight",
            settings.pipeline.pool_size, settings.pipeline.prefill_chunks, settings.pipeline.max_in_flight
        );
        println!("\nPress any key or Ctrl+C to stop playback");
    }

    /// Display the end-of-playback summary
    pub fn display_report(&self, report: &PlaybackReport) {
        println!("\r\n{}", format_report(report));
    }

    /// Display error messages
    pub fn display_error(&self, error: &dyn Error) {
        eprintln!("Error: {}", error);
    }

    /// Shows the report or the error, once. Returns whether playback ran.
    pub fn display_outcome(&self, result: &Result<PlaybackReport, AudioError>) -> bool {
        match result {
            Ok(report) => {
                self.display_report(report);
                true
            }
            Err(e) => {
                self.display_error(e);
                false
            }
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line summary of a playback session
pub fn format_report(report: &PlaybackReport) -> String {
    let outcome = match report.outcome {
        PlaybackOutcome::Completed => "Finished",
        PlaybackOutcome::Cancelled => "Stopped",
    };
    let mut line = format!(
        "{}: {} chunks played ({} samples), {} decoded",
        outcome, report.chunks_submitted, report.samples_submitted, report.chunks_published
    );
    if report.desync_recoveries > 0 || report.skipped_frames > 0 {
        line.push_str(&format!(
            ", {} bytes resynced, {} frames skipped",
            report.desync_recoveries, report.skipped_frames
        ));
    }
    if !report.pool_conserved() {
        line.push_str(&format!(
            " [{} of {} buffers reclaimed]",
            report.reclaimed_slots, report.pool_size
        ));
    }
    line
}
