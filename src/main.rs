use pocket_player::audio::{
    self, AudioError, AudioSink, CancellationSource, ClockSink, KeyboardCancel, NeverCancel,
    PlaybackReport,
};
use pocket_player::config::Settings;
use pocket_player::init_app_dirs;
use pocket_player::ui::Cli;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use tokio::sync::broadcast;
use tracing::info;

const LOG_TARGET: &str = "pocket_player::main";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::new();

    let default_filter = if cli.args.verbose {
        "pocket_player=debug"
    } else {
        "pocket_player=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    init_app_dirs()?;

    let config_path = cli.config_path();
    let mut settings = Settings::load(&config_path)?;
    cli.apply_overrides(&mut settings);
    settings.validate()?;

    // Ctrl-C arrives as a signal unless the keyboard source has the terminal in raw mode.
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: LOG_TARGET, "Ctrl-C received, stopping playback.");
            let _ = signal_tx.send(());
        }
    });

    cli.display_start(&settings);

    let path = cli.args.file.clone();
    let run_settings = settings.clone();
    let result =
        tokio::task::spawn_blocking(move || play(&path, &run_settings, shutdown_rx)).await?;
    drop(shutdown_tx);

    if cli.display_outcome(&result) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Runs on a blocking thread: the playback loop polls and sleeps.
fn play(
    path: &Path,
    settings: &Settings,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<PlaybackReport, AudioError> {
    let mut sink = open_sink(settings)?;
    let keyboard: Box<dyn CancellationSource> = match KeyboardCancel::new() {
        Some(keyboard) => Box::new(keyboard),
        None => Box::new(NeverCancel),
    };
    let mut cancel = (keyboard, shutdown_rx);
    audio::play_file(path, &settings.pipeline, &mut sink, &mut cancel)
}

fn open_sink(settings: &Settings) -> Result<Box<dyn AudioSink>, AudioError> {
    if settings.uses_null_device() {
        info!(target: LOG_TARGET, "Using the null output device.");
        return Ok(Box::new(ClockSink::new(settings.pipeline.max_in_flight)));
    }
    device_sink(settings)
}

#[cfg(feature = "alsa")]
fn device_sink(settings: &Settings) -> Result<Box<dyn AudioSink>, AudioError> {
    let sink = audio::AlsaSink::new(&settings.output_device, settings.pipeline.max_in_flight)?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "alsa"))]
fn device_sink(settings: &Settings) -> Result<Box<dyn AudioSink>, AudioError> {
    tracing::warn!(target: LOG_TARGET, "Built without ALSA support; playing '{}' on the null device instead.",
        settings.output_device);
    Ok(Box::new(ClockSink::new(settings.pipeline.max_in_flight)))
}
