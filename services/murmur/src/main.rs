mod config;
mod launcher;

use crate::config::{Config, PERMISSION_VAR};
use crate::launcher::{BackgroundLauncher, build_pipeline};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use murmur_core::{
    EnvPermission, FilePreferenceStore, LifecycleController, ResumeOutcome, SkipReason,
};
use murmur_native::device;
use murmur_realtime::types::{Event, EventCategory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Continuous listening client for a streaming speech backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture the microphone in the foreground until Ctrl-C
    Listen,
    /// Turn background monitoring on or off
    Monitor {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Resume background capture after an OS restart, if allowed
    Restart,
    /// List audio input and output devices
    Devices,
    /// Show the stored monitoring preference and the microphone permission
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

type Controller = LifecycleController<EnvPermission, FilePreferenceStore, BackgroundLauncher>;

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    let launcher = BackgroundLauncher::new(config.clone(), shutdown.clone());
    let controller: Controller = LifecycleController::new(
        EnvPermission::new(PERMISSION_VAR),
        FilePreferenceStore::new(&config.state_dir),
        launcher.clone(),
    );

    match cli.command {
        Command::Listen => listen(&config, shutdown).await,
        Command::Monitor { state } => {
            let preference = controller
                .set_monitoring(matches!(state, Toggle::On))
                .context("Failed to save monitoring preference")?;
            println!(
                "monitoring {}",
                if preference.enabled() { "on" } else { "off" }
            );
            if preference.enabled() && !preference.permission_granted() {
                println!(
                    "microphone permission is not granted; capture will not resume until it is"
                );
            }
            Ok(())
        }
        Command::Restart => restart(&controller, &launcher, shutdown).await,
        Command::Devices => {
            println!("Input devices:");
            for info in device::get_available_inputs()? {
                println!("{}", info);
            }
            println!("Output devices:");
            for info in device::get_available_outputs()? {
                println!("{}", info);
            }
            Ok(())
        }
        Command::Status => {
            match controller
                .preference()
                .context("Failed to read monitoring preference")?
            {
                Some(preference) => println!(
                    "monitoring: {} (since {})",
                    if preference.enabled() { "on" } else { "off" },
                    preference.updated_at().to_rfc3339()
                ),
                None => println!("monitoring: never enabled"),
            }
            println!(
                "microphone permission: {}",
                if controller.permission_granted() { "granted" } else { "denied" }
            );
            Ok(())
        }
    }
}

fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down...");
            shutdown.cancel();
        }
    });
}

async fn listen(config: &Config, shutdown: CancellationToken) -> Result<()> {
    let (pipeline, capture) = build_pipeline(config)?;
    let (_playback, sink) = murmur_native::playback::start(config.output_device.as_deref())
        .context("Failed to start audio playback")?;

    let session = pipeline.session();
    session.subscribe(EventCategory::AudioResponse, move |event| sink.handle(event));
    session.subscribe(EventCategory::TranscriptInterim, |event| {
        if let Event::TranscriptInterim(transcript) = event {
            tracing::debug!("interim: {}", transcript.text());
        }
        Ok(())
    });
    session.subscribe(EventCategory::TranscriptFinal, |event| {
        if let Event::TranscriptFinal(transcript) = event {
            println!("{}", transcript.text());
        }
        Ok(())
    });
    session.subscribe(EventCategory::Disconnected, |event| {
        if let Event::Disconnected(disconnected) = event {
            tracing::warn!(
                "connection lost: {}",
                disconnected.reason().unwrap_or("no reason given")
            );
        }
        Ok(())
    });

    cancel_on_ctrl_c(shutdown.clone());
    let report = pipeline.run(shutdown).await;
    capture.stop();
    let report = report.context("Capture pipeline stopped")?;
    tracing::info!(
        "Shutting down... {} chunks sent, {} dropped",
        report.chunks_sent(),
        report.chunks_dropped()
    );
    Ok(())
}

async fn restart(
    controller: &Controller,
    launcher: &BackgroundLauncher,
    shutdown: CancellationToken,
) -> Result<()> {
    match controller.on_restart().context("Failed to resume after restart")? {
        ResumeOutcome::Skipped(SkipReason::PermissionDenied) => {
            tracing::info!("restart: microphone permission denied, staying idle");
            Ok(())
        }
        ResumeOutcome::Skipped(SkipReason::MonitoringDisabled) => {
            tracing::info!("restart: monitoring disabled, staying idle");
            Ok(())
        }
        ResumeOutcome::Started => {
            cancel_on_ctrl_c(shutdown);
            if let Some(report) = launcher.wait().await? {
                tracing::info!(
                    "background capture stopped: {} chunks sent, {} dropped",
                    report.chunks_sent(),
                    report.chunks_dropped()
                );
            }
            Ok(())
        }
    }
}
