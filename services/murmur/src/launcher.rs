use crate::config::{AUDIO_QUEUE_CAPACITY, Config};
use anyhow::Context;
use murmur_core::{CapturePipeline, PipelineLauncher, PipelineReport};
use murmur_native::capture::{CaptureHandle, spawn_capture};
use murmur_realtime::types::{Event, EventCategory};
use murmur_realtime::{Session, SessionError};
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type PipelineTask = JoinHandle<Result<PipelineReport, SessionError>>;

/// Opens the microphone and builds a session pipeline fed by it.
///
/// Subscribe through [`CapturePipeline::session`] before running it.
pub fn build_pipeline(config: &Config) -> anyhow::Result<(CapturePipeline, CaptureHandle)> {
    let token = SecretString::from(config.token()?.expose_secret().to_string());
    let (chunks_tx, chunks_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
    let capture = spawn_capture(config.input_device.clone(), chunks_tx)
        .context("Failed to start microphone capture")?;

    let session = Session::new(config.session_config());
    session.subscribe(EventCategory::Error, |event| {
        if let Event::Error(fault) = event {
            if fault.is_fatal() {
                tracing::error!("session fault ({:?}): {}", fault.kind(), fault.message());
            } else {
                tracing::warn!("session fault ({:?}): {}", fault.kind(), fault.message());
            }
        }
        Ok(())
    });

    Ok((CapturePipeline::new(session, token, chunks_rx), capture))
}

/// Runs the capture pipeline as a background task of the current runtime.
#[derive(Clone)]
pub struct BackgroundLauncher {
    config: Arc<Config>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<PipelineTask>>>,
}

impl BackgroundLauncher {
    pub fn new(config: Arc<Config>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for a launched pipeline to finish. `None` if nothing was launched.
    pub async fn wait(&self) -> anyhow::Result<Option<PipelineReport>> {
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(task) = task else {
            return Ok(None);
        };
        let report = task
            .await
            .context("Background pipeline task failed")?
            .context("Background pipeline stopped")?;
        Ok(Some(report))
    }
}

impl PipelineLauncher for BackgroundLauncher {
    fn launch(&self) -> anyhow::Result<()> {
        let (pipeline, capture) = build_pipeline(&self.config)?;
        // The network is often not up yet right after boot.
        let pipeline = pipeline
            .with_connect_retries(self.config.max_reconnect_attempts, self.config.base_delay);
        pipeline
            .session()
            .subscribe(EventCategory::TranscriptFinal, |event| {
                if let Event::TranscriptFinal(transcript) = event {
                    tracing::info!("transcript: {}", transcript.text());
                }
                Ok(())
            });

        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let result = pipeline.run(shutdown).await;
            // Releases the microphone; the capture thread exits on its own.
            drop(capture);
            if let Err(e) = &result {
                tracing::error!("background capture abandoned: {}", e);
            }
            result
        });

        match self.task.lock() {
            Ok(mut slot) => *slot = Some(task),
            Err(poisoned) => *poisoned.into_inner() = Some(task),
        }
        Ok(())
    }
}
