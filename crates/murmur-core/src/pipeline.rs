use murmur_realtime::{Delivery, Session, SessionError, SessionState, backoff_delay};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Counters of a finished [`CapturePipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    chunks_sent: u64,
    chunks_dropped: u64,
}

impl PipelineReport {
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Chunks produced while the session was not CONNECTED. They are not replayed.
    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped
    }
}

/// Feeds captured audio chunks into a session.
pub struct CapturePipeline {
    session: Session,
    token: SecretString,
    audio: mpsc::Receiver<Vec<u8>>,
    connect_retries: u32,
    retry_delay: Duration,
}

impl CapturePipeline {
    pub fn new(session: Session, token: SecretString, audio: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            session,
            token,
            audio,
            connect_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Retries a first connect that fails at the transport level up to
    /// `retries` times, `base_delay * 2^n` apart. Auth failures are never retried.
    pub fn with_connect_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_delay = base_delay;
        self
    }

    /// Subscribe through this before calling [`run`](Self::run).
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connects and forwards audio until `shutdown` fires or the audio source
    /// ends, then disconnects.
    ///
    /// Returns [`SessionError::Closed`] if the session gives up on its own,
    /// e.g. after exhausting its reconnect attempts.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineReport, SessionError> {
        let Self {
            session,
            token,
            mut audio,
            connect_retries,
            retry_delay,
        } = self;

        let mut attempt = 0;
        loop {
            match session.connect(token.expose_secret()).await {
                Ok(()) => break,
                Err(SessionError::Transport(reason)) if attempt < connect_retries => {
                    let delay = backoff_delay(retry_delay, attempt);
                    attempt += 1;
                    tracing::warn!(
                        "connect failed ({}), retry {}/{} in {:?}",
                        reason,
                        attempt,
                        connect_retries,
                        delay
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(PipelineReport::default()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!("capture pipeline could not connect, giving up: {}", e);
                    return Err(e);
                }
            }
        }
        tracing::info!("capture pipeline running");

        let mut status = session.watch_status();
        let mut report = PipelineReport::default();
        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("capture pipeline shutting down");
                    break Ok(());
                }
                chunk = audio.recv() => match chunk {
                    Some(chunk) => match session.send_audio(chunk) {
                        Delivery::Sent => report.chunks_sent += 1,
                        Delivery::Dropped => report.chunks_dropped += 1,
                    },
                    None => {
                        tracing::info!("audio source ended");
                        break Ok(());
                    }
                },
                changed = status.changed() => {
                    let closed = changed.is_err()
                        || status.borrow_and_update().state() == SessionState::Closed;
                    if closed {
                        tracing::error!("session closed, stopping capture pipeline");
                        break Err(SessionError::Closed);
                    }
                }
            }
        };

        session.disconnect().await;
        tracing::info!(
            "capture pipeline stopped: {} chunks sent, {} dropped",
            report.chunks_sent,
            report.chunks_dropped
        );
        outcome.map(|()| report)
    }
}
