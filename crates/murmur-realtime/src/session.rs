mod actor;
mod backoff;
mod config;
pub mod consts;
mod stats;

pub use backoff::backoff_delay;
pub use config::{SessionConfig, SessionConfigBuilder};
pub use stats::Stats;

use crate::broker::{EventBroker, SubscriptionHandle};
use crate::error::SessionError;
use crate::transport::Connector;
use crate::transport::websocket::WebSocketConnector;
use actor::{Actor, Command};
use murmur_types::codec::{self, OutboundFrame};
use murmur_types::{ClientCommand, Event, EventCategory, RawMessage};
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal. Recovering requires a new [`Session`].
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// A consistent view of the state machine, published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    state: SessionState,
    reconnect_attempt: u32,
    generation: u64,
}

impl Status {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of a `send`. Dropped frames are gone for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

/// Sender half of the current link's outbound queue, present only while CONNECTED.
#[derive(Clone, Default)]
pub(crate) struct OutboundSlot(Arc<Mutex<Option<mpsc::Sender<RawMessage>>>>);

impl OutboundSlot {
    pub(crate) fn open(&self, sender: mpsc::Sender<RawMessage>) {
        *self.guard() = Some(sender);
    }

    pub(crate) fn close(&self) {
        self.guard().take();
    }

    fn try_send(&self, message: RawMessage) -> Delivery {
        match self.guard().as_ref() {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => Delivery::Sent,
                Err(e) => {
                    tracing::trace!("outbound queue refused frame: {}", e);
                    Delivery::Dropped
                }
            },
            None => Delivery::Dropped,
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<mpsc::Sender<RawMessage>>> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn update_stats(stats: &Mutex<Stats>, update: impl FnOnce(&mut Stats)) {
    if let Ok(mut stats_guard) = stats.lock() {
        update(&mut stats_guard);
    } else {
        tracing::error!("failed to update stats");
    }
}

/// One logical streaming relationship with the backend.
///
/// The state machine runs on a background task spawned at construction, so a
/// session must be created inside a tokio runtime. Dropping the last handle
/// stops that task and closes any open transport.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    outbound: OutboundSlot,
    broker: EventBroker,
    stats: Arc<Mutex<Stats>>,
}

impl Session {
    /// A session speaking WebSocket to `config.endpoint()`.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status {
            state: SessionState::Disconnected,
            reconnect_attempt: 0,
            generation: 0,
        });
        let outbound = OutboundSlot::default();
        let broker = EventBroker::new();
        let stats = Arc::new(Mutex::new(Stats::new()));

        let actor = Actor::new(
            Arc::new(config),
            connector,
            broker.clone(),
            stats.clone(),
            outbound.clone(),
            status_tx,
            signals,
        );
        tokio::spawn(actor.run(commands_rx, signals_rx));

        Self {
            commands,
            status,
            outbound,
            broker,
            stats,
        }
    }

    /// Opens the transport and waits for the backend's `connected` frame.
    ///
    /// Only valid while DISCONNECTED. An auth rejection closes the session
    /// for good; any other failure leaves it DISCONNECTED.
    pub async fn connect(&self, token: &str) -> Result<(), SessionError> {
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                token: SecretString::from(token.to_string()),
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Cancels any pending reconnect or handshake, closes the transport and
    /// drops every subscription. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Queues `frame` on the open link. Never blocks and never buffers:
    /// outside CONNECTED, or with a full queue, the frame is dropped.
    pub fn send(&self, frame: OutboundFrame) -> Result<Delivery, SessionError> {
        let audio = frame.is_audio();
        let message = codec::encode(frame)?;
        let delivery = self.outbound.try_send(message);
        match delivery {
            Delivery::Sent => update_stats(&self.stats, |stats| stats.record_sent(audio)),
            Delivery::Dropped => update_stats(&self.stats, Stats::record_dropped),
        }
        Ok(delivery)
    }

    pub fn send_audio(&self, chunk: Vec<u8>) -> Delivery {
        // Audio frames are passed through as-is and cannot fail to encode.
        self.send(OutboundFrame::Audio(chunk))
            .unwrap_or(Delivery::Dropped)
    }

    pub fn speak(&self, text: &str) -> Result<Delivery, SessionError> {
        self.send(ClientCommand::speak(text).into())
    }

    pub fn ask(&self, text: &str) -> Result<Delivery, SessionError> {
        self.send(ClientCommand::ask(text).into())
    }

    /// Sends an arbitrary `{type, ...params}` command.
    pub fn command(
        &self,
        command_type: &str,
        params: Map<String, Value>,
    ) -> Result<Delivery, SessionError> {
        self.send(ClientCommand::custom(command_type, params).into())
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn state(&self) -> SessionState {
        self.status().state()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.status().reconnect_attempt()
    }

    /// Receives every status change, e.g. to drive a reconnecting indicator.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn subscribe<F>(&self, category: EventCategory, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.broker.subscribe(category, callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.broker.unsubscribe(handle)
    }

    /// Events of `category` as an async stream. The receiver ends once the
    /// session disconnects.
    pub fn events(
        &self,
        category: EventCategory,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        self.broker.subscribe_channel(category)
    }

    pub fn stats(&self) -> Stats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
