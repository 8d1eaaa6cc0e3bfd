//! In-memory connector for driving a [`Session`](crate::Session) without a network.
//!
//! Every successful `open` hands the test a [`ServerEnd`] through the receiver
//! returned by [`MemoryConnector::new`].

use crate::error::SessionError;
use crate::transport::{ConnectRequest, Connector, Incoming, Transport, TransportFailure};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use murmur_types::RawMessage;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// How the next `open` call behaves.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Open and acknowledge with a `connected` frame straight away.
    Handshake,
    /// Open without acknowledging; the test drives the handshake.
    Accept,
    /// Open, then close before the handshake completes.
    AcceptThenClose(String),
    /// Reject the upgrade as unauthorized.
    Reject(String),
    /// Fail to reach the endpoint.
    Fail(String),
}

/// The backend's side of one in-memory transport.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Result<Incoming, TransportFailure>>,
    from_client: mpsc::UnboundedReceiver<RawMessage>,
    token: String,
}

impl ServerEnd {
    /// The bearer token the client connected with.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn send_connected(&self) -> bool {
        self.send_text(r#"{"type":"connected","session_id":"memory"}"#)
    }

    pub fn send_json(&self, value: serde_json::Value) -> bool {
        self.send_text(&value.to_string())
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.push(Ok(Incoming::Message(RawMessage::Text(text.to_string()))))
    }

    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.push(Ok(Incoming::Message(RawMessage::Binary(bytes))))
    }

    /// Server-initiated close.
    pub fn close(&self, reason: &str) -> bool {
        self.push(Ok(Incoming::Closed(Some(reason.to_string()))))
    }

    /// Network-level read error.
    pub fn fail(&self, reason: &str) -> bool {
        self.push(Err(TransportFailure(reason.to_string())))
    }

    /// Next message written by the client, `None` once the client hung up.
    pub async fn next_sent(&mut self) -> Option<RawMessage> {
        self.from_client.next().await
    }

    fn push(&self, item: Result<Incoming, TransportFailure>) -> bool {
        self.to_client.unbounded_send(item).is_ok()
    }
}

struct Script {
    queued: VecDeque<OpenOutcome>,
    fallback: OpenOutcome,
    opened_at: Vec<Instant>,
}

pub struct MemoryConnector {
    script: Mutex<Script>,
    ends: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    /// `fallback` applies whenever no scripted outcome is queued.
    pub fn new(fallback: OpenOutcome) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (ends, ends_rx) = mpsc::unbounded();
        let connector = Self {
            script: Mutex::new(Script {
                queued: VecDeque::new(),
                fallback,
                opened_at: Vec::new(),
            }),
            ends,
        };
        (Arc::new(connector), ends_rx)
    }

    /// Queues the outcome of a future `open`, in call order.
    pub fn script(&self, outcome: OpenOutcome) {
        self.lock().queued.push_back(outcome);
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.lock().opened_at.len()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.lock().opened_at.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Transport, SessionError> {
        let outcome = {
            let mut script = self.lock();
            script.opened_at.push(Instant::now());
            let fallback = script.fallback.clone();
            script.queued.pop_front().unwrap_or(fallback)
        };

        match &outcome {
            OpenOutcome::Reject(reason) => return Err(SessionError::Auth(reason.clone())),
            OpenOutcome::Fail(reason) => return Err(SessionError::Transport(reason.clone())),
            _ => {}
        }

        let (to_client, client_rx) = mpsc::unbounded();
        let (client_tx, from_client) = mpsc::unbounded();
        let end = ServerEnd {
            to_client,
            from_client,
            token: request.token().expose_secret().to_string(),
        };

        match &outcome {
            OpenOutcome::Handshake => {
                end.send_connected();
            }
            OpenOutcome::AcceptThenClose(reason) => {
                end.close(reason);
            }
            _ => {}
        }

        // Nobody listening for server ends is fine for fully scripted tests.
        let _ = self.ends.unbounded_send(end);

        let sink = client_tx.sink_map_err(|e| TransportFailure(e.to_string()));
        Ok(Transport::new(sink, client_rx))
    }
}
