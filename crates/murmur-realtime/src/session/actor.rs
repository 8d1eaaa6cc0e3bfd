//! The task that owns a session's state.
//!
//! Every transition runs here, one message at a time. Timers, handshakes and
//! link I/O run in their own tasks and report back through [`Signal`]s tagged
//! with the generation they were started under; a signal whose generation is
//! no longer current is ignored.

use crate::broker::EventBroker;
use crate::error::SessionError;
use crate::session::backoff::backoff_delay;
use crate::session::consts::LINK_CLOSE_TIMEOUT;
use crate::session::stats::Stats;
use crate::session::{OutboundSlot, SessionConfig, SessionState, Status, update_stats};
use crate::transport::{
    ConnectRequest, Connector, Incoming, Transport, TransportSink, TransportStream,
};
use futures_util::{SinkExt, StreamExt};
use murmur_types::codec::{self, InboundFrame};
use murmur_types::events::ConnectedEvent;
use murmur_types::{DisconnectedEvent, Event, Fault, FaultKind, RawMessage, ServerEvent};
use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) type ConnectReply = oneshot::Sender<Result<(), SessionError>>;

pub(crate) enum Command {
    Connect {
        token: SecretString,
        reply: ConnectReply,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) enum Signal {
    Established {
        generation: u64,
        result: Result<(Transport, ConnectedEvent), SessionError>,
    },
    ReconnectDue {
        generation: u64,
    },
    Inbound {
        generation: u64,
        message: RawMessage,
    },
    LinkLost {
        generation: u64,
        reason: String,
    },
}

pub(crate) struct Actor {
    config: Arc<SessionConfig>,
    connector: Arc<dyn Connector>,
    broker: EventBroker,
    stats: Arc<Mutex<Stats>>,
    outbound: OutboundSlot,
    status: watch::Sender<Status>,
    signals: mpsc::UnboundedSender<Signal>,

    state: SessionState,
    generation: u64,
    reconnect_attempt: u32,
    token: Option<Arc<SecretString>>,
    // The reconnect timer or handshake in flight, if any.
    pending: Option<CancellationToken>,
    pending_connect: Option<ConnectReply>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    // Cancelled once both halves of the last closed link have been dropped.
    teardown: Option<CancellationToken>,
}

impl Actor {
    pub(crate) fn new(
        config: Arc<SessionConfig>,
        connector: Arc<dyn Connector>,
        broker: EventBroker,
        stats: Arc<Mutex<Stats>>,
        outbound: OutboundSlot,
        status: watch::Sender<Status>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            config,
            connector,
            broker,
            stats,
            outbound,
            status,
            signals,
            state: SessionState::Disconnected,
            generation: 0,
            reconnect_attempt: 0,
            token: None,
            pending: None,
            pending_connect: None,
            reader: None,
            writer: None,
            teardown: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every Session handle is gone.
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }
        self.cancel_pending();
        self.close_link();
        tracing::debug!("session task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { token, reply } => self.connect(token, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Established { generation, result } if generation == self.generation => {
                self.pending = None;
                match result {
                    Ok((transport, connected)) => self.on_established(transport, connected),
                    Err(error) => self.on_establish_failed(error),
                }
            }
            Signal::ReconnectDue { generation }
                if generation == self.generation && self.state == SessionState::Reconnecting =>
            {
                tracing::info!("reconnect attempt {} starting", self.reconnect_attempt);
                self.start_establish();
            }
            Signal::Inbound {
                generation,
                message,
            } if generation == self.generation && self.state == SessionState::Connected => {
                self.on_inbound(message);
            }
            Signal::LinkLost { generation, reason }
                if generation == self.generation && self.state == SessionState::Connected =>
            {
                self.on_link_lost(reason);
            }
            _ => tracing::trace!("ignoring stale session signal"),
        }
    }

    fn connect(&mut self, token: SecretString, reply: ConnectReply) {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Closed => {
                let _ = reply.send(Err(SessionError::Closed));
                return;
            }
            other => {
                let _ = reply.send(Err(SessionError::InvalidState(other)));
                return;
            }
        }
        debug_assert!(
            self.reader.is_none() && self.writer.is_none(),
            "previous transport must be closed before connecting"
        );

        self.token = Some(Arc::new(token));
        self.reconnect_attempt = 0;
        self.advance_generation();
        self.pending_connect = Some(reply);
        self.set_state(SessionState::Connecting);
        self.start_establish();
    }

    fn disconnect(&mut self) {
        // CLOSED stays CLOSED; both idle states only drop subscriptions.
        if matches!(self.state, SessionState::Closed | SessionState::Disconnected) {
            self.broker.clear();
            return;
        }

        self.cancel_pending();
        self.advance_generation();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(SessionError::Cancelled));
        }
        self.close_link();
        self.token = None;
        self.reconnect_attempt = 0;
        self.set_state(SessionState::Disconnected);
        self.broker.clear();
        tracing::info!("session disconnected");
    }

    fn start_establish(&mut self) {
        let Some(token) = self.token.clone() else {
            tracing::error!("no token available for connecting");
            return;
        };
        let request = ConnectRequest::new(
            self.config.endpoint(),
            self.config.token_param(),
            token,
        );
        let connector = self.connector.clone();
        let handshake_timeout = self.config.handshake_timeout();
        let signals = self.signals.clone();
        let generation = self.generation;
        let teardown = self.teardown.clone();

        let cancel = CancellationToken::new();
        self.pending = Some(cancel.clone());

        tokio::spawn(async move {
            let attempt = async {
                // The previous transport must be gone before another one opens.
                if let Some(teardown) = teardown {
                    teardown.cancelled().await;
                }
                establish(connector, request, handshake_timeout).await
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = attempt => result,
            };
            let _ = signals.send(Signal::Established { generation, result });
        });
    }

    fn on_established(&mut self, transport: Transport, connected: ConnectedEvent) {
        self.attach_link(transport);
        self.reconnect_attempt = 0;
        update_stats(&self.stats, Stats::record_connection);
        self.set_state(SessionState::Connected);
        tracing::info!(
            "session connected (id: {})",
            connected.session_id().unwrap_or("unknown")
        );
        self.broker.publish(&Event::Connected(connected));
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn on_establish_failed(&mut self, error: SessionError) {
        if let SessionError::Auth(message) = &error {
            tracing::error!("handshake rejected: {}", message);
            let fault = Fault::new(FaultKind::Auth, message.as_str()).fatal();
            self.close_session(fault);
        } else if self.state == SessionState::Reconnecting {
            tracing::warn!(
                "reconnect attempt {} failed: {}",
                self.reconnect_attempt,
                error
            );
            self.broker
                .publish(&Event::Error(Fault::new(FaultKind::Transport, error.to_string())));
            self.schedule_reconnect();
            return;
        } else {
            tracing::warn!("connect failed: {}", error);
            self.token = None;
            self.set_state(SessionState::Disconnected);
            self.broker
                .publish(&Event::Error(Fault::new(FaultKind::Transport, error.to_string())));
        }
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn on_inbound(&mut self, message: RawMessage) {
        update_stats(&self.stats, Stats::record_received);
        let event = match codec::decode(message) {
            Ok(InboundFrame::Audio(bytes)) => Event::AudioChunk(bytes),
            Ok(InboundFrame::Control(ServerEvent::Connected(_))) => {
                tracing::debug!("ignoring repeated `connected` frame");
                return;
            }
            Ok(InboundFrame::Control(event)) => Event::from(event),
            Err(e) => {
                update_stats(&self.stats, Stats::record_malformed);
                tracing::warn!("malformed frame: {}", e);
                Event::Error(Fault::malformed(&e))
            }
        };
        self.broker.publish(&event);
    }

    fn on_link_lost(&mut self, reason: String) {
        tracing::warn!("connection lost: {}", reason);
        self.close_link();
        self.advance_generation();
        self.set_state(SessionState::Reconnecting);
        self.broker
            .publish(&Event::Disconnected(DisconnectedEvent::new(Some(reason))));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let max = self.config.max_reconnect_attempts();
        if self.reconnect_attempt >= max {
            tracing::error!("giving up after {} reconnect attempts", self.reconnect_attempt);
            let error = SessionError::RetryExhausted {
                attempts: self.reconnect_attempt,
            };
            self.close_session(Fault::new(FaultKind::RetryExhausted, error.to_string()).fatal());
            return;
        }

        let delay = backoff_delay(self.config.base_delay(), self.reconnect_attempt);
        self.reconnect_attempt += 1;
        update_stats(&self.stats, Stats::record_reconnect_scheduled);
        self.set_state(SessionState::Reconnecting);
        tracing::info!(
            "reconnect attempt {}/{} in {:?}",
            self.reconnect_attempt,
            max,
            delay
        );

        let cancel = CancellationToken::new();
        self.pending = Some(cancel.clone());
        let signals = self.signals.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(Signal::ReconnectDue { generation });
                }
            }
        });
    }

    /// Terminal failure: nothing survives except the subscriptions, which
    /// still receive `fault`.
    fn close_session(&mut self, fault: Fault) {
        self.cancel_pending();
        self.close_link();
        self.advance_generation();
        self.token = None;
        self.set_state(SessionState::Closed);
        self.broker.publish(&Event::Error(fault));
    }

    fn attach_link(&mut self, transport: Transport) {
        debug_assert!(
            self.reader.is_none()
                && self.writer.is_none()
                && self.teardown.as_ref().is_none_or(CancellationToken::is_cancelled),
            "previous transport must be released before attaching a new one"
        );
        let Transport { sink, stream } = transport;
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity());
        self.outbound.open(tx);

        let generation = self.generation;
        self.writer = Some(tokio::spawn(write_loop(
            sink,
            rx,
            generation,
            self.signals.clone(),
        )));
        self.reader = Some(tokio::spawn(read_loop(
            stream,
            generation,
            self.signals.clone(),
        )));
    }

    /// Stops accepting outbound frames and lets the writer flush and close
    /// the sink. The reader is aborted. The link counts as released only
    /// once `teardown` is cancelled.
    fn close_link(&mut self) {
        self.outbound.close();
        let reader = self.reader.take();
        let writer = self.writer.take();
        if reader.is_none() && writer.is_none() {
            return;
        }
        let done = CancellationToken::new();
        self.teardown = Some(done.clone());
        tokio::spawn(release_link(reader, writer, done));
    }

    fn cancel_pending(&mut self) {
        if let Some(cancel) = self.pending.take() {
            cancel.cancel();
        }
    }

    fn advance_generation(&mut self) {
        self.generation += 1;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!("session state {} -> {}", self.state, state);
        }
        self.state = state;
        self.status.send_replace(Status {
            state,
            reconnect_attempt: self.reconnect_attempt,
            generation: self.generation,
        });
    }
}

async fn release_link(
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    if let Some(reader) = reader {
        reader.abort();
        let _ = reader.await;
    }
    if let Some(mut writer) = writer {
        if tokio::time::timeout(LINK_CLOSE_TIMEOUT, &mut writer).await.is_err() {
            tracing::warn!(
                "transport did not close within {:?}, dropping it",
                LINK_CLOSE_TIMEOUT
            );
            writer.abort();
            let _ = writer.await;
        }
    }
    tracing::debug!("previous transport released");
}

async fn establish(
    connector: Arc<dyn Connector>,
    request: ConnectRequest,
    handshake_timeout: std::time::Duration,
) -> Result<(Transport, ConnectedEvent), SessionError> {
    let attempt = async {
        let mut transport = connector.open(&request).await?;
        let connected = await_connected(&mut transport.stream).await?;
        Ok((transport, connected))
    };
    match tokio::time::timeout(handshake_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Transport(format!(
            "no `connected` frame within {:?}",
            handshake_timeout
        ))),
    }
}

async fn await_connected(stream: &mut TransportStream) -> Result<ConnectedEvent, SessionError> {
    while let Some(item) = stream.next().await {
        match item {
            Ok(Incoming::Message(RawMessage::Text(text))) => match codec::decode_control(&text) {
                Ok(ServerEvent::Connected(connected)) => return Ok(connected),
                Ok(ServerEvent::Error(error)) => {
                    return Err(SessionError::Auth(error.message().to_string()));
                }
                Ok(other) => tracing::warn!(
                    "discarding `{}` frame received before `connected`",
                    other.type_name().unwrap_or("message")
                ),
                Err(e) => tracing::warn!("discarding malformed frame before `connected`: {}", e),
            },
            Ok(Incoming::Message(RawMessage::Binary(bytes))) => {
                tracing::warn!(
                    "discarding {} audio bytes received before `connected`",
                    bytes.len()
                );
            }
            Ok(Incoming::Closed(reason)) => {
                return Err(SessionError::Transport(format!(
                    "closed during handshake: {}",
                    reason.as_deref().unwrap_or("no reason")
                )));
            }
            Err(e) => return Err(SessionError::Transport(e.to_string())),
        }
    }
    Err(SessionError::Transport(
        "stream ended during handshake".to_string(),
    ))
}

async fn read_loop(
    mut stream: TransportStream,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Incoming::Message(message))) => {
                if signals.send(Signal::Inbound { generation, message }).is_err() {
                    return;
                }
            }
            Some(Ok(Incoming::Closed(reason))) => {
                break reason.unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };
    let _ = signals.send(Signal::LinkLost { generation, reason });
}

async fn write_loop(
    mut sink: TransportSink,
    mut outbound: mpsc::Receiver<RawMessage>,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::error!("failed to send message: {}", e);
            let _ = signals.send(Signal::LinkLost {
                generation,
                reason: e.to_string(),
            });
            return;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!("failed to close transport: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Delivery;
    use crate::transport::TransportFailure;
    use crate::Session;
    use crate::transport::memory::{MemoryConnector, OpenOutcome, ServerEnd};
    use async_trait::async_trait;
    use futures::channel::mpsc::UnboundedReceiver;
    use futures::{Sink, stream};
    use murmur_types::EventCategory;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    struct Harness {
        actor: Actor,
        signals: mpsc::UnboundedReceiver<Signal>,
        status: watch::Receiver<Status>,
        outbound: OutboundSlot,
        broker: EventBroker,
    }

    impl Harness {
        fn new(connector: Arc<dyn Connector>) -> Self {
            let config = SessionConfig::builder()
                .with_endpoint("wss://speech.test/stream")
                .with_base_delay(Duration::from_secs(2))
                .build();
            let (signals_tx, signals) = mpsc::unbounded_channel();
            let (status_tx, status) = watch::channel(Status {
                state: SessionState::Disconnected,
                reconnect_attempt: 0,
                generation: 0,
            });
            let outbound = OutboundSlot::default();
            let broker = EventBroker::new();
            let actor = Actor::new(
                Arc::new(config),
                connector,
                broker.clone(),
                Arc::new(Mutex::new(Stats::new())),
                outbound.clone(),
                status_tx,
                signals_tx,
            );
            Self {
                actor,
                signals,
                status,
                outbound,
                broker,
            }
        }

        fn connect(&mut self) -> oneshot::Receiver<Result<(), SessionError>> {
            let (reply, reply_rx) = oneshot::channel();
            self.actor
                .connect(SecretString::from("actor-token".to_string()), reply);
            reply_rx
        }

        async fn next_signal(&mut self) -> Signal {
            self.signals.recv().await.unwrap()
        }

        /// Connects and processes the handshake result.
        async fn connected(&mut self) {
            let reply = self.connect();
            let signal = self.next_signal().await;
            self.actor.handle_signal(signal);
            assert!(reply.await.unwrap().is_ok());
            assert_eq!(self.actor.state, SessionState::Connected);
        }
    }

    fn memory() -> (Arc<MemoryConnector>, UnboundedReceiver<ServerEnd>) {
        MemoryConnector::new(OpenOutcome::Handshake)
    }

    #[tokio::test(start_paused = true)]
    async fn queued_reconnect_signal_from_before_disconnect_opens_nothing() {
        // --- Arrange ---
        let (connector, mut ends) = memory();
        let mut harness = Harness::new(connector.clone());
        harness.connected().await;
        ends.next().await.unwrap().close("1006 abnormal");
        let lost = harness.next_signal().await;
        harness.actor.handle_signal(lost);
        assert_eq!(harness.actor.state, SessionState::Reconnecting);
        let stale = harness.actor.generation;

        // --- Act ---
        harness.actor.disconnect();
        harness
            .actor
            .handle_signal(Signal::ReconnectDue { generation: stale });
        tokio::time::sleep(Duration::from_secs(60)).await;

        // --- Assert ---
        assert_eq!(connector.open_count(), 1);
        assert_eq!(harness.actor.state, SessionState::Disconnected);
        assert_eq!(harness.status.borrow().state(), SessionState::Disconnected);
        assert!(harness.signals.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_result_from_before_disconnect_is_discarded() {
        // --- Arrange ---
        let (connector, mut ends) = memory();
        let mut harness = Harness::new(connector.clone());
        let reply = harness.connect();
        let established = harness.next_signal().await;
        assert!(matches!(
            &established,
            Signal::Established { result: Ok(_), .. }
        ));

        // --- Act ---
        harness.actor.disconnect();
        harness.actor.handle_signal(established);

        // --- Assert ---
        assert!(matches!(reply.await.unwrap(), Err(SessionError::Cancelled)));
        assert_eq!(harness.actor.state, SessionState::Disconnected);
        assert!(harness.actor.reader.is_none() && harness.actor.writer.is_none());
        assert_eq!(
            harness.outbound.try_send(RawMessage::Binary(vec![1])),
            Delivery::Dropped
        );
        // The stale transport was dropped, not attached.
        let mut end = ends.next().await.unwrap();
        assert_eq!(end.next_sent().await, None);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frame_from_an_old_link_is_not_published() {
        let (connector, _ends) = memory();
        let mut harness = Harness::new(connector);
        harness.connected().await;
        let stale = harness.actor.generation;
        harness.actor.disconnect();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        harness
            .broker
            .subscribe(EventCategory::TranscriptFinal, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        harness.actor.handle_signal(Signal::Inbound {
            generation: stale,
            message: RawMessage::Text(r#"{"type":"transcript_final","text":"late"}"#.to_string()),
        });

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    /// A transport whose sink needs 30 s to close, counting live transports.
    #[derive(Default)]
    struct SlowCloseConnector {
        live: Arc<AtomicUsize>,
        live_at_open: Mutex<Vec<usize>>,
    }

    struct SlowCloseSink {
        live: Arc<AtomicUsize>,
        closing: Option<Pin<Box<tokio::time::Sleep>>>,
    }

    impl Sink<RawMessage> for SlowCloseSink {
        type Error = TransportFailure;

        fn poll_ready(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _: RawMessage) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            let closing = self
                .closing
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(Duration::from_secs(30))));
            closing.as_mut().poll(cx).map(Ok)
        }
    }

    impl Drop for SlowCloseSink {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for SlowCloseConnector {
        async fn open(&self, _request: &ConnectRequest) -> Result<Transport, SessionError> {
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.live_at_open.lock().unwrap().push(live);
            let sink = SlowCloseSink {
                live: self.live.clone(),
                closing: None,
            };
            let connected = RawMessage::Text(r#"{"type":"connected"}"#.to_string());
            let incoming = stream::iter(vec![Ok(Incoming::Message(connected))])
                .chain(stream::pending::<Result<Incoming, TransportFailure>>());
            Ok(Transport::new(sink, incoming))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_waits_for_the_previous_transport_to_close() {
        // --- Arrange ---
        let connector = Arc::new(SlowCloseConnector::default());
        let config = SessionConfig::builder()
            .with_endpoint("wss://speech.test/stream")
            .build();
        let session = Session::with_connector(config, connector.clone());
        session.connect("t").await.unwrap();

        // --- Act ---
        session.disconnect().await;
        session.connect("t").await.unwrap();

        // --- Assert ---
        assert_eq!(*connector.live_at_open.lock().unwrap(), vec![1, 1]);
        assert_eq!(session.state(), SessionState::Connected);
    }
}
