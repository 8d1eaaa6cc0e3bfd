use crate::error::SessionError;
use crate::transport::{ConnectRequest, Connector, Incoming, Transport, TransportFailure};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use murmur_types::RawMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Opens sessions over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Transport, SessionError> {
        let url = request
            .authorized_url()
            .map_err(|e| SessionError::Transport(format!("invalid endpoint: {}", e)))?;
        let ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        tracing::debug!("opening websocket to {}", request.endpoint());
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(map_connect_error)?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportFailure(e.to_string()))
            .with(|message: RawMessage| future::ready(Ok::<_, TransportFailure>(to_ws(message))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Incoming::Message(RawMessage::Text(text)))),
                Ok(Message::Binary(bytes)) => {
                    Some(Ok(Incoming::Message(RawMessage::Binary(bytes))))
                }
                Ok(Message::Close(frame)) => Some(Ok(Incoming::Closed(
                    frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)),
                ))),
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(TransportFailure(e.to_string()))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
}

fn to_ws(message: RawMessage) -> Message {
    match message {
        RawMessage::Text(text) => Message::Text(text),
        RawMessage::Binary(bytes) => Message::Binary(bytes),
    }
}

fn map_connect_error(error: WsError) -> SessionError {
    match error {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            SessionError::Auth(format!("upgrade rejected with {}", response.status()))
        }
        other => SessionError::Transport(other.to_string()),
    }
}
