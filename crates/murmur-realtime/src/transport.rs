//! The seam between a session and the network.

pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use crate::error::SessionError;
use async_trait::async_trait;
use futures_util::{Sink, Stream};
use murmur_types::RawMessage;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportFailure(pub String);

/// What the read half of a transport yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Message(RawMessage),
    /// The peer closed the connection, optionally with a reason.
    Closed(Option<String>),
}

pub type TransportSink = Pin<Box<dyn Sink<RawMessage, Error = TransportFailure> + Send>>;
pub type TransportStream = Pin<Box<dyn Stream<Item = Result<Incoming, TransportFailure>> + Send>>;

/// One open duplex connection. Exclusively owned by the session that opened it.
pub struct Transport {
    pub sink: TransportSink,
    pub stream: TransportStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<RawMessage, Error = TransportFailure> + Send + 'static,
        St: Stream<Item = Result<Incoming, TransportFailure>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Everything a connector needs to open the streaming endpoint.
#[derive(Clone)]
pub struct ConnectRequest {
    endpoint: String,
    token_param: String,
    token: Arc<SecretString>,
}

impl ConnectRequest {
    pub fn new(endpoint: &str, token_param: &str, token: Arc<SecretString>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token_param: token_param.to_string(),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// The endpoint with the bearer token appended as a query parameter.
    pub fn authorized_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair(&self.token_param, self.token.expose_secret());
        Ok(url)
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("endpoint", &self.endpoint)
            .field("token_param", &self.token_param)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Opens transports. Implementations map a rejected handshake to
/// [`SessionError::Auth`] and every other failure to [`SessionError::Transport`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ConnectRequest) -> Result<Transport, SessionError>;
}
