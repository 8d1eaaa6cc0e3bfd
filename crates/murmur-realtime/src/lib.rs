//! Streaming session client.
//!
//! A [`Session`] owns one logical relationship with the speech backend: it
//! performs the `connected` handshake, forwards audio and commands while
//! CONNECTED, reconnects with exponential backoff after involuntary closes,
//! and fans inbound events out through its own [`EventBroker`].
mod error;

pub mod broker;
pub mod session;
pub mod transport;

pub use murmur_types as types;

pub use broker::{EventBroker, SubscriptionHandle};
pub use error::SessionError;
pub use session::{
    Delivery, Session, SessionConfig, SessionConfigBuilder, SessionState, Stats, Status,
    backoff_delay,
};
pub use transport::websocket::WebSocketConnector;
pub use transport::{ConnectRequest, Connector, Incoming, Transport, TransportFailure};

/// Creates a session with `config` over WebSocket and connects it with `token`.
pub async fn connect_with_config(
    config: SessionConfig,
    token: &str,
) -> Result<Session, SessionError> {
    let session = Session::new(config);
    session.connect(token).await?;
    Ok(session)
}

/// Connects with the default configuration.
pub async fn connect(token: &str) -> Result<Session, SessionError> {
    connect_with_config(SessionConfig::new(), token).await
}
