use crate::session::consts;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    endpoint: String,
    token_param: String,
    max_reconnect_attempts: u32,
    base_delay: Duration,
    handshake_timeout: Duration,
    outbound_capacity: usize,
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    /// Name of the query parameter carrying the bearer token.
    pub fn with_token_param(mut self, token_param: &str) -> Self {
        self.config.token_param = token_param.to_string();
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Frames queued per link before `send` starts dropping. At least 1.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    // The endpoint falls back to the local default when MURMUR_ENDPOINT is unset.
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var(consts::ENDPOINT_VAR)
                .unwrap_or_else(|_| consts::DEFAULT_ENDPOINT.to_string()),
            token_param: consts::DEFAULT_TOKEN_PARAM.to_string(),
            max_reconnect_attempts: consts::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: consts::DEFAULT_BASE_DELAY,
            handshake_timeout: consts::DEFAULT_HANDSHAKE_TIMEOUT,
            outbound_capacity: consts::DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn token_param(&self) -> &str {
        &self.token_param
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
