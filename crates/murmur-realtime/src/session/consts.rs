use std::time::Duration;

pub const ENDPOINT_VAR: &str = "MURMUR_ENDPOINT";

pub const DEFAULT_ENDPOINT: &str = "wss://localhost:8080/stream";
pub const DEFAULT_TOKEN_PARAM: &str = "token";

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How long a closed link may take to flush before its transport is dropped.
pub const LINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
