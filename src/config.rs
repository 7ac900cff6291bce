//! Configuration for the server and client multiplexers
//!
//! Both sides must agree on `BUFFER_SIZE`; no negotiation takes place.

use std::time::Duration;

use crate::peer::BacklogLimit;

/// Scratch buffer size used for every non-blocking read
pub const BUFFER_SIZE: usize = 1024;

/// Default host for both server and client
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5000;

/// Capacity of the readiness event batch
pub const DEFAULT_MAX_EVENTS: usize = 128;

/// Outbound backlog above which a peer is watched for stalling
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

/// How long a peer over the backlog limit may go without taking a byte
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the client waits for an outbound connection to complete
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Server multiplexer settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub buffer_size: usize,
    pub max_events: usize,
    pub max_pending_bytes: usize,
    /// A peer over `max_pending_bytes` that writes nothing for this long is dropped
    pub stall_timeout: Duration,
    /// Upper bound on a single readiness wait (`None` blocks until woken)
    pub poll_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` as given, before resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backlog_limit(&self) -> BacklogLimit {
        BacklogLimit {
            max_bytes: self.max_pending_bytes,
            stall_timeout: self.stall_timeout,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buffer_size: BUFFER_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            poll_timeout: None,
        }
    }
}

/// Client multiplexer settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Display name; the host application decides how to use it
    pub name: String,
    pub buffer_size: usize,
    pub max_pending_bytes: usize,
    pub stall_timeout: Duration,
    pub connect_timeout: Duration,
    pub poll_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backlog_limit(&self) -> BacklogLimit {
        BacklogLimit {
            max_bytes: self.max_pending_bytes,
            stall_timeout: self.stall_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            name: "anonymous".to_string(),
            buffer_size: BUFFER_SIZE,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_timeout: None,
        }
    }
}
