/// Endpoint configuration for the Kraken WebSocket API.
use std::time::Duration;

/// Supported Kraken server environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Beta,
}

/// Endpoint set for a specific environment.
///
/// Kraken splits the WebSocket API across two hosts: market data on the
/// public host, order management and account streams on the auth host.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub public_ws_url: String,
    pub private_ws_url: String,
    pub rest_base: String,
}

impl EndpointConfig {
    pub fn from_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                public_ws_url: "wss://ws.kraken.com".into(),
                private_ws_url: "wss://ws-auth.kraken.com".into(),
                rest_base: "https://api.kraken.com".into(),
            },
            Environment::Beta => Self {
                public_ws_url: "wss://beta-ws.kraken.com".into(),
                private_ws_url: "wss://beta-ws-auth.kraken.com".into(),
                rest_base: "https://api.beta.kraken.com".into(),
            },
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from_environment(Environment::Production)
    }
}

/// Configuration for connection and request behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base delay between reconnect attempts (default: 1s).
    pub base_delay: Duration,
    /// Maximum delay between reconnect attempts (default: 60s).
    pub max_delay: Duration,
    /// Maximum number of reconnect attempts (default: 10, 0 = infinite).
    pub max_attempts: usize,
    /// Interval between transport-level ping frames (default: 30s).
    pub ping_interval: Duration,
    /// Timeout for pong response before forcing a reconnect (default: 60s).
    pub pong_timeout: Duration,
    /// Deadline for each request/response round trip (default: 10s).
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}
