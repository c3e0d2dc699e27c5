//! Portal configuration
//!
//! Plain serde structs with per-field defaults, so a JSON file only needs the
//! keys it wants to change:
//!
//! ```json
//! {
//!   "http": { "port": 8080, "cors": { "allowed_origins": ["https://app.example"] } },
//!   "websocket": { "port": 8081, "path": "/rpc" }
//! }
//! ```

use crate::error::{PortalError, PortalResult};
use portico_core::CorsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// HTTP portal configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPortalConfig {
    /// Bind host (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port; 0 lets the OS choose (default: 8080)
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Largest accepted request body in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Server-side bound on one function call (default: 30s)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bound on one outgoing proxy call (default: 30s)
    #[serde(default = "default_request_timeout_ms")]
    pub client_timeout_ms: u64,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Serve `GET /metrics` (default: true)
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

/// WebSocket portal configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketPortalConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port; 0 lets the OS choose (default: 8081)
    #[serde(default = "default_ws_port")]
    pub port: u16,

    /// Upgrade path (default: /ws)
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Ping interval in milliseconds; 0 disables pings (default: 30s)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Largest accepted frame in bytes (default: 64KB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound frames buffered per connection (default: 64)
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Read deadline of one client round trip (default: 30s)
    #[serde(default = "default_request_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_ws_port() -> u16 {
    8081
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_body_size() -> usize {
    1024 * 1024
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_max_message_size() -> usize {
    64 * 1024
}
fn default_outbound_queue_size() -> usize {
    64
}
fn default_true() -> bool {
    true
}

impl Default for HttpPortalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
            max_body_size: default_max_body_size(),
            request_timeout_ms: default_request_timeout_ms(),
            client_timeout_ms: default_request_timeout_ms(),
            cors: CorsConfig::default(),
            enable_metrics: true,
        }
    }
}

impl HttpPortalConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WebSocketPortalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ws_port(),
            path: default_ws_path(),
            ping_interval_ms: default_ping_interval_ms(),
            max_message_size: default_max_message_size(),
            outbound_queue_size: default_outbound_queue_size(),
            call_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl WebSocketPortalConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Upgrade path; a leading `/` is added when missing
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_outbound_queue_size(mut self, frames: usize) -> Self {
        self.outbound_queue_size = frames;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for every network portal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub http: HttpPortalConfig,
    #[serde(default)]
    pub websocket: WebSocketPortalConfig,
}

impl PortalConfig {
    pub fn from_json_str(json: &str) -> PortalResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PortalResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PortalError::invalid_argument(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PortalConfig::default();
        assert_eq!(config.http.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.websocket.path, "/ws");
        assert_eq!(config.websocket.ping_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.websocket.max_message_size, 64 * 1024);
        assert_eq!(config.http.cors.allowed_origins, vec!["*"]);
    }

    #[test]
    fn test_partial_json() {
        let config = PortalConfig::from_json_str(
            r#"{"http": {"port": 0, "max_body_size": 16}, "websocket": {"path": "/rpc", "ping_interval_ms": 0}}"#,
        )
        .unwrap();

        assert_eq!(config.http.port, 0);
        assert_eq!(config.http.max_body_size, 16);
        assert_eq!(config.http.host, "127.0.0.1");
        assert!(config.http.enable_metrics);
        assert_eq!(config.websocket.path, "/rpc");
        assert_eq!(config.websocket.ping_interval(), None);
        assert_eq!(config.websocket.port, 8081);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"websocket": {{"call_timeout_ms": 250}}}}"#).unwrap();

        let config = PortalConfig::from_file(file.path()).unwrap();
        assert_eq!(config.websocket.call_timeout(), Duration::from_millis(250));

        assert!(matches!(
            PortalConfig::from_file("/nonexistent/portico.json"),
            Err(PortalError::InvalidArgument { .. })
        ));
        assert!(matches!(
            PortalConfig::from_json_str("not json"),
            Err(PortalError::Serialization(_))
        ));
    }

    #[test]
    fn test_with_path_normalizes() {
        assert_eq!(WebSocketPortalConfig::default().with_path("rpc").path, "/rpc");
    }

    #[test]
    fn test_sub_second_ping_interval() {
        let config = WebSocketPortalConfig::default().with_ping_interval(Duration::from_millis(250));
        assert_eq!(config.ping_interval_ms, 250);
        assert_eq!(config.ping_interval(), Some(Duration::from_millis(250)));
    }
}
