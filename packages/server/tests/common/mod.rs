//! Shared fixtures for the portal integration tests
//!
//! Servers always bind `127.0.0.1:0`; read the bound address back through
//! `local_addr()` after `start`.

#![allow(dead_code)]

use portico::{
    BoxError, CallContext, Function, FunctionData, HttpPortal, HttpPortalConfig, NativeFunction, Portal,
    WebSocketPortal, WebSocketPortalConfig,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG=portico=debug` to see traffic
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ========== Function fixtures ==========

/// `add(a, b) = {"result": a + b}`
pub fn add() -> Arc<dyn Function> {
    NativeFunction::sync("add", |data| {
        let a = data.get_f64("a").ok_or("missing 'a'")?;
        let b = data.get_f64("b").ok_or("missing 'b'")?;
        Ok(FunctionData::new().with("result", a + b))
    })
    .shared()
}

/// `echo(message) = {"echo": message}`
pub fn echo() -> Arc<dyn Function> {
    NativeFunction::sync("echo", |data| {
        let message = data.get("message").cloned().unwrap_or(Value::Null);
        Ok(FunctionData::new().with("echo", message))
    })
    .shared()
}

/// Sleeps for `delay` before answering `{"slept_ms": ..}`
pub fn slow(name: &str, delay: Duration) -> Arc<dyn Function> {
    NativeFunction::from_async(name, move |_ctx, _data| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, BoxError>(FunctionData::new().with("slept_ms", delay.as_millis() as u64))
    })
    .shared()
}

/// Always fails with `message`
pub fn failing(name: &str, message: &'static str) -> Arc<dyn Function> {
    NativeFunction::sync(name, move |_| Err(message.into())).shared()
}

// ========== Portal fixtures ==========

pub fn http_config() -> HttpPortalConfig {
    HttpPortalConfig::default()
        .with_port(0)
        .with_client_timeout(Duration::from_secs(5))
}

pub fn ws_config() -> WebSocketPortalConfig {
    WebSocketPortalConfig::default()
        .with_port(0)
        .with_call_timeout(Duration::from_secs(5))
}

pub async fn started_http(config: HttpPortalConfig) -> HttpPortal {
    init_tracing();
    let portal = HttpPortal::new(config);
    portal.start(&CallContext::new()).await.unwrap();
    portal
}

pub async fn started_ws(config: WebSocketPortalConfig) -> WebSocketPortal {
    init_tracing();
    let portal = WebSocketPortal::new(config);
    portal.start(&CallContext::new()).await.unwrap();
    portal
}

// ========== Raw HTTP ==========

/// Parsed HTTP/1.1 response
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Send one request over a fresh connection and read until the server closes
///
/// `extra_headers` are raw `Name: value` lines.
pub async fn raw_http(
    addr: SocketAddr,
    method: &str,
    path: &str,
    extra_headers: &[&str],
    body: &str,
) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: {}\r\n",
        method,
        path,
        addr,
        body.len()
    );
    for header in extra_headers {
        request.push_str(header);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request.push_str(body);
    stream.write_all(request.as_bytes()).await.unwrap();

    // A server rejecting the request early may reset instead of closing
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
        }
    }
    parse_response(&String::from_utf8_lossy(&raw))
}

pub async fn post_json(addr: SocketAddr, path: &str, body: &str) -> RawResponse {
    raw_http(addr, "POST", path, &["Content-Type: application/json"], body).await
}

fn parse_response(raw: &str) -> RawResponse {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();

    RawResponse {
        status,
        headers,
        body: body.to_string(),
    }
}
