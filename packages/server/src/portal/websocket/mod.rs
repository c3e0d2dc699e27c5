//! WebSocket portal
//!
//! Persistent, bidirectional JSON frames on one path (default `/ws`).
//! Targets travel in the query of the address:
//! - `ws://host:port/ws?function={name}`
//! - `ws://host:port/ws?service={service}`
//! - `ws://host:port/ws?service={service}&method={method}`
//!
//! Besides request/response calls the server can push frames to every open
//! connection ([`WebSocketPortal::broadcast`]) or to one of them
//! ([`WebSocketPortal::send_to_client`]).

mod client;
pub mod message;
mod server;

pub use client::WsCaller;
pub use message::{MessageType, WsMessage};

use self::server::{ServerHandle, WsState};
use super::{advertised_host, ensure_scheme, Lifecycle, Portal};
use crate::config::WebSocketPortalConfig;
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{Function, FunctionHandle, RemoteCaller, RemoteFunction};
use crate::metrics::PortalMetrics;
use crate::registry::FunctionRegistry;
use crate::service::{RemoteService, Service, ServiceHandle, ServiceRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use portico_core::{Address, FunctionData, SCHEME_WS, SCHEME_WSS};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

const SCHEMES: &[&str] = &[SCHEME_WS, SCHEME_WSS];

/// Call target encoded in a WebSocket address query
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Function(String),
    Service(String),
    Method(String, String),
}

impl Target {
    pub(crate) fn from_address(address: &Address) -> PortalResult<Self> {
        let function = address.query_param("function").filter(|s| !s.is_empty());
        let service = address.query_param("service").filter(|s| !s.is_empty());
        let method = address.query_param("method").filter(|s| !s.is_empty());

        match (function, service, method) {
            (Some(function), None, None) => Ok(Target::Function(function.to_string())),
            (None, Some(service), None) => Ok(Target::Service(service.to_string())),
            (None, Some(service), Some(method)) => {
                Ok(Target::Method(service.to_string(), method.to_string()))
            }
            _ => Err(PortalError::invalid_address(format!(
                "{} needs a 'function' or 'service' query parameter",
                address
            ))),
        }
    }

    pub(crate) fn function_name(&self) -> String {
        match self {
            Target::Function(name) | Target::Service(name) => name.clone(),
            Target::Method(service, method) => format!("{}.{}", service, method),
        }
    }

    /// The `call` frame for this target
    pub(crate) fn call_message(&self, id: String, data: FunctionData) -> PortalResult<WsMessage> {
        match self {
            Target::Function(name) => Ok(WsMessage::call_function(id, name.clone(), data)),
            Target::Method(service, method) => Ok(WsMessage::call_method(
                id,
                service.clone(),
                method.clone(),
                data,
            )),
            Target::Service(service) => Err(PortalError::invalid_address(format!(
                "service '{}' is not callable without a method",
                service
            ))),
        }
    }
}

/// Portal serving and calling functions over WebSocket
pub struct WebSocketPortal {
    state: Arc<WsState>,
    caller: Arc<WsCaller>,
    lifecycle: Lifecycle,
    server: Mutex<Option<ServerHandle>>,
}

impl Default for WebSocketPortal {
    fn default() -> Self {
        Self::new(WebSocketPortalConfig::default())
    }
}

impl WebSocketPortal {
    pub fn new(config: WebSocketPortalConfig) -> Self {
        let caller = Arc::new(WsCaller::new(config.call_timeout(), config.max_message_size));
        Self {
            state: Arc::new(WsState::new(config)),
            caller,
            lifecycle: Lifecycle::new("websocket"),
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WebSocketPortalConfig {
        &self.state.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.state.functions
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.state.services
    }

    pub fn metrics(&self) -> &PortalMetrics {
        &self.state.metrics
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|server| server.local_addr)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    /// Ids of the open connections
    pub fn connection_ids(&self) -> Vec<String> {
        self.state.connection_ids()
    }

    /// Push `message` to every open connection
    ///
    /// Connections that can no longer accept frames are closed and removed.
    /// Returns the number of connections the frame was queued on.
    pub fn broadcast(&self, message: &WsMessage) -> PortalResult<usize> {
        self.lifecycle.check()?;
        self.state.broadcast(message)
    }

    /// Push `message` to one connection
    pub async fn send_to_client(&self, connection_id: &str, message: &WsMessage) -> PortalResult<()> {
        self.lifecycle.check()?;
        self.state.send_to(connection_id, message).await
    }

    /// Client side: one round trip to the function at `address` over a fresh
    /// connection, whether or not this portal is running
    pub async fn call_function(
        &self,
        ctx: &CallContext,
        address: &Address,
        data: FunctionData,
    ) -> PortalResult<FunctionData> {
        ensure_scheme(self, address)?;
        self.caller.call_remote(ctx, address, data).await
    }

    /// `ws://host:port{path}` this portal advertises
    pub fn base_address(&self) -> PortalResult<Address> {
        let port = self.port();
        let mut builder = Address::builder()
            .scheme(SCHEME_WS)
            .host(advertised_host(&self.state.config.host))
            .path(self.state.config.path.clone());
        if port != 0 {
            builder = builder.port(port);
        }
        Ok(builder.build()?)
    }

    fn port(&self) -> u16 {
        self.local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.state.config.port)
    }

    fn is_own(&self, address: &Address) -> bool {
        let port = self.port();
        if address.scheme() != SCHEME_WS || port == 0 || address.port().unwrap_or(80) != port {
            return false;
        }
        if address.path() != self.state.config.path {
            return false;
        }
        let host = address.host();
        host == self.state.config.host
            || host == advertised_host(&self.state.config.host)
            || host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
    }

    fn direct(&self, target: &Target) -> PortalResult<Arc<dyn Function>> {
        match target {
            Target::Function(name) => self
                .state
                .functions
                .get(name)
                .ok_or_else(|| PortalError::not_found(format!("function '{}'", name))),
            Target::Method(service, method) => self
                .state
                .services
                .get_service_method(service, method)
                .ok_or_else(|| {
                    PortalError::not_found(format!("method '{}' on service '{}'", method, service))
                }),
            Target::Service(service) => Err(PortalError::invalid_address(format!(
                "'{}' is a service; resolve it as a service or address one of its methods",
                service
            ))),
        }
    }
}

impl std::fmt::Debug for WebSocketPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketPortal")
            .field("bind", &self.state.config.bind_addr())
            .field("path", &self.state.config.path)
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[async_trait]
impl Portal for WebSocketPortal {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn schemes(&self) -> &'static [&'static str] {
        SCHEMES
    }

    async fn apply(
        &self,
        _ctx: &CallContext,
        function: Arc<dyn Function>,
    ) -> PortalResult<Address> {
        let name = function.name().to_string();
        let address = self.base_address()?.with_query("function", name.clone());
        self.state.functions.register(&name, function)?;
        debug!("Applied WebSocket function {}", address);
        Ok(address)
    }

    async fn apply_service(&self, _ctx: &CallContext, service: Service) -> PortalResult<Address> {
        let address = self
            .base_address()?
            .with_query("service", service.name().to_string());
        self.state.services.register(&service)?;
        debug!("Applied WebSocket service {}", address);
        Ok(address)
    }

    async fn resolve_function(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle> {
        ensure_scheme(self, address)?;
        ctx.check()?;
        let target = Target::from_address(address)?;

        if self.is_own(address) {
            return self.direct(&target).map(FunctionHandle::Direct);
        }
        if let Target::Service(_) = target {
            return Err(PortalError::invalid_address(format!(
                "{} names a service, not a function",
                address
            )));
        }

        Ok(FunctionHandle::Remote(RemoteFunction::new(
            target.function_name(),
            address.clone(),
            self.caller.clone(),
        )))
    }

    async fn resolve_service(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<ServiceHandle> {
        ensure_scheme(self, address)?;
        ctx.check()?;
        let name = match Target::from_address(address)? {
            Target::Service(name) => name,
            _ => {
                return Err(PortalError::invalid_address(format!(
                    "{} is not a service address",
                    address
                )))
            }
        };

        if self.is_own(address) {
            return self
                .state
                .services
                .get_service(&name)
                .map(ServiceHandle::Direct)
                .ok_or_else(|| PortalError::not_found(format!("service '{}'", name)));
        }

        Ok(ServiceHandle::Remote(RemoteService::new(
            name,
            address.clone(),
            self.caller.clone(),
        )))
    }

    async fn start(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.begin_start()?;

        match server::serve(self.state.clone()).await {
            Ok(handle) => {
                self.lifecycle.log_started(&format!(
                    "on ws://{}{}",
                    handle.local_addr, self.state.config.path
                ));
                *self.server.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.lifecycle.abort_start();
                Err(e)
            }
        }
    }

    async fn stop(&self, _ctx: &CallContext) -> PortalResult<()> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }

        let handle = self.server.lock().take();
        if let Some(handle) = handle {
            handle.shutdown.trigger();
            if let Err(e) = handle.accept_task.await {
                debug!("WebSocket accept loop ended abnormally: {}", e);
            }
            handle.shutdown.drain_connections().await;
        }
        self.lifecycle.log_stopped();
        Ok(())
    }

    async fn health(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::NativeFunction;

    #[test]
    fn test_target_parsing() {
        let address = Address::parse("ws://h:1/ws?service=Users&method=Get").unwrap();
        assert_eq!(
            Target::from_address(&address).unwrap(),
            Target::Method("Users".into(), "Get".into())
        );

        let address = Address::parse("ws://h:1/ws?function=echo").unwrap();
        assert_eq!(Target::from_address(&address).unwrap().function_name(), "echo");

        let address = Address::parse("ws://h:1/ws").unwrap();
        assert!(matches!(
            Target::from_address(&address),
            Err(PortalError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_address_shape() {
        let portal = WebSocketPortal::new(WebSocketPortalConfig::default().with_port(9091));
        let address = portal
            .apply(&CallContext::new(), NativeFunction::sync("echo", Ok).shared())
            .await
            .unwrap();
        assert_eq!(address.scheme(), "ws");
        assert_eq!(address.port(), Some(9091));
        assert_eq!(address.path(), "/ws");
        assert_eq!(address.query_param("function"), Some("echo"));

        let handle = portal
            .resolve_function(&CallContext::new(), &address)
            .await
            .unwrap();
        assert!(!handle.is_remote());
    }

    #[tokio::test]
    async fn test_resolve_remote_service() {
        let portal = WebSocketPortal::default();
        let address = Address::parse("ws://10.0.0.9:9000/ws?service=Users").unwrap();
        let handle = portal
            .resolve_service(&CallContext::new(), &address)
            .await
            .unwrap();
        assert!(handle.is_remote());
        let method = handle.method("Get").unwrap();
        assert_eq!(method.name(), "Users.Get");
        assert_eq!(
            method.remote_address().unwrap().query_param("method"),
            Some("Get")
        );
    }

    #[tokio::test]
    async fn test_push_needs_running_portal() {
        let portal = WebSocketPortal::default();
        assert!(matches!(
            portal.broadcast(&WsMessage::ping("x")),
            Err(PortalError::NotRunning { .. })
        ));
        assert!(matches!(
            portal.send_to_client("nobody", &WsMessage::ping("x")).await,
            Err(PortalError::NotRunning { .. })
        ));
    }
}
