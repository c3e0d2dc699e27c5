//! HTTP portal
//!
//! Server and client in one: applied functions are served at
//! `POST /functions/{name}`, service methods at
//! `POST /services/{service}/{method}`. Resolving an address that points at
//! this portal gives direct dispatch; any other `http://` address gives a
//! proxy that POSTs to it.

mod client;
pub mod middleware;
mod server;

pub use client::HttpCaller;
pub use middleware::{Handler, HttpRequest, HttpResponse, Middleware, RequestId};

use self::server::{HttpState, ServerHandle};
use super::{advertised_host, ensure_scheme, Lifecycle, Portal};
use crate::config::HttpPortalConfig;
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{Function, FunctionHandle, RemoteFunction};
use crate::metrics::PortalMetrics;
use crate::registry::FunctionRegistry;
use crate::service::{RemoteService, Service, ServiceHandle, ServiceRegistry};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use portico_core::{Address, SCHEME_HTTP, SCHEME_HTTPS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const SCHEMES: &[&str] = &[SCHEME_HTTP, SCHEME_HTTPS];

/// Call target encoded in an HTTP path
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Function(String),
    Service(String),
    Method(String, String),
}

impl Route {
    /// `functions/{name}`, `services/{service}` or `services/{service}/{method}`
    pub(crate) fn from_segments<S: AsRef<str>>(segments: &[S]) -> Option<Self> {
        let segments: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
        match segments.as_slice() {
            ["functions", name] => Some(Route::Function(name.to_string())),
            ["services", service] => Some(Route::Service(service.to_string())),
            ["services", service, method] => {
                Some(Route::Method(service.to_string(), method.to_string()))
            }
            _ => None,
        }
    }

    pub(crate) fn from_address(address: &Address) -> PortalResult<Self> {
        let segments: Vec<&str> = address.path_segments().collect();
        Self::from_segments(&segments).ok_or_else(|| {
            PortalError::invalid_address(format!(
                "{} does not name a function, service or method",
                address
            ))
        })
    }

    /// Registry-style name: `name` or `service.method`
    pub(crate) fn function_name(&self) -> String {
        match self {
            Route::Function(name) | Route::Service(name) => name.clone(),
            Route::Method(service, method) => format!("{}.{}", service, method),
        }
    }
}

/// Names travel as one path segment each, so they cannot carry `/`
fn path_segment<'a>(kind: &str, name: &'a str) -> PortalResult<&'a str> {
    if name.contains('/') {
        return Err(PortalError::invalid_argument(format!(
            "{} name '{}' cannot contain '/'",
            kind, name
        )));
    }
    Ok(name)
}

/// Portal serving and calling functions over HTTP
pub struct HttpPortal {
    state: Arc<HttpState>,
    middlewares: RwLock<Vec<Middleware>>,
    caller: Arc<HttpCaller>,
    lifecycle: Lifecycle,
    server: Mutex<Option<ServerHandle>>,
}

impl Default for HttpPortal {
    fn default() -> Self {
        Self::new(HttpPortalConfig::default())
    }
}

impl HttpPortal {
    pub fn new(config: HttpPortalConfig) -> Self {
        let caller = Arc::new(HttpCaller::new(config.client_timeout()));
        Self {
            state: Arc::new(HttpState {
                config,
                functions: FunctionRegistry::new(),
                services: ServiceRegistry::new(),
                metrics: PortalMetrics::new(),
                created_at: Instant::now(),
            }),
            middlewares: RwLock::new(Vec::new()),
            caller,
            lifecycle: Lifecycle::new("http"),
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HttpPortalConfig {
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

    /// Add a middleware; takes effect on the next `start`
    pub fn use_middleware(&self, middleware: Middleware) {
        self.middlewares.write().push(middleware);
    }

    /// Bound socket address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|server| server.local_addr)
    }

    /// `http://host:port` this portal advertises in the addresses it returns
    pub fn base_address(&self) -> PortalResult<Address> {
        let port = self
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.state.config.port);
        let mut builder = Address::builder()
            .scheme(SCHEME_HTTP)
            .host(advertised_host(&self.state.config.host));
        if port != 0 {
            builder = builder.port(port);
        }
        Ok(builder.build()?)
    }

    /// Whether `address` points at this portal instance
    fn is_own(&self, address: &Address) -> bool {
        if address.scheme() != SCHEME_HTTP {
            return false;
        }
        let port = self
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.state.config.port);
        if port == 0 || address.port().unwrap_or(80) != port {
            return false;
        }
        let host = address.host();
        host == self.state.config.host
            || host == advertised_host(&self.state.config.host)
            || host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
    }

    fn direct(&self, route: &Route) -> PortalResult<Arc<dyn Function>> {
        match route {
            Route::Function(name) => self
                .state
                .functions
                .get(name)
                .ok_or_else(|| PortalError::not_found(format!("function '{}'", name))),
            Route::Method(service, method) => self
                .state
                .services
                .get_service_method(service, method)
                .ok_or_else(|| {
                    PortalError::not_found(format!("method '{}' on service '{}'", method, service))
                }),
            Route::Service(service) => Err(PortalError::invalid_address(format!(
                "'{}' is a service; resolve it as a service or address one of its methods",
                service
            ))),
        }
    }
}

impl std::fmt::Debug for HttpPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPortal")
            .field("bind", &self.state.config.bind_addr())
            .field("local_addr", &self.local_addr())
            .field("running", &self.lifecycle.is_running())
            .finish()
    }
}

#[async_trait]
impl Portal for HttpPortal {
    fn name(&self) -> &'static str {
        "http"
    }

    fn schemes(&self) -> &'static [&'static str] {
        SCHEMES
    }

    async fn apply(
        &self,
        _ctx: &CallContext,
        function: Arc<dyn Function>,
    ) -> PortalResult<Address> {
        let name = path_segment("function", function.name())?.to_string();
        let address = self.base_address()?.with_path(format!("/functions/{}", name));
        self.state.functions.register(&name, function)?;
        debug!("Applied HTTP function {}", address);
        Ok(address)
    }

    async fn apply_service(&self, _ctx: &CallContext, service: Service) -> PortalResult<Address> {
        path_segment("service", service.name())?;
        for method in service.schema().method_names() {
            path_segment("method", &method)?;
        }
        let address = self
            .base_address()?
            .with_path(format!("/services/{}", service.name()));
        self.state.services.register(&service)?;
        debug!("Applied HTTP service {}", address);
        Ok(address)
    }

    async fn resolve_function(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle> {
        ensure_scheme(self, address)?;
        ctx.check()?;
        let route = Route::from_address(address)?;

        if self.is_own(address) {
            return self.direct(&route).map(FunctionHandle::Direct);
        }
        if let Route::Service(_) = route {
            return Err(PortalError::invalid_address(format!(
                "{} names a service, not a function",
                address
            )));
        }

        Ok(FunctionHandle::Remote(RemoteFunction::new(
            route.function_name(),
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
        let name = match Route::from_address(address)? {
            Route::Service(name) => name,
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

        let middlewares = self.middlewares.read().clone();
        match server::serve(self.state.clone(), &middlewares).await {
            Ok(handle) => {
                self.lifecycle
                    .log_started(&format!("on http://{}", handle.local_addr));
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
                debug!("HTTP accept loop ended abnormally: {}", e);
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
