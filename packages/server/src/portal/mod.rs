//! Portals: transport adapters over the registries
//!
//! A portal registers callables under its transport (`apply`,
//! `apply_service`) and turns addresses back into callables
//! (`resolve_function`, `resolve_service`). Addresses owned by the portal
//! resolve to direct dispatch; well-formed remote addresses of a supported
//! scheme resolve to proxies performing a network round trip.

pub mod http;
pub mod local;
pub mod registry;
pub mod testing;
pub mod websocket;

use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{Function, FunctionHandle};
use crate::service::{Service, ServiceHandle};
use async_trait::async_trait;
use portico_core::Address;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub use http::HttpPortal;
pub use local::LocalPortal;
pub use registry::PortalRegistry;
pub use testing::{CallHistory, CallRecord, TestingPortal};
pub use websocket::WebSocketPortal;

/// Transport adapter contract
#[async_trait]
pub trait Portal: Send + Sync {
    /// Short transport name used in logs, errors and metrics
    fn name(&self) -> &'static str;

    /// URI schemes this portal answers to
    fn schemes(&self) -> &'static [&'static str];

    /// Register `function`; returns the address it is reachable at
    async fn apply(&self, ctx: &CallContext, function: Arc<dyn Function>)
        -> PortalResult<Address>;

    /// Register `service` and expose each of its methods
    async fn apply_service(&self, ctx: &CallContext, service: Service) -> PortalResult<Address>;

    async fn resolve_function(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle>;

    async fn resolve_service(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<ServiceHandle>;

    /// Fails with `AlreadyRunning` when already started
    async fn start(&self, ctx: &CallContext) -> PortalResult<()>;

    /// No-op when not running
    async fn stop(&self, ctx: &CallContext) -> PortalResult<()>;

    /// Fails with `NotRunning` while stopped
    async fn health(&self, ctx: &CallContext) -> PortalResult<()>;

    /// Whether `address` uses one of this portal's schemes
    fn supports(&self, address: &Address) -> bool {
        self.schemes().contains(&address.scheme())
    }
}

/// Running flag shared by every portal's start/stop/health
#[derive(Debug)]
pub(crate) struct Lifecycle {
    portal: &'static str,
    running: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new(portal: &'static str) -> Self {
        Self {
            portal,
            running: AtomicBool::new(false),
        }
    }

    /// Flip to running; `AlreadyRunning` if it was
    pub(crate) fn begin_start(&self) -> PortalResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PortalError::already_running(self.portal));
        }
        Ok(())
    }

    /// Undo a `begin_start` whose startup failed
    pub(crate) fn abort_start(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flip to stopped; false when it was not running
    pub(crate) fn begin_stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> PortalResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PortalError::not_running(self.portal))
        }
    }

    pub(crate) fn log_started(&self, detail: &str) {
        info!("{} portal started {}", self.portal, detail);
    }

    pub(crate) fn log_stopped(&self) {
        info!("{} portal stopped", self.portal);
    }
}

/// `UnsupportedScheme` unless `portal` answers to `address`'s scheme
pub(crate) fn ensure_scheme(portal: &dyn Portal, address: &Address) -> PortalResult<()> {
    if portal.supports(address) {
        Ok(())
    } else {
        Err(PortalError::unsupported_scheme(address.scheme()))
    }
}

/// Host to put in returned addresses; wildcard binds are advertised on loopback
pub(crate) fn advertised_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" | "[::]" | "" => "127.0.0.1",
        other => other,
    }
}
