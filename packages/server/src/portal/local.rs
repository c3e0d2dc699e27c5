//! In-process portal
//!
//! Addresses are `local://{function}`, `local://{service}` and
//! `local://{service}/{method}`. Resolution is always direct; there is no
//! proxy path.
//!
//! Plain functions and service methods share one namespace: `local://Svc.M`
//! names either a function called `Svc.M` or method `M` of service `Svc`, so
//! applying one when the other exists is a `DuplicateName`.

use super::{ensure_scheme, Lifecycle, Portal};
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{Function, FunctionHandle};
use crate::registry::FunctionRegistry;
use crate::service::{Service, ServiceHandle, ServiceRegistry};
use async_trait::async_trait;
use portico_core::{Address, SCHEME_LOCAL};
use std::sync::Arc;
use tracing::debug;

const SCHEMES: &[&str] = &[SCHEME_LOCAL];

/// Portal dispatching within the current process
#[derive(Debug)]
pub struct LocalPortal {
    functions: FunctionRegistry,
    services: ServiceRegistry,
    lifecycle: Lifecycle,
}

impl Default for LocalPortal {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPortal {
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            services: ServiceRegistry::new(),
            lifecycle: Lifecycle::new("local"),
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    fn lookup(&self, address: &Address) -> PortalResult<Arc<dyn Function>> {
        let name = address.host();
        let mut segments = address.path_segments();

        match segments.next() {
            Some(method) => self.services.get_service_method(name, method).ok_or_else(|| {
                PortalError::not_found(format!("method '{}' on service '{}'", method, name))
            }),
            None => self
                .functions
                .get(name)
                .or_else(|| self.services.functions().get(name))
                .ok_or_else(|| PortalError::not_found(format!("function '{}'", name))),
        }
    }
}

#[async_trait]
impl Portal for LocalPortal {
    fn name(&self) -> &'static str {
        "local"
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
        let address = Address::local(name.as_str())?;
        if self.services.functions().exists(&name) {
            return Err(PortalError::duplicate(name));
        }
        self.functions.register(&name, function)?;
        debug!("Applied local function {}", address);
        Ok(address)
    }

    async fn apply_service(&self, _ctx: &CallContext, service: Service) -> PortalResult<Address> {
        let address = Address::local(service.name())?;
        if let Some(taken) = service
            .schema()
            .method_names()
            .into_iter()
            .map(|method| format!("{}.{}", service.name(), method))
            .find(|full_name| self.functions.exists(full_name))
        {
            return Err(PortalError::duplicate(taken));
        }
        self.services.register(&service)?;
        debug!("Applied local service {}", address);
        Ok(address)
    }

    async fn resolve_function(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle> {
        ensure_scheme(self, address)?;
        ctx.check()?;
        self.lookup(address).map(FunctionHandle::Direct)
    }

    async fn resolve_service(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<ServiceHandle> {
        ensure_scheme(self, address)?;
        ctx.check()?;
        self.services
            .get_service(address.host())
            .map(ServiceHandle::Direct)
            .ok_or_else(|| PortalError::not_found(format!("service '{}'", address.host())))
    }

    async fn start(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.begin_start()?;
        self.lifecycle.log_started("in-process");
        Ok(())
    }

    async fn stop(&self, _ctx: &CallContext) -> PortalResult<()> {
        if self.lifecycle.begin_stop() {
            self.lifecycle.log_stopped();
        }
        Ok(())
    }

    async fn health(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.check()
    }
}
