//! Services: named groups of methods over a shared schema
//!
//! Registering a service expands every schema-declared method into a
//! `"<service>.<method>"` function inside the registry's own
//! [`FunctionRegistry`]. Dispatch goes through a [`ServiceInstance`], normally
//! a [`DispatchTable`] built once at registration time (method name -> typed
//! closure). Services registered without an instance answer every method with
//! a placeholder describing the unbound call.

use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{
    Function, FunctionHandle, FunctionWrapper, RemoteCaller, RemoteFunction,
};
use crate::registry::{FunctionMetadata, FunctionRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use portico_core::{Address, FunctionData, FunctionSchema, ServiceSchema};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// A bound receiver that can dispatch methods by name
pub trait ServiceInstance: Send + Sync {
    /// Handler for `method`, if the instance implements it
    fn method(&self, method: &str) -> Option<FunctionWrapper>;

    fn has_method(&self, method: &str) -> bool {
        self.method(method).is_some()
    }
}

/// Method name -> handler table
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    methods: HashMap<String, FunctionWrapper>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, method: impl Into<String>, wrapper: FunctionWrapper) -> Self {
        self.methods.insert(method.into(), wrapper);
        self
    }

    pub fn sync<F>(self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(FunctionData) -> Result<FunctionData, crate::error::BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(method, FunctionWrapper::from_sync(f))
    }

    pub fn from_async<F, Fut>(self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallContext, FunctionData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionData, crate::error::BoxError>> + Send + 'static,
    {
        self.insert(method, FunctionWrapper::from_async(f))
    }

    /// Start a table whose handlers receive `receiver`
    pub fn bind<T: Send + Sync + 'static>(receiver: Arc<T>) -> BoundTable<T> {
        BoundTable {
            receiver,
            table: DispatchTable::new(),
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ServiceInstance for DispatchTable {
    fn method(&self, method: &str) -> Option<FunctionWrapper> {
        self.methods.get(method).cloned()
    }
}

/// Builder for a [`DispatchTable`] over a shared receiver
pub struct BoundTable<T> {
    receiver: Arc<T>,
    table: DispatchTable,
}

impl<T: Send + Sync + 'static> BoundTable<T> {
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, FunctionData) -> Result<FunctionData, crate::error::BoxError>
            + Send
            + Sync
            + 'static,
    {
        let receiver = self.receiver.clone();
        self.table = self
            .table
            .insert(name, FunctionWrapper::from_sync(move |data| f(&receiver, data)));
        self
    }

    pub fn method_async<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<T>, CallContext, FunctionData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionData, crate::error::BoxError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        self.table = self.table.insert(
            name,
            FunctionWrapper::from_async(move |ctx, data| f(receiver.clone(), ctx, data)),
        );
        self
    }

    pub fn build(self) -> DispatchTable {
        self.table
    }
}

/// A service definition as handed to a portal
#[derive(Clone)]
pub struct Service {
    name: String,
    schema: ServiceSchema,
    instance: Option<Arc<dyn ServiceInstance>>,
}

impl Service {
    /// A service named after its schema
    pub fn new(schema: ServiceSchema) -> Self {
        Self {
            name: schema.name.clone(),
            schema,
            instance: None,
        }
    }

    pub fn named(name: impl Into<String>, schema: ServiceSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            instance: None,
        }
    }

    pub fn with_instance(mut self, instance: impl ServiceInstance + 'static) -> Self {
        self.instance = Some(Arc::new(instance));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }

    pub fn instance(&self) -> Option<&Arc<dyn ServiceInstance>> {
        self.instance.as_ref()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.schema.method_names())
            .field("bound", &self.instance.is_some())
            .finish()
    }
}

/// The function synthesized for one service method
struct ServiceMethod {
    full_name: String,
    service: String,
    method: String,
    schema: FunctionSchema,
    handler: Option<FunctionWrapper>,
}

#[async_trait]
impl Function for ServiceMethod {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn schema(&self) -> Option<&FunctionSchema> {
        Some(&self.schema)
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData> {
        ctx.check()?;
        match &self.handler {
            Some(handler) => ctx
                .run(async {
                    handler
                        .call(ctx, data)
                        .await
                        .map_err(|e| PortalError::execution(&self.full_name, e))
                })
                .await,
            None => Ok(FunctionData::from(json!({
                "service": self.service,
                "method": self.method,
                "bound": false,
                "params": data.into_json(),
            }))),
        }
    }
}

/// A registered service and its expanded methods
pub struct RegisteredService {
    name: String,
    schema: ServiceSchema,
    instance: Option<Arc<dyn ServiceInstance>>,
    methods: HashMap<String, Arc<dyn Function>>,
    metadata: FunctionMetadata,
    registered_at: DateTime<Utc>,
}

impl RegisteredService {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }

    pub fn is_bound(&self) -> bool {
        self.instance.is_some()
    }

    pub fn method(&self, method: &str) -> Option<Arc<dyn Function>> {
        self.methods.get(method).cloned()
    }

    /// Method names in declaration order
    pub fn method_names(&self) -> Vec<String> {
        self.schema.method_names()
    }

    pub fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

impl fmt::Debug for RegisteredService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredService")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .field("bound", &self.is_bound())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Thread-safe service registry backed by its own function registry
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<RegisteredService>>>,
    functions: FunctionRegistry,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `"service.method"` functions
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register an unbound service
    pub fn register_service(&self, name: &str, schema: ServiceSchema) -> PortalResult<()> {
        self.insert(name, schema, None)
    }

    /// Register a service dispatching to `instance`
    ///
    /// Fails with `InvalidArgument` when the instance lacks a declared method.
    pub fn register_service_with_instance(
        &self,
        name: &str,
        schema: ServiceSchema,
        instance: Arc<dyn ServiceInstance>,
    ) -> PortalResult<()> {
        for method in &schema.methods {
            if !instance.has_method(&method.name) {
                return Err(PortalError::invalid_argument(format!(
                    "service '{}' instance does not implement method '{}'",
                    name, method.name
                )));
            }
        }
        self.insert(name, schema, Some(instance))
    }

    /// Register a [`Service`] under its own name
    pub fn register(&self, service: &Service) -> PortalResult<()> {
        match service.instance() {
            Some(instance) => self.register_service_with_instance(
                service.name(),
                service.schema().clone(),
                instance.clone(),
            ),
            None => self.register_service(service.name(), service.schema().clone()),
        }
    }

    fn insert(
        &self,
        name: &str,
        schema: ServiceSchema,
        instance: Option<Arc<dyn ServiceInstance>>,
    ) -> PortalResult<()> {
        if name.is_empty() {
            return Err(PortalError::invalid_argument("service name cannot be empty"));
        }

        let mut services = self.services.write();
        if services.contains_key(name) {
            return Err(PortalError::duplicate(name));
        }

        let mut methods: HashMap<String, Arc<dyn Function>> = HashMap::new();
        let mut added: Vec<String> = Vec::with_capacity(schema.methods.len());

        for method_schema in &schema.methods {
            let full_name = format!("{}.{}", name, method_schema.name);
            let function: Arc<dyn Function> = Arc::new(ServiceMethod {
                full_name: full_name.clone(),
                service: name.to_string(),
                method: method_schema.name.clone(),
                schema: method_schema.clone(),
                handler: instance
                    .as_ref()
                    .and_then(|instance| instance.method(&method_schema.name)),
            });

            let metadata = FunctionMetadata::new()
                .with_tag(format!("service:{}", name))
                .with_description(method_schema.description.clone());

            if let Err(e) = self
                .functions
                .register_with_metadata(&full_name, function.clone(), metadata)
            {
                for rollback in &added {
                    let _ = self.functions.unregister(rollback);
                }
                return Err(e);
            }

            added.push(full_name);
            methods.insert(method_schema.name.clone(), function);
        }

        let registered_at = Utc::now();
        let metadata = FunctionMetadata {
            registered_at,
            description: schema.description.clone(),
            ..FunctionMetadata::default()
        };

        info!(
            "Registered service {} ({} methods, bound: {})",
            name,
            methods.len(),
            instance.is_some()
        );

        services.insert(
            name.to_string(),
            Arc::new(RegisteredService {
                name: name.to_string(),
                schema,
                instance,
                methods,
                metadata,
                registered_at,
            }),
        );
        Ok(())
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<RegisteredService>> {
        self.services.read().get(name).cloned()
    }

    pub fn get_service_method(&self, service: &str, method: &str) -> Option<Arc<dyn Function>> {
        self.get_service(service)?.method(method)
    }

    pub fn list_services(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub fn list_service_methods(&self, service: &str) -> PortalResult<Vec<String>> {
        self.get_service(service)
            .map(|registered| registered.method_names())
            .ok_or_else(|| PortalError::not_found(format!("service '{}'", service)))
    }

    /// Every method of every service, as `"service.method"`
    pub fn list_all_methods(&self) -> Vec<String> {
        self.services
            .read()
            .values()
            .flat_map(|registered| {
                registered
                    .method_names()
                    .into_iter()
                    .map(move |method| format!("{}.{}", registered.name, method))
            })
            .collect()
    }

    /// Remove a service and its `"service.method"` functions
    pub fn unregister_service(&self, name: &str) -> PortalResult<()> {
        let removed = self
            .services
            .write()
            .remove(name)
            .ok_or_else(|| PortalError::not_found(format!("service '{}'", name)))?;

        for method in removed.method_names() {
            let _ = self.functions.unregister(&format!("{}.{}", name, method));
        }
        debug!("Unregistered service: {}", name);
        Ok(())
    }

    pub async fn call_service_method(
        &self,
        ctx: &CallContext,
        service: &str,
        method: &str,
        params: FunctionData,
    ) -> PortalResult<FunctionData> {
        let registered = self
            .get_service(service)
            .ok_or_else(|| PortalError::not_found(format!("service '{}'", service)))?;
        let function = registered.method(method).ok_or_else(|| {
            PortalError::not_found(format!("method '{}' on service '{}'", method, service))
        })?;
        function.call(ctx, params).await
    }

    pub fn count(&self) -> usize {
        self.services.read().len()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    pub fn clear(&self) {
        self.services.write().clear();
        self.functions.clear();
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.list_services())
            .finish()
    }
}

/// Proxy to a service behind a network portal
#[derive(Clone)]
pub struct RemoteService {
    name: String,
    address: Address,
    caller: Arc<dyn RemoteCaller>,
}

impl RemoteService {
    pub fn new(name: impl Into<String>, address: Address, caller: Arc<dyn RemoteCaller>) -> Self {
        Self {
            name: name.into(),
            address,
            caller,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// A resolved service: registry entry or remote proxy
#[derive(Clone)]
pub enum ServiceHandle {
    Direct(Arc<RegisteredService>),
    Remote(RemoteService),
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        match self {
            ServiceHandle::Direct(registered) => registered.name(),
            ServiceHandle::Remote(remote) => &remote.name,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ServiceHandle::Remote(_))
    }

    /// Declared methods; unknown for remote services
    pub fn methods(&self) -> Option<Vec<String>> {
        match self {
            ServiceHandle::Direct(registered) => Some(registered.method_names()),
            ServiceHandle::Remote(_) => None,
        }
    }

    pub fn method(&self, method: &str) -> PortalResult<FunctionHandle> {
        match self {
            ServiceHandle::Direct(registered) => registered
                .method(method)
                .map(FunctionHandle::Direct)
                .ok_or_else(|| {
                    PortalError::not_found(format!(
                        "method '{}' on service '{}'",
                        method, registered.name
                    ))
                }),
            ServiceHandle::Remote(remote) => {
                let address = remote.caller.method_address(&remote.address, method)?;
                Ok(FunctionHandle::Remote(RemoteFunction::new(
                    format!("{}.{}", remote.name, method),
                    address,
                    remote.caller.clone(),
                )))
            }
        }
    }

    pub async fn call(
        &self,
        ctx: &CallContext,
        method: &str,
        data: FunctionData,
    ) -> PortalResult<FunctionData> {
        self.method(method)?.call(ctx, data).await
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceHandle::Direct(registered) => f.debug_tuple("Direct").field(registered).finish(),
            ServiceHandle::Remote(remote) => f
                .debug_tuple("Remote")
                .field(&remote.address.to_string())
                .finish(),
        }
    }
}
