//! Function contracts
//!
//! A [`Function`] is a named, optionally schema-described unit that takes a
//! [`FunctionData`] and returns one. Portals hand out [`FunctionHandle`]s:
//! either a direct reference to a registered function or a remote proxy whose
//! `call` performs a network round trip through a [`RemoteCaller`]. Callers
//! see the same contract either way.

use crate::context::CallContext;
use crate::error::{BoxError, PortalError, PortalResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use portico_core::{Address, FunctionData, FunctionSchema};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A callable unit
#[async_trait]
pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    /// Descriptor used for boundary validation and documentation
    fn schema(&self) -> Option<&FunctionSchema> {
        None
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData>;
}

/// Synchronous handler
pub type SyncHandler = Arc<dyn Fn(FunctionData) -> Result<FunctionData, BoxError> + Send + Sync>;

/// Asynchronous handler (returns a boxed future)
pub type AsyncHandler = Arc<
    dyn Fn(CallContext, FunctionData) -> BoxFuture<'static, Result<FunctionData, BoxError>>
        + Send
        + Sync,
>;

/// Wrapper around sync or async closures
///
/// Lets registries, services and dispatch tables handle both kinds of
/// handlers through one interface.
#[derive(Clone)]
pub enum FunctionWrapper {
    /// Synchronous function handler
    Sync(SyncHandler),
    /// Asynchronous function handler
    Async(AsyncHandler),
}

impl FunctionWrapper {
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(FunctionData) -> Result<FunctionData, BoxError> + Send + Sync + 'static,
    {
        FunctionWrapper::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, FunctionData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionData, BoxError>> + Send + 'static,
    {
        FunctionWrapper::Async(Arc::new(move |ctx, data| Box::pin(f(ctx, data))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, FunctionWrapper::Async(_))
    }

    /// Call the wrapped handler
    pub async fn call(
        &self,
        ctx: &CallContext,
        data: FunctionData,
    ) -> Result<FunctionData, BoxError> {
        match self {
            FunctionWrapper::Sync(f) => f(data),
            FunctionWrapper::Async(f) => f(ctx.clone(), data).await,
        }
    }
}

impl fmt::Debug for FunctionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionWrapper::Sync(_) => f.write_str("FunctionWrapper::Sync"),
            FunctionWrapper::Async(_) => f.write_str("FunctionWrapper::Async"),
        }
    }
}

/// A function backed by a Rust closure
#[derive(Debug, Clone)]
pub struct NativeFunction {
    name: String,
    schema: Option<FunctionSchema>,
    wrapper: FunctionWrapper,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, wrapper: FunctionWrapper) -> Self {
        Self {
            name: name.into(),
            schema: None,
            wrapper,
        }
    }

    /// Function from a synchronous closure
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(FunctionData) -> Result<FunctionData, BoxError> + Send + Sync + 'static,
    {
        Self::new(name, FunctionWrapper::from_sync(f))
    }

    /// Function from an async closure; the context lets it observe
    /// cancellation
    pub fn from_async<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallContext, FunctionData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionData, BoxError>> + Send + 'static,
    {
        Self::new(name, FunctionWrapper::from_async(f))
    }

    pub fn with_schema(mut self, schema: FunctionSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Box into the shared trait object registries store
    pub fn shared(self) -> Arc<dyn Function> {
        Arc::new(self)
    }
}

#[async_trait]
impl Function for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Option<&FunctionSchema> {
        self.schema.as_ref()
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData> {
        ctx.check()?;
        match &self.wrapper {
            FunctionWrapper::Sync(_) => self
                .wrapper
                .call(ctx, data)
                .await
                .map_err(|e| PortalError::execution(&self.name, e)),
            FunctionWrapper::Async(_) => {
                ctx.run(async {
                    self.wrapper
                        .call(ctx, data)
                        .await
                        .map_err(|e| PortalError::execution(&self.name, e))
                })
                .await
            }
        }
    }
}

/// Call `function` with its schema checked at both boundaries
///
/// A rejected input is `ValidationFailed`. Anything the callee returns, a
/// rejected output included, surfaces as `ExecutionFailed`; only the
/// context's own `Timeout`/`Cancelled` keep their kind.
pub(crate) async fn call_validated(
    function: &dyn Function,
    ctx: &CallContext,
    input: FunctionData,
) -> PortalResult<FunctionData> {
    if let Some(schema) = function.schema() {
        let validation = schema.validate_input(&input.to_json());
        if !validation.valid {
            return Err(PortalError::validation(validation.summary(), validation.errors));
        }
    }

    let output = ctx
        .run(function.call(ctx, input))
        .await
        .map_err(|e| callee_failure(function.name(), e))?;

    if let Some(schema) = function.schema() {
        let validation = schema.validate_output(&output.to_json());
        if !validation.valid {
            return Err(PortalError::execution_message(
                function.name(),
                format!("output validation failed: {}", validation.summary()),
            ));
        }
    }

    Ok(output)
}

fn callee_failure(function: &str, error: PortalError) -> PortalError {
    match error {
        PortalError::ExecutionFailed { .. }
        | PortalError::Timeout { .. }
        | PortalError::Cancelled { .. } => error,
        other => PortalError::execution(function, Box::new(other)),
    }
}

/// Transport seam for remote proxies
///
/// Implemented by the HTTP and WebSocket clients. A proxy holds nothing but
/// its target address and a shared reference to one of these.
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    /// Transport name used in logs and errors
    fn transport(&self) -> &'static str;

    /// Perform one round trip to the function at `address`
    async fn call_remote(
        &self,
        ctx: &CallContext,
        address: &Address,
        data: FunctionData,
    ) -> PortalResult<FunctionData>;

    /// Address of `method` on the service at `service`
    fn method_address(&self, service: &Address, method: &str) -> PortalResult<Address>;
}

/// Proxy to a function behind a network portal
#[derive(Clone)]
pub struct RemoteFunction {
    name: String,
    address: Address,
    caller: Arc<dyn RemoteCaller>,
}

impl RemoteFunction {
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

    pub fn transport(&self) -> &'static str {
        self.caller.transport()
    }
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("address", &self.address.to_string())
            .field("transport", &self.caller.transport())
            .finish()
    }
}

#[async_trait]
impl Function for RemoteFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData> {
        ctx.run(self.caller.call_remote(ctx, &self.address, data))
            .await
    }
}

/// A resolved function: direct dispatch or remote proxy
#[derive(Clone)]
pub enum FunctionHandle {
    Direct(Arc<dyn Function>),
    Remote(RemoteFunction),
}

impl FunctionHandle {
    pub fn is_remote(&self) -> bool {
        matches!(self, FunctionHandle::Remote(_))
    }

    /// Target address of a remote proxy
    pub fn remote_address(&self) -> Option<&Address> {
        match self {
            FunctionHandle::Direct(_) => None,
            FunctionHandle::Remote(remote) => Some(remote.address()),
        }
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionHandle::Direct(function) => {
                f.debug_tuple("Direct").field(&function.name()).finish()
            }
            FunctionHandle::Remote(remote) => f.debug_tuple("Remote").field(remote).finish(),
        }
    }
}

#[async_trait]
impl Function for FunctionHandle {
    fn name(&self) -> &str {
        match self {
            FunctionHandle::Direct(function) => function.name(),
            FunctionHandle::Remote(remote) => remote.name(),
        }
    }

    fn schema(&self) -> Option<&FunctionSchema> {
        match self {
            FunctionHandle::Direct(function) => function.schema(),
            FunctionHandle::Remote(_) => None,
        }
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData> {
        match self {
            FunctionHandle::Direct(function) => function.call(ctx, data).await,
            FunctionHandle::Remote(remote) => remote.call(ctx, data).await,
        }
    }
}
