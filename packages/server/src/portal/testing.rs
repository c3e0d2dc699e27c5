//! Deterministic portal for tests of portal consumers
//!
//! `mock` registers a function under `mock://{name}`. Every call made through
//! a function resolved from this portal is appended to a shared
//! [`CallHistory`], in call order.

use super::{ensure_scheme, Lifecycle, Portal};
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{Function, FunctionHandle, NativeFunction};
use crate::registry::FunctionRegistry;
use crate::service::{Service, ServiceHandle, ServiceRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portico_core::{Address, FunctionData, SCHEME_MOCK, SCHEME_TEST};
use std::sync::Arc;

const SCHEMES: &[&str] = &[SCHEME_MOCK, SCHEME_TEST];

/// One recorded call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub function: String,
    pub input: FunctionData,
    pub output: Option<FunctionData>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl CallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered, shared call log
#[derive(Debug, Clone, Default)]
pub struct CallHistory {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: CallRecord) {
        self.records.lock().push(record);
    }

    /// Snapshot of every record, oldest first
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }

    pub fn calls_to(&self, function: &str) -> Vec<CallRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.function == function)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<CallRecord> {
        self.records.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

/// Wraps a function so each call lands in the history
struct Recorded {
    inner: Arc<dyn Function>,
    history: CallHistory,
}

#[async_trait]
impl Function for Recorded {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schema(&self) -> Option<&portico_core::FunctionSchema> {
        self.inner.schema()
    }

    async fn call(&self, ctx: &CallContext, data: FunctionData) -> PortalResult<FunctionData> {
        let input = data.clone();
        let result = self.inner.call(ctx, data).await;

        self.history.push(CallRecord {
            function: self.inner.name().to_string(),
            input,
            output: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(ToString::to_string),
            at: Utc::now(),
        });
        result
    }
}

/// In-memory portal with call recording
#[derive(Debug)]
pub struct TestingPortal {
    functions: FunctionRegistry,
    services: ServiceRegistry,
    history: CallHistory,
    lifecycle: Lifecycle,
}

impl Default for TestingPortal {
    fn default() -> Self {
        Self::new()
    }
}

impl TestingPortal {
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            services: ServiceRegistry::new(),
            history: CallHistory::new(),
            lifecycle: Lifecycle::new("testing"),
        }
    }

    /// Register `function`; returns its `mock://` address
    pub fn mock(&self, function: Arc<dyn Function>) -> PortalResult<Address> {
        let name = function.name().to_string();
        let address = Address::builder().scheme(SCHEME_MOCK).host(name.as_str()).build()?;
        self.functions.register(&name, function)?;
        Ok(address)
    }

    /// Register a function that always returns `output`
    pub fn mock_value(&self, name: &str, output: FunctionData) -> PortalResult<Address> {
        self.mock(NativeFunction::sync(name, move |_| Ok(output.clone())).shared())
    }

    /// Register a function that always fails with `message`
    pub fn mock_error(&self, name: &str, message: &str) -> PortalResult<Address> {
        let message = message.to_string();
        self.mock(NativeFunction::sync(name, move |_| Err(message.clone().into())).shared())
    }

    pub fn history(&self) -> CallHistory {
        self.history.clone()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    fn recorded(&self, inner: Arc<dyn Function>) -> FunctionHandle {
        FunctionHandle::Direct(Arc::new(Recorded {
            inner,
            history: self.history.clone(),
        }))
    }
}

#[async_trait]
impl Portal for TestingPortal {
    fn name(&self) -> &'static str {
        "testing"
    }

    fn schemes(&self) -> &'static [&'static str] {
        SCHEMES
    }

    async fn apply(
        &self,
        _ctx: &CallContext,
        function: Arc<dyn Function>,
    ) -> PortalResult<Address> {
        self.mock(function)
    }

    async fn apply_service(&self, _ctx: &CallContext, service: Service) -> PortalResult<Address> {
        let address = Address::builder()
            .scheme(SCHEME_MOCK)
            .host(service.name())
            .build()?;
        self.services.register(&service)?;
        Ok(address)
    }

    async fn resolve_function(
        &self,
        _ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle> {
        ensure_scheme(self, address)?;
        let name = address.host();

        let function = match address.path_segments().next() {
            Some(method) => self.services.get_service_method(name, method),
            None => self
                .functions
                .get(name)
                .or_else(|| self.services.functions().get(name)),
        };

        function
            .map(|function| self.recorded(function))
            .ok_or_else(|| PortalError::not_found(format!("mock '{}'", address)))
    }

    async fn resolve_service(
        &self,
        _ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<ServiceHandle> {
        ensure_scheme(self, address)?;
        self.services
            .get_service(address.host())
            .map(ServiceHandle::Direct)
            .ok_or_else(|| PortalError::not_found(format!("service '{}'", address.host())))
    }

    async fn start(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.begin_start()
    }

    async fn stop(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.begin_stop();
        Ok(())
    }

    async fn health(&self, _ctx: &CallContext) -> PortalResult<()> {
        self.lifecycle.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_records_in_order() {
        let portal = TestingPortal::new();
        let ctx = CallContext::new();

        let ok = portal
            .mock_value("price", FunctionData::new().with("amount", 42))
            .unwrap();
        let failing = portal.mock_error("charge", "card declined").unwrap();
        assert_eq!(ok.to_string(), "mock://price");

        let price = portal.resolve_function(&ctx, &ok).await.unwrap();
        let charge = portal.resolve_function(&ctx, &failing).await.unwrap();

        price
            .call(&ctx, FunctionData::new().with("sku", "a1"))
            .await
            .unwrap();
        assert!(charge.call(&ctx, FunctionData::new()).await.is_err());

        let history = portal.history();
        let records = history.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].function, "price");
        assert_eq!(records[0].input.get_str("sku"), Some("a1"));
        assert_eq!(
            records[0].output.as_ref().and_then(|o| o.get_i64("amount")),
            Some(42)
        );
        assert!(records[0].succeeded());
        assert_eq!(records[1].function, "charge");
        assert!(records[1].error.as_deref().unwrap().contains("card declined"));
        assert_eq!(history.calls_to("charge").len(), 1);

        history.clear();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_test_scheme_resolves() {
        let portal = TestingPortal::new();
        portal.mock_value("ping", FunctionData::value("pong")).unwrap();

        let handle = portal
            .resolve_function(&CallContext::new(), &Address::parse("test://ping").unwrap())
            .await
            .unwrap();
        assert_eq!(handle.name(), "ping");
    }

    #[tokio::test]
    async fn test_duplicate_mock() {
        let portal = TestingPortal::new();
        portal.mock_value("a", FunctionData::new()).unwrap();
        assert!(matches!(
            portal.mock_value("a", FunctionData::new()),
            Err(PortalError::DuplicateName { .. })
        ));
    }
}
