//! Scheme -> portal router

use super::{LocalPortal, Portal, TestingPortal};
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::FunctionHandle;
use crate::service::ServiceHandle;
use parking_lot::RwLock;
use portico_core::{Address, SCHEME_LOCAL, SCHEME_MOCK, SCHEME_TEST};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn same_portal(a: &Arc<dyn Portal>, b: &Arc<dyn Portal>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Routes addresses to the portal registered for their scheme
#[derive(Default)]
pub struct PortalRegistry {
    portals: RwLock<HashMap<String, Arc<dyn Portal>>>,
}

impl PortalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`LocalPortal`] on `local` and a [`TestingPortal`]
    /// on `test` and `mock`
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let local: Arc<dyn Portal> = Arc::new(LocalPortal::new());
        let testing: Arc<dyn Portal> = Arc::new(TestingPortal::new());

        // Fresh registry, so neither claim can conflict
        let _ = registry.register_portal(&[SCHEME_LOCAL], local);
        let _ = registry.register_portal(&[SCHEME_TEST, SCHEME_MOCK], testing);
        registry
    }

    /// Claim `schemes` for `portal`
    ///
    /// All-or-nothing: fails with `DuplicateName` if any scheme already
    /// belongs to a different portal. Re-claiming for the same portal is
    /// allowed.
    pub fn register_portal(&self, schemes: &[&str], portal: Arc<dyn Portal>) -> PortalResult<()> {
        if schemes.is_empty() {
            return Err(PortalError::invalid_argument("portal must claim at least one scheme"));
        }

        let mut portals = self.portals.write();
        for scheme in schemes {
            let scheme = scheme.to_ascii_lowercase();
            if let Some(existing) = portals.get(&scheme) {
                if !same_portal(existing, &portal) {
                    return Err(PortalError::duplicate(format!("scheme '{}'", scheme)));
                }
            }
        }

        for scheme in schemes {
            debug!("Scheme {} -> {} portal", scheme, portal.name());
            portals.insert(scheme.to_ascii_lowercase(), portal.clone());
        }
        Ok(())
    }

    /// Claim every scheme the portal reports
    pub fn register(&self, portal: Arc<dyn Portal>) -> PortalResult<()> {
        let schemes = portal.schemes();
        self.register_portal(schemes, portal)
    }

    pub fn unregister_scheme(&self, scheme: &str) -> Option<Arc<dyn Portal>> {
        self.portals.write().remove(&scheme.to_ascii_lowercase())
    }

    pub fn get_portal(&self, address: &Address) -> PortalResult<Arc<dyn Portal>> {
        self.get_portal_for_scheme(address.scheme())
    }

    pub fn get_portal_for_scheme(&self, scheme: &str) -> PortalResult<Arc<dyn Portal>> {
        self.portals
            .read()
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| PortalError::unsupported_scheme(scheme))
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.portals.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Distinct registered portals
    pub fn portals(&self) -> Vec<Arc<dyn Portal>> {
        let mut distinct: Vec<Arc<dyn Portal>> = Vec::new();
        for portal in self.portals.read().values() {
            if !distinct.iter().any(|seen| same_portal(seen, portal)) {
                distinct.push(portal.clone());
            }
        }
        distinct
    }

    pub async fn resolve_function(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<FunctionHandle> {
        let portal = self.get_portal(address)?;
        portal.resolve_function(ctx, address).await
    }

    pub async fn resolve_service(
        &self,
        ctx: &CallContext,
        address: &Address,
    ) -> PortalResult<ServiceHandle> {
        let portal = self.get_portal(address)?;
        portal.resolve_service(ctx, address).await
    }

    /// Start every portal; stops at the first failure
    pub async fn start_all(&self, ctx: &CallContext) -> PortalResult<()> {
        for portal in self.portals() {
            portal.start(ctx).await?;
        }
        Ok(())
    }

    /// Stop every portal, returning the first error after trying all
    pub async fn stop_all(&self, ctx: &CallContext) -> PortalResult<()> {
        let mut first_error = None;
        for portal in self.portals() {
            if let Err(e) = portal.stop(ctx).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for PortalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
