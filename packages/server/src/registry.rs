//! Concurrent name -> function store
//!
//! The registry is the single source of truth for name uniqueness: portals
//! never check for duplicates themselves, they surface the registry's
//! `DuplicateName`. Reads share a `parking_lot::RwLock`; writes are exclusive
//! for the duration of the map mutation only. `call` looks the function up,
//! drops the guard, then invokes it.

use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::Function;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use portico_core::FunctionData;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Bookkeeping attached 1:1 to a registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionMetadata {
    pub registered_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub version: String,
    pub description: String,
}

impl Default for FunctionMetadata {
    fn default() -> Self {
        Self {
            registered_at: Utc::now(),
            tags: BTreeSet::new(),
            version: String::new(),
            description: String::new(),
        }
    }
}

impl FunctionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Clone)]
struct Entry {
    function: Arc<dyn Function>,
    metadata: FunctionMetadata,
}

/// Thread-safe function registry
#[derive(Default)]
pub struct FunctionRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name` with fresh metadata
    pub fn register(&self, name: &str, function: Arc<dyn Function>) -> PortalResult<()> {
        self.register_with_metadata(name, function, FunctionMetadata::new())
    }

    /// Register `function` under `name`; the registration time is stamped now
    pub fn register_with_metadata(
        &self,
        name: &str,
        function: Arc<dyn Function>,
        mut metadata: FunctionMetadata,
    ) -> PortalResult<()> {
        if name.is_empty() {
            return Err(PortalError::invalid_argument("function name cannot be empty"));
        }

        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(PortalError::duplicate(name));
        }

        metadata.registered_at = Utc::now();
        entries.insert(name.to_string(), Entry { function, metadata });
        debug!("Registered function: {}", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.entries.read().get(name).map(|entry| entry.function.clone())
    }

    pub fn unregister(&self, name: &str) -> PortalResult<()> {
        match self.entries.write().remove(name) {
            Some(_) => {
                debug!("Unregistered function: {}", name);
                Ok(())
            }
            None => Err(PortalError::not_found(format!("function '{}'", name))),
        }
    }

    /// Snapshot of registered names, in no particular order
    pub fn list(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Look `name` up and invoke it outside the lock
    ///
    /// The callee's error is returned unchanged.
    pub async fn call(
        &self,
        ctx: &CallContext,
        name: &str,
        data: FunctionData,
    ) -> PortalResult<FunctionData> {
        let function = self
            .get(name)
            .ok_or_else(|| PortalError::not_found(format!("function '{}'", name)))?;
        function.call(ctx, data).await
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn metadata(&self, name: &str) -> Option<FunctionMetadata> {
        self.entries.read().get(name).map(|entry| entry.metadata.clone())
    }

    /// Replace the metadata of an existing entry
    pub fn set_metadata(&self, name: &str, metadata: FunctionMetadata) -> PortalResult<()> {
        match self.entries.write().get_mut(name) {
            Some(entry) => {
                entry.metadata = metadata;
                Ok(())
            }
            None => Err(PortalError::not_found(format!("function '{}'", name))),
        }
    }

    /// Names of entries carrying `tag`
    pub fn find_by_tag(&self, tag: &str) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.metadata.has_tag(tag))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Shallow copy: functions are shared, metadata is copied
impl Clone for FunctionRegistry {
    fn clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.entries.read().clone()),
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::NativeFunction;

    fn noop(name: &str) -> Arc<dyn Function> {
        NativeFunction::sync(name, Ok).shared()
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = FunctionRegistry::new();
        registry
            .register(
                "double",
                NativeFunction::sync("double", |data| {
                    let n = data.get_f64("n").ok_or("missing n")?;
                    Ok(FunctionData::new().with("result", n * 2.0))
                })
                .shared(),
            )
            .unwrap();

        let out = registry
            .call(&CallContext::new(), "double", FunctionData::new().with("n", 4.0))
            .await
            .unwrap();
        assert_eq!(out.get_f64("result"), Some(8.0));
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let registry = FunctionRegistry::new();
        let first = noop("first");
        registry.register("f", first.clone()).unwrap();

        let err = registry.register("f", noop("second")).unwrap_err();
        assert!(matches!(err, PortalError::DuplicateName { .. }));
        assert_eq!(registry.count(), 1);
        assert!(Arc::ptr_eq(&registry.get("f").unwrap(), &first));
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.register("", noop("x")),
            Err(PortalError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_function() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.unregister("ghost"),
            Err(PortalError::NotFound { .. })
        ));
        assert!(matches!(
            registry.call(&CallContext::new(), "ghost", FunctionData::new()).await,
            Err(PortalError::NotFound { .. })
        ));
    }

    #[test]
    fn test_metadata_and_tags() {
        let registry = FunctionRegistry::new();
        registry
            .register_with_metadata(
                "a",
                noop("a"),
                FunctionMetadata::new().with_tag("math").with_version("1.0"),
            )
            .unwrap();
        registry.register("b", noop("b")).unwrap();

        assert_eq!(registry.find_by_tag("math"), vec!["a".to_string()]);
        assert_eq!(registry.metadata("a").unwrap().version, "1.0");

        registry
            .set_metadata("b", FunctionMetadata::new().with_tag("math"))
            .unwrap();
        let mut tagged = registry.find_by_tag("math");
        tagged.sort();
        assert_eq!(tagged, vec!["a", "b"]);

        assert!(registry.set_metadata("ghost", FunctionMetadata::new()).is_err());
    }

    #[test]
    fn test_clone_is_shallow() {
        let registry = FunctionRegistry::new();
        registry.register("a", noop("a")).unwrap();

        let copy = registry.clone();
        assert!(Arc::ptr_eq(&copy.get("a").unwrap(), &registry.get("a").unwrap()));

        copy.set_metadata("a", FunctionMetadata::new().with_tag("copy"))
            .unwrap();
        assert!(registry.find_by_tag("copy").is_empty());

        copy.register("b", noop("b")).unwrap();
        assert!(!registry.exists("b"));
    }

    #[test]
    fn test_clear() {
        let registry = FunctionRegistry::new();
        registry.register("a", noop("a")).unwrap();
        registry.register("b", noop("b")).unwrap();
        registry.clear();
        assert_eq!(registry.count(), 0);
        assert!(registry.list().is_empty());
    }
}
