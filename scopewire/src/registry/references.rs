//! Wired references handed to component creation strategies.

use super::composite::{CompositeRegistry, RegistryInner};
use super::ServiceProxy;
use crate::errors::{ResolutionError, RuntimeError};
use crate::work::WorkContext;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A lazily resolved handle on a service the owning component calls.
///
/// Resolution happens on first use, so a reference may name a component
/// registered after its owner, or one whose context does not exist yet.
#[derive(Clone)]
pub struct ServiceReference {
    name: String,
    source: String,
    target: String,
    registry: Weak<RegistryInner>,
}

impl ServiceReference {
    pub(crate) fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            registry,
        }
    }

    /// Returns the reference name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning component.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the target name, possibly a `child/name` path.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Resolves the reference to a proxy over its wire.
    pub fn resolve(&self) -> Result<ServiceProxy, RuntimeError> {
        let inner: Arc<RegistryInner> =
            self.registry
                .upgrade()
                .ok_or_else(|| ResolutionError::RegistryDropped {
                    reference: self.name.clone(),
                })?;
        CompositeRegistry::from_inner(inner).get_service(&self.source, &self.target)
    }

    /// Resolves the reference and calls `operation` on it.
    pub async fn invoke(
        &self,
        operation: &str,
        body: serde_json::Value,
        work: &WorkContext,
    ) -> Result<serde_json::Value, RuntimeError> {
        self.resolve()?.invoke(operation, body, work).await
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// The references of one component, by reference name.
#[derive(Debug, Clone, Default)]
pub struct References {
    entries: BTreeMap<String, ServiceReference>,
}

impl References {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference, replacing one with the same name.
    pub fn insert(&mut self, reference: ServiceReference) {
        self.entries.insert(reference.name().to_string(), reference);
    }

    /// Returns the reference called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceReference> {
        self.entries.get(name)
    }

    /// Returns the reference called `name` or a not found error.
    pub fn require(&self, name: &str) -> Result<&ServiceReference, ResolutionError> {
        self.get(name).ok_or_else(|| ResolutionError::not_found(name))
    }

    /// Returns the reference names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Returns the number of references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no references.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dangling(name: &str, target: &str) -> ServiceReference {
        ServiceReference::new(name, "Owner", target, Weak::new())
    }

    #[test]
    fn test_lookup_by_name() {
        let mut refs = References::new();
        assert!(refs.is_empty());

        refs.insert(dangling("store", "Store"));
        refs.insert(dangling("audit", "child/Audit"));

        assert_eq!(refs.len(), 2);
        assert_eq!(refs.names(), vec!["audit", "store"]);
        assert_eq!(refs.get("audit").unwrap().target(), "child/Audit");
        assert!(matches!(
            refs.require("missing"),
            Err(ResolutionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_after_registry_dropped() {
        let reference = dangling("store", "Store");
        let err = reference.resolve().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Resolution(ResolutionError::RegistryDropped { .. })
        ));
    }
}
