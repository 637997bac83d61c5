//! Context factories.

use super::{Component, ComponentContext};
use crate::core::Scope;
use crate::errors::ComponentError;
use crate::registry::References;
use crate::work::CorrelationKey;
use std::fmt::Debug;
use std::sync::Arc;

/// Builds one component instance from its wired references.
pub type CreationStrategy =
    Arc<dyn Fn(&References) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync>;

/// Immutable template for one component kind.
#[derive(Clone)]
pub struct ContextFactory {
    name: String,
    scope: Scope,
    strategy: CreationStrategy,
    references: Arc<References>,
    eager_init: bool,
    destroyable: bool,
}

impl ContextFactory {
    /// Creates a factory from a creation closure.
    pub fn new<F>(name: impl Into<String>, scope: Scope, strategy: F) -> Self
    where
        F: Fn(&References) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope,
            strategy: Arc::new(strategy),
            references: Arc::new(References::default()),
            eager_init: false,
            destroyable: true,
        }
    }

    /// Creates a factory whose instances are produced by `Default`.
    pub fn for_default<C>(name: impl Into<String>, scope: Scope) -> Self
    where
        C: Component + Default + 'static,
    {
        Self::new(name, scope, |_| Ok(Arc::new(C::default()) as Arc<dyn Component>))
    }

    /// Marks instances for creation when the scope starts.
    #[must_use]
    pub fn with_eager_init(mut self, eager_init: bool) -> Self {
        self.eager_init = eager_init;
        self
    }

    /// Controls whether instances are queued for teardown.
    #[must_use]
    pub fn with_destroyable(mut self, destroyable: bool) -> Self {
        self.destroyable = destroyable;
        self
    }

    /// Sets the references handed to the creation strategy.
    #[must_use]
    pub fn with_references(mut self, references: References) -> Self {
        self.references = Arc::new(references);
        self
    }

    /// Returns the factory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns true if instances are created at scope start.
    #[must_use]
    pub fn is_eager_init(&self) -> bool {
        self.eager_init
    }

    /// Returns true if instances take part in ordered teardown.
    #[must_use]
    pub fn is_destroyable(&self) -> bool {
        self.destroyable
    }

    /// Returns the wired references.
    #[must_use]
    pub fn references(&self) -> &References {
        &self.references
    }

    /// Runs the creation strategy.
    pub fn create_instance(&self) -> Result<Arc<dyn Component>, ComponentError> {
        (self.strategy)(&self.references)
    }

    /// Creates an unstarted context bound to `key`.
    #[must_use]
    pub fn create_context(self: &Arc<Self>, key: CorrelationKey) -> Arc<ComponentContext> {
        ComponentContext::new(Arc::clone(self), key)
    }
}

impl Debug for ContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFactory")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("eager_init", &self.eager_init)
            .field("destroyable", &self.destroyable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FnComponent;
    use crate::core::LifecycleState;

    fn echo_factory() -> ContextFactory {
        ContextFactory::new("Echo", Scope::Module, |_| {
            Ok(Arc::new(FnComponent::new(|m| Ok(m.body().clone()))) as Arc<dyn Component>)
        })
    }

    #[test]
    fn test_factory_defaults() {
        let factory = echo_factory();
        assert_eq!(factory.name(), "Echo");
        assert_eq!(factory.scope(), Scope::Module);
        assert!(!factory.is_eager_init());
        assert!(factory.is_destroyable());
        assert!(factory.references().is_empty());
    }

    #[test]
    fn test_factory_builders() {
        let factory = echo_factory().with_eager_init(true).with_destroyable(false);
        assert!(factory.is_eager_init());
        assert!(!factory.is_destroyable());
    }

    #[test]
    fn test_create_instance_runs_strategy_each_time() {
        let factory = echo_factory();
        let a = factory.create_instance().unwrap();
        let b = factory.create_instance().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_create_context_is_fresh() {
        let factory = Arc::new(echo_factory());
        let first = factory.create_context(CorrelationKey::Module);
        let second = factory.create_context(CorrelationKey::Module);

        assert_ne!(first.id(), second.id());
        assert_eq!(first.lifecycle_state(), LifecycleState::Uninitialized);
        assert_eq!(first.name(), "Echo");
    }

    #[test]
    fn test_failing_strategy() {
        let factory = ContextFactory::new("Broken", Scope::Request, |_| {
            Err(ComponentError::new("no constructor"))
        });
        assert!(factory.create_instance().is_err());
    }
}
