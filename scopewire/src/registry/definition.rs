//! Declarative component definitions and registry entries.

use super::{CompositeRegistry, References};
use crate::component::{Component, ContextFactory, CreationStrategy};
use crate::core::{ContextKind, Scope, ServiceContract};
use crate::errors::ComponentError;
use crate::wire::{BindingType, Interceptor};
use std::fmt;
use std::sync::Arc;

/// Everything the registry needs to host one component implementation.
#[derive(Clone)]
pub struct ComponentDefinition {
    name: String,
    scope: Scope,
    contract: Arc<ServiceContract>,
    strategy: CreationStrategy,
    references: Vec<(String, String)>,
    eager_init: bool,
    destroyable: bool,
}

impl ComponentDefinition {
    /// Creates a definition from a creation closure.
    pub fn new<F>(name: impl Into<String>, scope: Scope, contract: ServiceContract, strategy: F) -> Self
    where
        F: Fn(&References) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope,
            contract: Arc::new(contract),
            strategy: Arc::new(strategy),
            references: Vec::new(),
            eager_init: false,
            destroyable: true,
        }
    }

    /// Wires reference `name` to `target`, a component name or `child/name` path.
    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.references.push((name.into(), target.into()));
        self
    }

    /// Creates the instance when its scope starts.
    #[must_use]
    pub fn with_eager_init(mut self, eager_init: bool) -> Self {
        self.eager_init = eager_init;
        self
    }

    /// Controls whether the instance takes part in ordered teardown.
    #[must_use]
    pub fn with_destroyable(mut self, destroyable: bool) -> Self {
        self.destroyable = destroyable;
        self
    }

    /// Returns the component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the service contract.
    #[must_use]
    pub fn contract(&self) -> &Arc<ServiceContract> {
        &self.contract
    }

    /// Returns `(reference, target)` pairs in declaration order.
    #[must_use]
    pub fn references(&self) -> &[(String, String)] {
        &self.references
    }

    pub(crate) fn into_factory(self, references: References) -> ContextFactory {
        let strategy = self.strategy;
        ContextFactory::new(self.name, self.scope, move |refs| strategy(refs))
            .with_eager_init(self.eager_init)
            .with_destroyable(self.destroyable)
            .with_references(references)
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("interface", &self.contract.interface())
            .field("references", &self.references)
            .field("eager_init", &self.eager_init)
            .finish_non_exhaustive()
    }
}

/// A name registered in a composite.
#[derive(Clone)]
pub enum RegisteredContext {
    /// A component implementation hosted by one of the scope containers.
    Atomic {
        /// The component's scope.
        scope: Scope,
        /// The service it offers.
        contract: Arc<ServiceContract>,
    },
    /// A nested composite resolved with `name/child` paths.
    Composite(CompositeRegistry),
    /// An outbound reference served by a binding's terminal interceptor.
    Reference {
        /// The service the binding exposes.
        contract: Arc<ServiceContract>,
        /// The binding that carries calls.
        binding: BindingType,
        /// The binding's terminal interceptor.
        terminal: Arc<dyn Interceptor>,
    },
    /// Another name promoted under this one.
    Service {
        /// The promoted name, possibly a path.
        promotes: String,
    },
}

impl RegisteredContext {
    /// Returns the variant tag.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Atomic { .. } => ContextKind::Atomic,
            Self::Composite(_) => ContextKind::Composite,
            Self::Reference { .. } => ContextKind::Reference,
            Self::Service { .. } => ContextKind::Service,
        }
    }

    /// Returns the contract for atomic and reference entries.
    #[must_use]
    pub fn contract(&self) -> Option<&Arc<ServiceContract>> {
        match self {
            Self::Atomic { contract, .. } | Self::Reference { contract, .. } => Some(contract),
            Self::Composite(_) | Self::Service { .. } => None,
        }
    }
}

impl fmt::Debug for RegisteredContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic { scope, contract } => f
                .debug_struct("Atomic")
                .field("scope", scope)
                .field("interface", &contract.interface())
                .finish(),
            Self::Composite(registry) => f.debug_tuple("Composite").field(&registry.name()).finish(),
            Self::Reference {
                contract,
                binding,
                terminal,
            } => f
                .debug_struct("Reference")
                .field("interface", &contract.interface())
                .field("binding", binding)
                .field("terminal", &terminal.name())
                .finish(),
            Self::Service { promotes } => {
                f.debug_struct("Service").field("promotes", promotes).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FnComponent;
    use crate::core::Operation;

    fn definition() -> ComponentDefinition {
        ComponentDefinition::new(
            "Greeter",
            Scope::Request,
            ServiceContract::new("Greeter").with_operation(Operation::new("greet")),
            |_| Ok(Arc::new(FnComponent::new(|m| Ok(m.body().clone()))) as Arc<dyn Component>),
        )
    }

    #[test]
    fn test_definition_into_factory() {
        let factory = definition()
            .with_eager_init(true)
            .with_destroyable(false)
            .with_reference("store", "Store")
            .into_factory(References::new());

        assert_eq!(factory.name(), "Greeter");
        assert_eq!(factory.scope(), Scope::Request);
        assert!(factory.is_eager_init());
        assert!(!factory.is_destroyable());
        assert!(factory.create_instance().is_ok());
    }

    #[test]
    fn test_registered_context_kinds() {
        let atomic = RegisteredContext::Atomic {
            scope: Scope::Module,
            contract: Arc::clone(definition().contract()),
        };
        let service = RegisteredContext::Service {
            promotes: "child/Greeter".into(),
        };

        assert_eq!(atomic.kind(), ContextKind::Atomic);
        assert!(atomic.kind().is_invocable());
        assert_eq!(atomic.contract().unwrap().interface(), "Greeter");
        assert_eq!(service.kind(), ContextKind::Service);
        assert!(service.contract().is_none());
    }
}
