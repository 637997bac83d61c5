//! Wire construction.

use super::{BindingType, Interceptor, InvocationChain, TargetInvoker, Wire, WireKey};
use crate::core::ServiceContract;
use crate::errors::BuilderError;
use crate::events::{default_sink, EventSink};
use crate::interceptors::NonBlockingBridgingInterceptor;
use crate::scope::ScopeContainer;
use crate::work::WorkScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

enum Terminal {
    Local(Arc<TargetInvoker>),
    Binding(Arc<dyn Interceptor>),
}

/// Builds a [`Wire`] with one cached chain per operation.
///
/// Chain order, outermost first: reference-side (policy) interceptors,
/// the non-blocking bridge for one-way operations, binding interceptors,
/// service-side interceptors, per-operation interceptors, and the terminal.
pub struct WireBuilder {
    source: String,
    target: String,
    contract: Arc<ServiceContract>,
    binding: BindingType,
    reference_interceptors: Vec<Arc<dyn Interceptor>>,
    binding_interceptors: Vec<Arc<dyn Interceptor>>,
    service_interceptors: Vec<Arc<dyn Interceptor>>,
    operation_interceptors: HashMap<String, Vec<Arc<dyn Interceptor>>>,
    scheduler: Option<Arc<dyn WorkScheduler>>,
    request_scope: Option<Arc<dyn ScopeContainer>>,
    terminal: Option<Terminal>,
    sink: Arc<dyn EventSink>,
}

impl WireBuilder {
    /// Starts a wire from `source` to `target` over `contract`.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        contract: Arc<ServiceContract>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            contract,
            binding: BindingType::Local,
            reference_interceptors: Vec::new(),
            binding_interceptors: Vec::new(),
            service_interceptors: Vec::new(),
            operation_interceptors: HashMap::new(),
            scheduler: None,
            request_scope: None,
            terminal: None,
            sink: default_sink(),
        }
    }

    /// Sets the binding type.
    #[must_use]
    pub fn with_binding(mut self, binding: BindingType) -> Self {
        self.binding = binding;
        self
    }

    /// Appends a reference-side interceptor.
    #[must_use]
    pub fn with_reference_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.reference_interceptors.push(interceptor);
        self
    }

    /// Appends a binding interceptor.
    #[must_use]
    pub fn with_binding_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.binding_interceptors.push(interceptor);
        self
    }

    /// Appends a service-side interceptor.
    #[must_use]
    pub fn with_service_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.service_interceptors.push(interceptor);
        self
    }

    /// Appends an interceptor for a single operation.
    #[must_use]
    pub fn with_operation_interceptor(
        mut self,
        operation: impl Into<String>,
        interceptor: Arc<dyn Interceptor>,
    ) -> Self {
        self.operation_interceptors
            .entry(operation.into())
            .or_default()
            .push(interceptor);
        self
    }

    /// Enables non-blocking dispatch of one-way operations.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn WorkScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets the request container that ends non-blocking continuations' requests.
    #[must_use]
    pub fn with_request_scope(mut self, container: Arc<dyn ScopeContainer>) -> Self {
        self.request_scope = Some(container);
        self
    }

    /// Terminates the wire at a component in `container`.
    #[must_use]
    pub fn with_target_container(mut self, container: Arc<dyn ScopeContainer>) -> Self {
        self.terminal = Some(Terminal::Local(Arc::new(TargetInvoker::new(
            self.target.clone(),
            container,
        ))));
        self
    }

    /// Terminates the wire at an interceptor supplied by a binding.
    #[must_use]
    pub fn with_binding_terminal(mut self, terminal: Arc<dyn Interceptor>) -> Self {
        self.terminal = Some(Terminal::Binding(terminal));
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the wire.
    ///
    /// The wire is optimizable only if it is local, ends at a local target,
    /// and no interceptor on any chain requires invocation.
    pub fn build(self) -> Result<Wire, BuilderError> {
        self.contract.validate()?;
        let Some(terminal) = self.terminal else {
            return Err(BuilderError::MissingTarget {
                source_uri: self.source,
                target_uri: self.target,
            });
        };
        let (terminal_interceptor, local_target): (Arc<dyn Interceptor>, _) = match terminal {
            Terminal::Local(invoker) => (Arc::clone(&invoker) as Arc<dyn Interceptor>, Some(invoker)),
            Terminal::Binding(interceptor) => (interceptor, None),
        };

        let bridge: Option<Arc<dyn Interceptor>> = self.scheduler.as_ref().map(|scheduler| {
            let mut bridge = NonBlockingBridgingInterceptor::new(Arc::clone(scheduler))
                .with_event_sink(Arc::clone(&self.sink));
            if let Some(container) = &self.request_scope {
                bridge = bridge.with_request_scope(Arc::clone(container));
            }
            Arc::new(bridge) as Arc<dyn Interceptor>
        });

        let mut optimizable = self.binding == BindingType::Local && local_target.is_some();
        let mut chains = HashMap::new();
        for operation in self.contract.operations() {
            let mut interceptors: Vec<Arc<dyn Interceptor>> = self.reference_interceptors.clone();
            if operation.is_one_way() {
                if let Some(bridge) = &bridge {
                    interceptors.push(Arc::clone(bridge));
                }
            }
            interceptors.extend(self.binding_interceptors.iter().cloned());
            interceptors.extend(self.service_interceptors.iter().cloned());
            if let Some(extra) = self.operation_interceptors.get(operation.name()) {
                interceptors.extend(extra.iter().cloned());
            }
            interceptors.push(Arc::clone(&terminal_interceptor));

            let chain = InvocationChain::new(Arc::clone(operation), interceptors);
            if chain.requires_invocation() {
                optimizable = false;
            }
            chains.insert(operation.name().to_string(), Arc::new(chain));
        }

        let key = WireKey::new(self.source, self.target, self.binding);
        debug!(
            wire = %key,
            operations = chains.len(),
            optimizable,
            "Wire built"
        );
        Ok(Wire::new(
            key,
            self.contract,
            chains,
            local_target,
            optimizable,
            self.sink,
        ))
    }
}

impl std::fmt::Debug for WireBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBuilder")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("binding", &self.binding)
            .field("has_terminal", &self.terminal.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Message, Operation, Scope};
    use crate::errors::ResolutionError;
    use crate::events::{event_types, CollectingEventSink};
    use crate::scope::ModuleScopeContainer;
    use crate::testing::{RecordingComponent, ShutdownLog};
    use crate::wire::Next;
    use crate::work::{MockWorkScheduler, WorkContext};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Named {
        name: &'static str,
        required: bool,
    }

    #[async_trait]
    impl Interceptor for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn requires_invocation(&self) -> bool {
            self.required
        }

        async fn invoke(&self, message: Message, next: Next) -> Message {
            next.run(message).await
        }
    }

    fn named(name: &'static str, required: bool) -> Arc<dyn Interceptor> {
        Arc::new(Named { name, required })
    }

    fn contract() -> Arc<ServiceContract> {
        Arc::new(
            ServiceContract::new("Greeter")
                .with_operation(Operation::new("greet"))
                .with_operation(Operation::one_way("notify")),
        )
    }

    async fn container(log: &ShutdownLog) -> Arc<dyn ScopeContainer> {
        let container = ModuleScopeContainer::new("module");
        container
            .register_factory(Arc::new(RecordingComponent::factory("Greeter", Scope::Module, log)))
            .await
            .unwrap();
        container.start().unwrap();
        Arc::new(container)
    }

    #[tokio::test]
    async fn test_chain_order() {
        let log = ShutdownLog::new();
        let scheduler: Arc<dyn WorkScheduler> = Arc::new(MockWorkScheduler::new());
        let wire = WireBuilder::new("client", "Greeter", contract())
            .with_service_interceptor(named("service", false))
            .with_binding_interceptor(named("binding", false))
            .with_reference_interceptor(named("policy", false))
            .with_operation_interceptor("greet", named("greet-only", false))
            .with_scheduler(scheduler)
            .with_target_container(container(&log).await)
            .build()
            .unwrap();

        assert_eq!(
            wire.invocation_chain("greet").unwrap().names(),
            vec!["policy", "binding", "service", "greet-only", "target"]
        );
        assert_eq!(
            wire.invocation_chain("notify").unwrap().names(),
            vec!["policy", "non-blocking", "binding", "service", "target"]
        );
        assert!(!wire.is_optimizable());
    }

    #[tokio::test]
    async fn test_plain_local_wire_is_optimizable() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let wire = WireBuilder::new("client", "Greeter", contract())
            .with_service_interceptor(named("cache", false))
            .with_target_container(container(&log).await)
            .with_event_sink(sink.clone())
            .build()
            .unwrap();
        assert!(wire.is_optimizable());

        let work = WorkContext::new();
        let target = wire.target_service(&work).await.unwrap();
        assert_eq!(target.name(), "Greeter");

        let operation = Arc::clone(wire.contract().operation("greet").unwrap());
        let reply = wire
            .invoke(Message::new(operation, serde_json::json!("hi"), work))
            .await;
        assert_eq!(reply.body()["component"], "Greeter");
        assert_eq!(sink.events_of_type(event_types::WIRE_INVOKED).len(), 1);
    }

    #[tokio::test]
    async fn test_required_interceptor_disables_optimization() {
        let log = ShutdownLog::new();
        let wire = WireBuilder::new("client", "Greeter", contract())
            .with_reference_interceptor(named("monitor", true))
            .with_target_container(container(&log).await)
            .build()
            .unwrap();

        assert!(!wire.is_optimizable());
        assert!(matches!(
            wire.target_service(&WorkContext::new()).await,
            Err(crate::errors::RuntimeError::Resolution(ResolutionError::NotOptimizable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_binding_terminal_is_not_optimizable() {
        let wire = WireBuilder::new("client", "Greeter", contract())
            .with_binding(BindingType::Named("jms".into()))
            .with_binding_terminal(named("jms-send", false))
            .build()
            .unwrap();

        assert!(!wire.is_optimizable());
        assert_eq!(wire.binding(), &BindingType::Named("jms".into()));
    }

    #[test]
    fn test_missing_terminal() {
        let result = WireBuilder::new("client", "Greeter", contract()).build();
        assert!(matches!(result, Err(BuilderError::MissingTarget { .. })));
    }

    #[tokio::test]
    async fn test_unknown_operation_faults() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let wire = WireBuilder::new("client", "Greeter", contract())
            .with_target_container(container(&log).await)
            .with_event_sink(sink.clone())
            .build()
            .unwrap();

        let reply = wire
            .invoke(Message::new(
                Arc::new(Operation::new("shout")),
                serde_json::Value::Null,
                WorkContext::new(),
            ))
            .await;

        assert_eq!(reply.fault().unwrap().kind, crate::core::FaultKind::Resolution);
        assert!(sink.events_of_type(event_types::WIRE_INVOKED).is_empty());
    }

    #[test]
    fn test_invalid_contract_rejected() {
        let bad = Arc::new(
            ServiceContract::new("Greeter").with_operation(
                Operation::new("bye")
                    .with_conversation_sequence(crate::core::ConversationSequence::End),
            ),
        );
        let result = WireBuilder::new("client", "Greeter", bad)
            .with_binding_terminal(named("t", false))
            .build();
        assert!(matches!(
            result,
            Err(BuilderError::InvalidConversationalContract { .. })
        ));
    }
}
