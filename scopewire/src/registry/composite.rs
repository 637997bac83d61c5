//! The composite (domain) registry.

use super::{ComponentDefinition, References, RegisteredContext, ServiceProxy, ServiceReference};
use crate::config::RuntimeConfig;
use crate::core::{ContextKind, LifecycleState, Scope, ServiceContract};
use crate::errors::{BuilderError, IllegalStateError, ResolutionError, RuntimeError};
use crate::events::{default_sink, EventSink};
use crate::scope::{
    ConversationalScopeContainer, ModuleScopeContainer, RequestScopeContainer, ScopeContainer,
    ScopeEvent,
};
use crate::wire::{BindingType, Interceptor, Wire, WireBuilder, WireKey};
use crate::work::{ConversationId, RequestId, TokioWorkScheduler, WorkScheduler};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

static NAME_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn validate_name(name: &str) -> Result<(), BuilderError> {
    let pattern = NAME_PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").ok());
    match pattern {
        Some(re) if re.is_match(name) => Ok(()),
        _ => Err(BuilderError::invalid_name(name)),
    }
}

pub(crate) struct RegistryInner {
    name: String,
    sink: Arc<dyn EventSink>,
    scheduler: Option<Arc<dyn WorkScheduler>>,
    module: Arc<ModuleScopeContainer>,
    composite: Arc<ModuleScopeContainer>,
    request: Arc<RequestScopeContainer>,
    conversation: Arc<ConversationalScopeContainer>,
    entries: RwLock<HashMap<String, RegisteredContext>>,
    order: RwLock<Vec<String>>,
    wires: DashMap<WireKey, Arc<Wire>>,
    policies: RwLock<Vec<Arc<dyn Interceptor>>>,
    state: Mutex<LifecycleState>,
}

impl RegistryInner {
    fn container_for(&self, scope: Scope) -> Arc<dyn ScopeContainer> {
        match scope {
            Scope::Module => Arc::clone(&self.module) as Arc<dyn ScopeContainer>,
            Scope::Composite => Arc::clone(&self.composite) as Arc<dyn ScopeContainer>,
            Scope::Request => Arc::clone(&self.request) as Arc<dyn ScopeContainer>,
            Scope::Conversation => Arc::clone(&self.conversation) as Arc<dyn ScopeContainer>,
        }
    }

    /// Containers in start order.
    fn containers(&self) -> [Arc<dyn ScopeContainer>; 4] {
        [
            self.container_for(Scope::Module),
            self.container_for(Scope::Composite),
            self.container_for(Scope::Request),
            self.container_for(Scope::Conversation),
        ]
    }
}

/// Builder for [`CompositeRegistry`].
pub struct CompositeRegistryBuilder {
    name: String,
    config: RuntimeConfig,
    sink: Option<Arc<dyn EventSink>>,
    scheduler: Option<Arc<dyn WorkScheduler>>,
    tokio_scheduler: bool,
}

impl CompositeRegistryBuilder {
    /// Sets the runtime configuration.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink shared by the registry, its containers and wires.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Dispatches one-way operations on `scheduler`.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn WorkScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Dispatches one-way operations on the current tokio runtime, bounded
    /// by the configured `scheduler.max_in_flight`.
    #[must_use]
    pub fn with_tokio_scheduler(mut self) -> Self {
        self.tokio_scheduler = true;
        self
    }

    /// Builds the registry.
    pub fn build(self) -> Result<CompositeRegistry, RuntimeError> {
        validate_name(&self.name)?;
        self.config.validate()?;

        let scheduler = match (self.scheduler, self.tokio_scheduler) {
            (Some(scheduler), _) => Some(scheduler),
            (None, true) => Some(Arc::new(TokioWorkScheduler::from_config(&self.config.scheduler)?)
                as Arc<dyn WorkScheduler>),
            (None, false) => None,
        };
        let sink = self.sink.unwrap_or_else(default_sink);
        let timeout = self.config.teardown_timeout();
        let name = self.name;

        let inner = RegistryInner {
            module: Arc::new(
                ModuleScopeContainer::new(format!("{name}/module"))
                    .with_event_sink(Arc::clone(&sink))
                    .with_teardown_timeout(timeout),
            ),
            composite: Arc::new(
                ModuleScopeContainer::composite(format!("{name}/composite"))
                    .with_event_sink(Arc::clone(&sink))
                    .with_teardown_timeout(timeout),
            ),
            request: Arc::new(
                RequestScopeContainer::new(format!("{name}/request"))
                    .with_event_sink(Arc::clone(&sink))
                    .with_teardown_timeout(timeout),
            ),
            conversation: Arc::new(
                ConversationalScopeContainer::new(format!("{name}/conversation"))
                    .with_config(&self.config.conversation)
                    .with_event_sink(Arc::clone(&sink))
                    .with_teardown_timeout(timeout),
            ),
            name,
            sink,
            scheduler,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            wires: DashMap::new(),
            policies: RwLock::new(Vec::new()),
            state: Mutex::new(LifecycleState::Uninitialized),
        };
        debug!(registry = %inner.name, "Registry built");
        Ok(CompositeRegistry {
            inner: Arc::new(inner),
        })
    }
}

impl fmt::Debug for CompositeRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRegistryBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_scheduler", &(self.scheduler.is_some() || self.tokio_scheduler))
            .finish_non_exhaustive()
    }
}

/// Resolves component names to live services.
///
/// A registry owns one container per scope, a table of registered names
/// and a cache of wires keyed by (source, target, binding). Child
/// composites are registered like components and addressed with
/// `child/name` paths. Cloning yields another handle on the same registry.
#[derive(Clone)]
pub struct CompositeRegistry {
    inner: Arc<RegistryInner>,
}

impl CompositeRegistry {
    /// Starts building a registry called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> CompositeRegistryBuilder {
        CompositeRegistryBuilder {
            name: name.into(),
            config: RuntimeConfig::default(),
            sink: None,
            scheduler: None,
            tokio_scheduler: false,
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    /// Returns the registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// Returns the container hosting `scope`.
    #[must_use]
    pub fn container(&self, scope: Scope) -> Arc<dyn ScopeContainer> {
        self.inner.container_for(scope)
    }

    /// Returns the request scope container.
    #[must_use]
    pub fn request_container(&self) -> &Arc<RequestScopeContainer> {
        &self.inner.request
    }

    /// Returns the conversation scope container.
    #[must_use]
    pub fn conversation_container(&self) -> &Arc<ConversationalScopeContainer> {
        &self.inner.conversation
    }

    /// Returns the entry registered under `name`.
    #[must_use]
    pub fn context(&self, name: &str) -> Option<RegisteredContext> {
        self.inner.entries.read().get(name).cloned()
    }

    /// Returns the registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.order.read().clone()
    }

    /// Returns the number of cached wires.
    #[must_use]
    pub fn wire_count(&self) -> usize {
        self.inner.wires.len()
    }

    fn reserve(&self, name: &str, entry: RegisteredContext) -> Result<(), RuntimeError> {
        validate_name(name)?;
        let state = self.lifecycle_state();
        if state == LifecycleState::Stopped {
            return Err(IllegalStateError::wrong_state(
                &self.inner.name,
                "register",
                LifecycleState::Running,
                state,
            )
            .into());
        }
        let mut entries = self.inner.entries.write();
        if entries.contains_key(name) {
            return Err(BuilderError::duplicate(name).into());
        }
        entries.insert(name.to_string(), entry);
        self.inner.order.write().push(name.to_string());
        Ok(())
    }

    fn release(&self, name: &str) {
        self.inner.entries.write().remove(name);
        self.inner.order.write().retain(|n| n != name);
    }

    /// Registers a component implementation with its scope container.
    pub async fn register_component(&self, definition: ComponentDefinition) -> Result<(), RuntimeError> {
        let contract = Arc::clone(definition.contract());
        contract.validate()?;
        if definition.scope() == Scope::Conversation && !contract.is_conversational() {
            return Err(BuilderError::invalid_conversational_contract(
                contract.interface(),
                "conversation-scoped components need a conversational contract",
            )
            .into());
        }

        let name = definition.name().to_string();
        let scope = definition.scope();
        self.reserve(
            &name,
            RegisteredContext::Atomic {
                scope,
                contract: Arc::clone(&contract),
            },
        )?;

        let mut references = References::new();
        for (reference, target) in definition.references() {
            references.insert(ServiceReference::new(
                reference.clone(),
                name.clone(),
                target.clone(),
                Arc::downgrade(&self.inner),
            ));
        }
        let factory = Arc::new(definition.into_factory(references));
        if let Err(e) = self.inner.container_for(scope).register_factory(factory).await {
            self.release(&name);
            return Err(e);
        }

        if contract.is_conversational() {
            self.inner
                .conversation
                .tighten_limits(contract.max_age(), contract.max_idle_time());
        }
        debug!(registry = %self.inner.name, component = %name, scope = %scope, "Component registered");
        Ok(())
    }

    /// Registers an outbound reference carried by a binding.
    pub fn register_reference(
        &self,
        name: &str,
        contract: ServiceContract,
        binding: BindingType,
        terminal: Arc<dyn Interceptor>,
    ) -> Result<(), RuntimeError> {
        contract.validate()?;
        self.reserve(
            name,
            RegisteredContext::Reference {
                contract: Arc::new(contract),
                binding,
                terminal,
            },
        )?;
        debug!(registry = %self.inner.name, reference = %name, "Reference registered");
        Ok(())
    }

    /// Exposes `promotes` under `name`.
    pub fn register_service(&self, name: &str, promotes: impl Into<String>) -> Result<(), RuntimeError> {
        let promotes = promotes.into();
        self.reserve(name, RegisteredContext::Service { promotes: promotes.clone() })?;
        debug!(registry = %self.inner.name, service = %name, promotes = %promotes, "Service registered");
        Ok(())
    }

    /// Nests `child` under `name`. Its lifecycle follows this registry.
    pub fn register_composite(&self, name: &str, child: CompositeRegistry) -> Result<(), RuntimeError> {
        self.reserve(name, RegisteredContext::Composite(child))?;
        debug!(registry = %self.inner.name, composite = %name, "Composite registered");
        Ok(())
    }

    /// Adds a reference-side interceptor to every wire built from now on.
    pub fn add_policy_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        debug!(registry = %self.inner.name, policy = %interceptor.name(), "Policy interceptor added");
        self.inner.policies.write().push(interceptor);
    }

    fn children(&self) -> Vec<CompositeRegistry> {
        let entries = self.inner.entries.read();
        self.inner
            .order
            .read()
            .iter()
            .filter_map(|name| match entries.get(name) {
                Some(RegisteredContext::Composite(child)) => Some(child.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns a proxy for `name` as seen from component `source`.
    ///
    /// `name` may be a `child/name` path. Services are followed to the
    /// name they promote. The wire is built once and cached.
    pub fn get_service(&self, source: &str, name: &str) -> Result<ServiceProxy, RuntimeError> {
        let mut visited = HashSet::new();
        self.resolve_service(source, name, &mut visited)
    }

    fn resolve_service(
        &self,
        source: &str,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Result<ServiceProxy, RuntimeError> {
        if let Some((head, rest)) = name.split_once('/') {
            return match self.context(head) {
                Some(RegisteredContext::Composite(child)) => child.get_service(source, rest),
                Some(other) => Err(ResolutionError::NotInvocable {
                    name: name.to_string(),
                    kind: other.kind(),
                }
                .into()),
                None => Err(ResolutionError::not_found(name).into()),
            };
        }
        if !visited.insert(name.to_string()) {
            return Err(ResolutionError::PromotionCycle {
                name: name.to_string(),
            }
            .into());
        }

        let entry = self
            .context(name)
            .ok_or_else(|| ResolutionError::not_found(name))?;
        match entry {
            RegisteredContext::Service { promotes } => self.resolve_service(source, &promotes, visited),
            RegisteredContext::Composite(_) => Err(ResolutionError::NotInvocable {
                name: name.to_string(),
                kind: ContextKind::Composite,
            }
            .into()),
            RegisteredContext::Atomic { scope, contract } => {
                let key = WireKey::new(source, name, BindingType::Local);
                self.cached_wire(key, || {
                    self.wire_builder(source, name, contract)
                        .with_target_container(self.inner.container_for(scope))
                })
            }
            RegisteredContext::Reference {
                contract,
                binding,
                terminal,
            } => {
                let key = WireKey::new(source, name, binding.clone());
                self.cached_wire(key, || {
                    self.wire_builder(source, name, contract)
                        .with_binding(binding)
                        .with_binding_terminal(terminal)
                })
            }
        }
    }

    fn wire_builder(&self, source: &str, target: &str, contract: Arc<ServiceContract>) -> WireBuilder {
        let mut builder = WireBuilder::new(source, target, contract)
            .with_event_sink(Arc::clone(&self.inner.sink))
            .with_request_scope(self.inner.container_for(Scope::Request));
        for policy in self.inner.policies.read().iter() {
            builder = builder.with_reference_interceptor(Arc::clone(policy));
        }
        if let Some(scheduler) = &self.inner.scheduler {
            builder = builder.with_scheduler(Arc::clone(scheduler));
        }
        builder
    }

    fn cached_wire<F>(&self, key: WireKey, builder: F) -> Result<ServiceProxy, RuntimeError>
    where
        F: FnOnce() -> WireBuilder,
    {
        let wire = self
            .inner
            .wires
            .entry(key)
            .or_try_insert_with(|| builder().build().map(Arc::new))?;
        Ok(ServiceProxy::new(
            Arc::clone(wire.value()),
            Arc::downgrade(&self.inner),
        ))
    }

    /// Starts every container, runs eager initialization, then starts
    /// child composites.
    pub fn start(&self) -> BoxFuture<'_, Result<(), RuntimeError>> {
        async move {
            {
                let mut state = self.inner.state.lock();
                if *state != LifecycleState::Uninitialized {
                    return Err(IllegalStateError::wrong_state(
                        &self.inner.name,
                        "start",
                        LifecycleState::Uninitialized,
                        *state,
                    )
                    .into());
                }
                *state = LifecycleState::Running;
            }

            for container in self.inner.containers() {
                container.start()?;
            }
            for scope in [Scope::Module, Scope::Composite] {
                self.inner
                    .container_for(scope)
                    .on_event(ScopeEvent::ScopeStart)
                    .await?;
            }
            for child in self.children() {
                child.start().await?;
            }
            info!(registry = %self.inner.name, "Registry started");
            Ok(())
        }
        .boxed()
    }

    fn in_flight(&self) -> usize {
        let own: usize = self.inner.containers().iter().map(|c| c.in_flight()).sum();
        own + self.children().iter().map(Self::in_flight).sum::<usize>()
    }

    /// Stops child composites, then every container in reverse start order.
    ///
    /// Refused while any dispatch is in flight anywhere in the tree.
    pub fn stop(&self) -> BoxFuture<'_, Result<(), RuntimeError>> {
        async move {
            {
                let state = self.inner.state.lock();
                if *state != LifecycleState::Running {
                    return Err(IllegalStateError::wrong_state(
                        &self.inner.name,
                        "stop",
                        LifecycleState::Running,
                        *state,
                    )
                    .into());
                }
            }
            let in_flight = self.in_flight();
            if in_flight > 0 {
                return Err(IllegalStateError::Busy {
                    target: self.inner.name.clone(),
                    in_flight,
                }
                .into());
            }
            *self.inner.state.lock() = LifecycleState::Stopped;

            let mut first_error = None;
            for child in self.children().into_iter().rev() {
                if let Err(e) = child.stop().await {
                    warn!(registry = %self.inner.name, child = %child.name(), error = %e, "Child stop failed");
                    first_error.get_or_insert(e);
                }
            }
            for container in self.inner.containers().into_iter().rev() {
                if let Err(e) = container.stop().await {
                    warn!(registry = %self.inner.name, container = %container.name(), error = %e, "Container stop failed");
                    first_error.get_or_insert(e);
                }
            }
            self.inner.wires.clear();
            info!(registry = %self.inner.name, "Registry stopped");
            first_error.map_or(Ok(()), Err)
        }
        .boxed()
    }

    /// Ends a request here and in every child composite.
    pub fn end_request(&self, request_id: RequestId) -> BoxFuture<'_, usize> {
        async move {
            let mut destroyed = self.inner.request.end_request(request_id).await;
            for child in self.children() {
                destroyed += child.end_request(request_id).await;
            }
            destroyed
        }
        .boxed()
    }

    /// Ends a conversation here and in every child composite.
    pub fn end_conversation<'a>(&'a self, conversation: &'a ConversationId) -> BoxFuture<'a, usize> {
        async move {
            let mut destroyed = self.inner.conversation.end_conversation(conversation).await;
            for child in self.children() {
                destroyed += child.end_conversation(conversation).await;
            }
            destroyed
        }
        .boxed()
    }

    /// Tears down expired conversations here and in every child composite.
    pub fn reap_expired(&self) -> BoxFuture<'_, usize> {
        async move {
            let mut reaped = self.inner.conversation.reap_expired().await;
            for child in self.children() {
                reaped += child.reap_expired().await;
            }
            reaped
        }
        .boxed()
    }
}

impl fmt::Debug for CompositeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRegistry")
            .field("name", &self.inner.name)
            .field("state", &self.lifecycle_state())
            .field("names", &self.names())
            .field("wires", &self.wire_count())
            .finish()
    }
}
