//! Module and composite scope: one context per name for the container's life.

use super::container::{ContainerCore, InFlightGuard};
use super::destroy_queue::DestroyQueue;
use super::store::open_context;
use super::{ScopeContainer, ScopeEvent};
use crate::component::{ComponentContext, ContextFactory};
use crate::core::{LifecycleState, Scope};
use crate::errors::{IllegalStateError, RuntimeError};
use crate::events::EventSink;
use crate::work::{CorrelationKey, WorkContext};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct ModuleStore {
    contexts: DashMap<String, Arc<ComponentContext>>,
    queue: Arc<DestroyQueue>,
    eager_pending: AtomicBool,
}

/// Container for module-scoped (and composite-scoped) components.
///
/// The store is built on scope start or on first lookup. Building it runs
/// in two passes: every registered context is created and started, then
/// eager contexts create their instances. Initializers may therefore reach
/// siblings registered after them.
pub struct ModuleScopeContainer {
    core: ContainerCore,
    store: RwLock<Option<Arc<ModuleStore>>>,
}

impl ModuleScopeContainer {
    /// Creates a module scope container.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scope(name, Scope::Module)
    }

    /// Creates a container for a composite's own contexts.
    #[must_use]
    pub fn composite(name: impl Into<String>) -> Self {
        Self::with_scope(name, Scope::Composite)
    }

    fn with_scope(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            core: ContainerCore::new(name, scope),
            store: RwLock::new(None),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.core.set_sink(sink);
        self
    }

    /// Sets the per-component teardown timeout.
    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.core.set_teardown_timeout(timeout);
        self
    }

    /// Returns the names queued for teardown, in instance-creation order.
    #[must_use]
    pub fn destroy_order(&self) -> Vec<String> {
        self.store
            .read()
            .as_ref()
            .map(|s| s.queue.names())
            .unwrap_or_default()
    }

    /// Returns the store, creating and starting every context on first use.
    fn ensure_store(&self) -> Result<Arc<ModuleStore>, IllegalStateError> {
        if let Some(store) = self.store.read().as_ref() {
            return Ok(Arc::clone(store));
        }

        let mut slot = self.store.write();
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        // stop takes the slot after leaving RUNNING
        self.core.ensure_running("build module store")?;
        let store = Arc::new(ModuleStore {
            contexts: DashMap::new(),
            queue: DestroyQueue::new(self.core.name(), Arc::clone(self.core.sink())),
            eager_pending: AtomicBool::new(true),
        });
        for factory in self.core.factories() {
            let context = open_context(&factory, CorrelationKey::Module, &store.queue);
            store.contexts.insert(factory.name().to_string(), context);
        }
        debug!(
            container = %self.core.name(),
            contexts = store.contexts.len(),
            "Module contexts created"
        );
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Second pass: create instances of eager contexts in registration order.
    async fn init_eager(&self, store: &ModuleStore) -> Result<(), RuntimeError> {
        if !store.eager_pending.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for factory in self.core.factories() {
            let Some(context) = store.contexts.get(factory.name()).map(|c| Arc::clone(c.value()))
            else {
                continue;
            };
            if !context.is_eager_init() {
                continue;
            }
            if let Err(e) = context.instance().await {
                warn!(
                    container = %self.core.name(),
                    component = %context.name(),
                    error = %e,
                    "Eager initialization failed"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn initialized_store(&self) -> Result<Arc<ModuleStore>, RuntimeError> {
        let store = self.ensure_store()?;
        self.init_eager(&store).await?;
        Ok(store)
    }
}

#[async_trait]
impl ScopeContainer for ModuleScopeContainer {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn scope(&self) -> Scope {
        self.core.scope()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.core.state()
    }

    async fn register_factory(&self, factory: Arc<ContextFactory>) -> Result<(), RuntimeError> {
        self.core.register(Arc::clone(&factory))?;

        if self.core.state() != LifecycleState::Running {
            return Ok(());
        }
        let Some(store) = self.store.read().clone() else {
            return Ok(());
        };
        let context = store
            .contexts
            .entry(factory.name().to_string())
            .or_insert_with(|| open_context(&factory, CorrelationKey::Module, &store.queue))
            .clone();
        if context.is_eager_init() {
            context.instance().await?;
        }
        Ok(())
    }

    fn start(&self) -> Result<(), RuntimeError> {
        self.core.start()
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        self.core.begin_stop()?;

        let store = self.store.write().take();
        let (mut destroyed, mut failed) = (0, 0);
        if let Some(store) = store {
            let report = store.queue.shutdown(self.core.teardown_timeout()).await;
            for entry in &store.contexts {
                entry.value().mark_stopped();
            }
            store.contexts.clear();
            destroyed = report.destroyed;
            failed = report.failures.len();
        }
        self.core.finish_stop(destroyed, failed);
        Ok(())
    }

    async fn get_context(
        &self,
        name: &str,
        _work: &WorkContext,
    ) -> Result<Arc<ComponentContext>, RuntimeError> {
        self.core.ensure_running("get context")?;
        self.core.factory(name)?;
        let store = self.initialized_store().await?;

        if let Some(context) = store.contexts.get(name) {
            return Ok(Arc::clone(context.value()));
        }
        // registered before start but after the store was built
        let factory = self.core.factory(name)?;
        let context = store
            .contexts
            .entry(name.to_string())
            .or_insert_with(|| open_context(&factory, CorrelationKey::Module, &store.queue))
            .clone();
        Ok(context)
    }

    fn get_context_by_key(&self, name: &str, _key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        let store = self.store.read().clone()?;
        let context = store.contexts.get(name).map(|c| Arc::clone(c.value()));
        context
    }

    fn remove_context(&self, name: &str, _work: &WorkContext) -> Option<Arc<ComponentContext>> {
        self.remove_context_by_key(name, &CorrelationKey::Module)
    }

    fn remove_context_by_key(&self, name: &str, _key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        let store = self.store.read().clone()?;
        let (_, context) = store.contexts.remove(name)?;
        store.queue.remove(context.id());
        context.mark_stopped();
        Some(context)
    }

    async fn on_event(&self, event: ScopeEvent) -> Result<(), RuntimeError> {
        match event {
            ScopeEvent::ScopeStart => {
                self.core.ensure_running("handle scope start")?;
                self.initialized_store().await.map(|_| ())
            }
            ScopeEvent::ScopeStop => self.stop().await,
            ScopeEvent::InstanceCreated(context) => {
                if let Some(store) = self.store.read().as_ref() {
                    store.queue.push(context);
                }
                Ok(())
            }
            ScopeEvent::RequestEnd(_) | ScopeEvent::ConversationEnd(_) => Ok(()),
        }
    }

    fn begin_dispatch(&self) -> Result<InFlightGuard, IllegalStateError> {
        self.core.begin_dispatch()
    }

    fn in_flight(&self) -> usize {
        self.core.in_flight()
    }
}

impl std::fmt::Debug for ModuleScopeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleScopeContainer")
            .field("core", &self.core)
            .field("destroy_order", &self.destroy_order())
            .finish()
    }
}
