//! Live component contexts.

use super::{Component, ContextFactory};
use crate::core::{LifecycleState, Scope};
use crate::errors::{ComponentError, IllegalStateError, RuntimeError};
use crate::work::CorrelationKey;
use parking_lot::{Mutex, RwLock};
use futures::FutureExt;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Notified when a context creates its instance.
pub trait InstanceListener: Send + Sync {
    /// Called once, by the task that created the instance.
    ///
    /// Returns false if the listener has already shut down and will never
    /// tear the context down.
    fn on_instance_created(&self, context: &Arc<ComponentContext>) -> bool;
}

/// The live wrapper around one component instance.
///
/// The instance is created at most once, on first use. A destroyed context
/// is never revived; the owning container creates a new one instead.
pub struct ComponentContext {
    id: Uuid,
    factory: Arc<ContextFactory>,
    key: CorrelationKey,
    state: Mutex<LifecycleState>,
    instance: OnceCell<Arc<dyn Component>>,
    destroyed: AtomicBool,
    listeners: RwLock<Vec<Weak<dyn InstanceListener>>>,
}

impl ComponentContext {
    pub(crate) fn new(factory: Arc<ContextFactory>, key: CorrelationKey) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            factory,
            key,
            state: Mutex::new(LifecycleState::Uninitialized),
            instance: OnceCell::new(),
            destroyed: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Returns the unique id of this context.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the component name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.factory.name()
    }

    /// Returns the declared scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.factory.scope()
    }

    /// Returns the correlation key this context belongs to.
    #[must_use]
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Returns the factory this context was created from.
    #[must_use]
    pub fn factory(&self) -> &Arc<ContextFactory> {
        &self.factory
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Returns true if the instance should be created at scope start.
    #[must_use]
    pub fn is_eager_init(&self) -> bool {
        self.factory.is_eager_init()
    }

    /// Returns true if the context takes part in ordered teardown.
    #[must_use]
    pub fn is_destroyable(&self) -> bool {
        self.factory.is_destroyable()
    }

    /// Returns true once the instance exists.
    #[must_use]
    pub fn has_instance(&self) -> bool {
        self.instance.initialized()
    }

    /// Subscribes a listener to instance creation.
    pub fn add_listener(&self, listener: Weak<dyn InstanceListener>) {
        self.listeners.write().push(listener);
    }

    /// Transitions UNINITIALIZED to RUNNING.
    pub fn start(&self) -> Result<(), IllegalStateError> {
        let mut state = self.state.lock();
        if *state != LifecycleState::Uninitialized {
            return Err(IllegalStateError::wrong_state(
                self.name(),
                "start",
                LifecycleState::Uninitialized,
                *state,
            ));
        }
        *state = LifecycleState::Running;
        Ok(())
    }

    /// Returns the instance, creating and initializing it on first use.
    ///
    /// Concurrent first callers wait on the same creation; exactly one of
    /// them runs the creation strategy and notifies listeners.
    pub async fn instance(self: &Arc<Self>) -> Result<Arc<dyn Component>, RuntimeError> {
        let state = self.lifecycle_state();
        if state != LifecycleState::Running {
            return Err(IllegalStateError::wrong_state(
                self.name(),
                "resolve instance",
                LifecycleState::Running,
                state,
            )
            .into());
        }

        let created = AtomicBool::new(false);
        let instance = self
            .instance
            .get_or_try_init(|| async {
                let instance = self.factory.create_instance()?;
                instance.init().await?;
                created.store(true, Ordering::Release);
                Ok::<_, ComponentError>(instance)
            })
            .await?;
        let instance = Arc::clone(instance);

        if created.load(Ordering::Acquire) {
            debug!(
                component = %self.name(),
                scope = %self.scope(),
                key = %self.key,
                "Component instance created"
            );
            if !self.notify_created() {
                return Err(self.discard(&instance).await);
            }
        }
        Ok(instance)
    }

    /// Returns false if any listener refused the new instance or is gone.
    fn notify_created(self: &Arc<Self>) -> bool {
        let listeners: Vec<_> = self.listeners.read().iter().map(Weak::upgrade).collect();
        let mut adopted = true;
        for listener in listeners {
            adopted &= listener.is_some_and(|l| l.on_instance_created(self));
        }
        adopted
    }

    /// Destroys an instance created after its owner shut down.
    async fn discard(&self, instance: &Arc<dyn Component>) -> RuntimeError {
        self.destroyed.store(true, Ordering::Release);
        *self.state.lock() = LifecycleState::Stopped;
        if self.is_destroyable() {
            match AssertUnwindSafe(instance.destroy()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(component = %self.name(), key = %self.key, error = %e, "Orphaned instance destroy failed");
                }
                Err(_) => {
                    warn!(component = %self.name(), key = %self.key, "Orphaned instance destroy panicked");
                }
            }
        }
        debug!(
            component = %self.name(),
            key = %self.key,
            "Instance created after teardown; discarded"
        );
        IllegalStateError::wrong_state(
            self.name(),
            "resolve instance",
            LifecycleState::Running,
            LifecycleState::Stopped,
        )
        .into()
    }

    /// Tears the context down. Runs the destroy hook at most once.
    ///
    /// Returns `Ok(true)` if the hook ran, `Ok(false)` if there was nothing
    /// to destroy or the context was already destroyed.
    pub async fn destroy(&self) -> Result<bool, ComponentError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        *self.state.lock() = LifecycleState::Stopped;
        match self.instance.get() {
            Some(instance) => {
                instance.destroy().await?;
                debug!(component = %self.name(), key = %self.key, "Component destroyed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Marks the context STOPPED without running the destroy hook.
    pub fn mark_stopped(&self) {
        self.destroyed.store(true, Ordering::Release);
        *self.state.lock() = LifecycleState::Stopped;
    }
}

impl Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("key", &self.key)
            .field("state", &self.lifecycle_state())
            .field("has_instance", &self.has_instance())
            .finish()
    }
}
