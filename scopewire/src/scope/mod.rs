//! Scope containers.
//!
//! A scope container owns the context factories of one scope and decides
//! when contexts are created, looked up and destroyed:
//!
//! - [`ModuleScopeContainer`]: one context per name (module and composite scope)
//! - [`RequestScopeContainer`]: one context per name per [`RequestId`]
//! - [`ConversationalScopeContainer`]: one context per name per [`ConversationId`]
//!
//! Every container follows UNINITIALIZED → RUNNING → STOPPED. Stopping
//! destroys instances in reverse creation order and never lets one failing
//! destroy hook block the rest.

mod container;
mod conversation;
mod destroy_queue;
mod module;
mod request;
mod store;


pub use container::InFlightGuard;
pub use conversation::ConversationalScopeContainer;
pub use destroy_queue::{DestroyQueue, TeardownFailure, TeardownReport};
pub use module::ModuleScopeContainer;
pub use request::RequestScopeContainer;

use crate::component::{ComponentContext, ContextFactory};
use crate::core::{LifecycleState, Scope};
use crate::errors::{IllegalStateError, RuntimeError};
use crate::work::{ConversationId, CorrelationKey, RequestId, WorkContext};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Notifications delivered to a container through [`ScopeContainer::on_event`].
#[derive(Debug, Clone)]
pub enum ScopeEvent {
    /// Create and start all contexts, then initialize eager ones.
    ScopeStart,
    /// Shut the container down.
    ScopeStop,
    /// A context created its instance.
    InstanceCreated(Arc<ComponentContext>),
    /// A request finished.
    RequestEnd(RequestId),
    /// A conversation finished.
    ConversationEnd(ConversationId),
}

/// Lifecycle and lookup policy for one scope.
#[async_trait]
pub trait ScopeContainer: Send + Sync + Debug {
    /// Returns the container name.
    fn name(&self) -> &str;

    /// Returns the scope this container manages.
    fn scope(&self) -> Scope;

    /// Returns the lifecycle state.
    fn lifecycle_state(&self) -> LifecycleState;

    /// Adds a factory.
    ///
    /// Module-like containers that are already running create the context
    /// immediately. Keyed containers only affect later lookups.
    async fn register_factory(&self, factory: Arc<ContextFactory>) -> Result<(), RuntimeError>;

    /// Adds several factories in order.
    async fn register_factories(
        &self,
        factories: Vec<Arc<ContextFactory>>,
    ) -> Result<(), RuntimeError> {
        for factory in factories {
            self.register_factory(factory).await?;
        }
        Ok(())
    }

    /// Transitions UNINITIALIZED to RUNNING.
    fn start(&self) -> Result<(), RuntimeError>;

    /// Transitions RUNNING to STOPPED and tears down live contexts.
    ///
    /// Fails without changing state if dispatches are still in flight.
    async fn stop(&self) -> Result<(), RuntimeError>;

    /// Returns the caller's context for `name`, creating it if needed.
    async fn get_context(
        &self,
        name: &str,
        work: &WorkContext,
    ) -> Result<Arc<ComponentContext>, RuntimeError>;

    /// Returns an existing context for `name` under `key`. Never creates.
    fn get_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>>;

    /// Evicts the caller's context without running its destroy hook.
    fn remove_context(&self, name: &str, work: &WorkContext) -> Option<Arc<ComponentContext>>;

    /// Evicts the context under `key` without running its destroy hook.
    fn remove_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>>;

    /// Handles a lifecycle notification.
    async fn on_event(&self, event: ScopeEvent) -> Result<(), RuntimeError>;

    /// Marks a dispatch as in flight until the guard drops. Refused unless
    /// the container is RUNNING.
    fn begin_dispatch(&self) -> Result<InFlightGuard, IllegalStateError>;

    /// Returns the number of dispatches in flight.
    fn in_flight(&self) -> usize;
}
