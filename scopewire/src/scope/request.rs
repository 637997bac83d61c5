//! Request scope: one context per name per explicit request handle.

use super::container::{ContainerCore, InFlightGuard};
use super::store::{CorrelationUnit, KeyedStore};
use super::{ScopeContainer, ScopeEvent};
use crate::component::{ComponentContext, ContextFactory};
use crate::core::{LifecycleState, Scope};
use crate::errors::{IllegalStateError, ResolutionError, RuntimeError};
use crate::events::{event_types, EventSink};
use crate::work::{CorrelationKey, RequestId, WorkContext};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Container for request-scoped components.
///
/// Contexts are keyed by the [`RequestId`] carried in the caller's work
/// context. A request end event discards every context of that request.
pub struct RequestScopeContainer {
    core: ContainerCore,
    units: KeyedStore,
}

impl RequestScopeContainer {
    /// Creates a request scope container.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ContainerCore::new(name, Scope::Request),
            units: KeyedStore::new(),
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

    /// Returns the number of requests with live contexts.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.units.len()
    }

    /// Discards the contexts of one request.
    pub async fn end_request(&self, request_id: RequestId) -> usize {
        let Some(unit) = self.units.remove(&CorrelationKey::Request(request_id)) else {
            return 0;
        };
        let (destroyed, failures) = self.teardown(&unit).await;
        debug!(
            container = %self.core.name(),
            request = %request_id,
            destroyed,
            "Request ended"
        );
        self.core.emit(
            event_types::REQUEST_ENDED,
            serde_json::json!({
                "request_id": request_id.to_string(),
                "destroyed": destroyed,
                "failed": failures,
            }),
        );
        destroyed
    }

    async fn teardown(&self, unit: &CorrelationUnit) -> (usize, usize) {
        let report = unit.teardown(self.core.teardown_timeout()).await;
        (report.destroyed, report.failures.len())
    }

    fn key_for(&self, name: &str, work: &WorkContext) -> Result<CorrelationKey, ResolutionError> {
        work.correlation_key(Scope::Request)
            .ok_or_else(|| ResolutionError::MissingCorrelationKey {
                name: name.to_string(),
                scope: Scope::Request,
            })
    }
}

#[async_trait]
impl ScopeContainer for RequestScopeContainer {
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
        self.core.register(factory)
    }

    fn start(&self) -> Result<(), RuntimeError> {
        self.core.start()
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        self.core.begin_stop()?;
        let (mut destroyed, mut failed) = (0, 0);
        for unit in self.units.drain() {
            let (d, f) = self.teardown(&unit).await;
            destroyed += d;
            failed += f;
        }
        self.core.finish_stop(destroyed, failed);
        Ok(())
    }

    async fn get_context(
        &self,
        name: &str,
        work: &WorkContext,
    ) -> Result<Arc<ComponentContext>, RuntimeError> {
        self.core.ensure_running("get context")?;
        let factory = self.core.factory(name)?;
        let key = self.key_for(name, work)?;
        loop {
            let unit = self
                .units
                .unit_or_create(&key, self.core.name(), self.core.sink())
                .ok_or_else(|| self.core.not_running("get context"))?;
            if let Some(context) = unit.context_or_create(&factory) {
                return Ok(context);
            }
            // ended concurrently
            self.units.remove_if_same(&key, &unit);
        }
    }

    fn get_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        self.units.unit(key)?.context(name)
    }

    fn remove_context(&self, name: &str, work: &WorkContext) -> Option<Arc<ComponentContext>> {
        let key = work.correlation_key(Scope::Request)?;
        self.remove_context_by_key(name, &key)
    }

    fn remove_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        self.units.unit(key)?.remove(name)
    }

    async fn on_event(&self, event: ScopeEvent) -> Result<(), RuntimeError> {
        match event {
            ScopeEvent::RequestEnd(request_id) => {
                self.end_request(request_id).await;
                Ok(())
            }
            ScopeEvent::ScopeStop => self.stop().await,
            ScopeEvent::InstanceCreated(context) => {
                if let Some(unit) = self.units.unit(context.key()) {
                    unit.queue().push(context);
                }
                Ok(())
            }
            ScopeEvent::ScopeStart | ScopeEvent::ConversationEnd(_) => Ok(()),
        }
    }

    fn begin_dispatch(&self) -> Result<InFlightGuard, IllegalStateError> {
        self.core.begin_dispatch()
    }

    fn in_flight(&self) -> usize {
        self.core.in_flight()
    }
}

impl std::fmt::Debug for RequestScopeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScopeContainer")
            .field("core", &self.core)
            .field("active_requests", &self.active_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{RecordingComponent, ShutdownLog};

    async fn container(log: &ShutdownLog) -> RequestScopeContainer {
        let container = RequestScopeContainer::new("request");
        container
            .register_factory(Arc::new(RecordingComponent::factory("TestService1", Scope::Request, log)))
            .await
            .unwrap();
        container.start().unwrap();
        container
    }

    #[tokio::test]
    async fn test_missing_request_id() {
        let container = container(&ShutdownLog::new()).await;
        let result = container.get_context("TestService1", &WorkContext::new()).await;
        assert!(matches!(
            result,
            Err(RuntimeError::Resolution(ResolutionError::MissingCorrelationKey { .. }))
        ));
    }

    #[tokio::test]
    async fn test_by_key_never_creates() {
        let container = container(&ShutdownLog::new()).await;
        let key = CorrelationKey::Request(RequestId::new());
        assert!(container.get_context_by_key("TestService1", &key).is_none());
        assert_eq!(container.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_end_discards_unit() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let container = RequestScopeContainer::new("request").with_event_sink(sink.clone());
        container
            .register_factory(Arc::new(RecordingComponent::factory("TestService1", Scope::Request, &log)))
            .await
            .unwrap();
        container.start().unwrap();

        let request = RequestId::new();
        let work = WorkContext::for_request(request);
        let context = container.get_context("TestService1", &work).await.unwrap();
        context.instance().await.unwrap();

        container.on_event(ScopeEvent::RequestEnd(request)).await.unwrap();

        assert_eq!(container.active_requests(), 0);
        assert_eq!(log.destroyed(), vec!["TestService1"]);
        assert!(container
            .get_context_by_key("TestService1", &CorrelationKey::Request(request))
            .is_none());
        assert_eq!(sink.events_of_type(event_types::REQUEST_ENDED).len(), 1);
    }

    #[tokio::test]
    async fn test_register_after_first_request() {
        let log = ShutdownLog::new();
        let container = container(&log).await;
        let work = WorkContext::for_request(RequestId::new());
        container.get_context("TestService1", &work).await.unwrap();

        container
            .register_factory(Arc::new(RecordingComponent::factory("NewTestService", Scope::Request, &log)))
            .await
            .unwrap();

        assert!(container.get_context("NewTestService", &work).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_tears_down_open_requests() {
        let log = ShutdownLog::new();
        let container = container(&log).await;
        for _ in 0..3 {
            let work = WorkContext::for_request(RequestId::new());
            let context = container.get_context("TestService1", &work).await.unwrap();
            context.instance().await.unwrap();
        }

        container.stop().await.unwrap();

        assert_eq!(log.destroyed().len(), 3);
        assert_eq!(container.active_requests(), 0);
        assert_eq!(container.lifecycle_state(), LifecycleState::Stopped);
    }
}
