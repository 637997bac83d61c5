//! Conversation scope: one context per name per conversation id.

use super::container::{ContainerCore, InFlightGuard};
use super::store::{CorrelationUnit, KeyedStore};
use super::{ScopeContainer, ScopeEvent};
use crate::component::{ComponentContext, ContextFactory};
use crate::config::ConversationConfig;
use crate::core::{LifecycleState, Scope};
use crate::errors::{IllegalStateError, ResolutionError, RuntimeError};
use crate::events::{event_types, EventSink};
use crate::work::{ConversationId, CorrelationKey, WorkContext};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Limits {
    max_age: Option<Duration>,
    max_idle: Option<Duration>,
}

fn tighter(current: Option<Duration>, proposed: Option<Duration>) -> Option<Duration> {
    match (current, proposed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Container for conversation-scoped components.
///
/// A conversation lives until it is ended explicitly, or until it
/// outlives its maximum age or idle time. An expired conversation is torn
/// down on the next lookup or by [`reap_expired`](Self::reap_expired).
pub struct ConversationalScopeContainer {
    core: ContainerCore,
    units: KeyedStore,
    limits: RwLock<Limits>,
}

impl ConversationalScopeContainer {
    /// Creates a conversation scope container without limits.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ContainerCore::new(name, Scope::Conversation),
            units: KeyedStore::new(),
            limits: RwLock::new(Limits::default()),
        }
    }

    /// Applies limits from configuration.
    #[must_use]
    pub fn with_config(self, config: &ConversationConfig) -> Self {
        self.tighten_limits(config.max_age(), config.max_idle_time());
        self
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

    /// Lowers the age and idle limits. Limits never loosen.
    pub fn tighten_limits(&self, max_age: Option<Duration>, max_idle: Option<Duration>) {
        let mut limits = self.limits.write();
        limits.max_age = tighter(limits.max_age, max_age);
        limits.max_idle = tighter(limits.max_idle, max_idle);
    }

    /// Returns the maximum conversation age.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.limits.read().max_age
    }

    /// Returns the maximum idle time.
    #[must_use]
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.limits.read().max_idle
    }

    /// Returns the number of open conversations.
    #[must_use]
    pub fn active_conversations(&self) -> usize {
        self.units.len()
    }

    fn is_expired(&self, unit: &CorrelationUnit, now: Instant) -> bool {
        let limits = *self.limits.read();
        limits.max_age.is_some_and(|max| unit.age(now) > max)
            || limits.max_idle.is_some_and(|max| unit.idle(now) > max)
    }

    /// Ends a conversation and tears down its contexts.
    pub async fn end_conversation(&self, conversation: &ConversationId) -> usize {
        let key = CorrelationKey::Conversation(conversation.clone());
        let Some(unit) = self.units.remove(&key) else {
            return 0;
        };
        let destroyed = self.teardown(&unit, event_types::CONVERSATION_ENDED).await;
        debug!(
            container = %self.core.name(),
            conversation = %conversation,
            destroyed,
            "Conversation ended"
        );
        destroyed
    }

    /// Tears down every expired conversation and returns how many there were.
    pub async fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut reaped = 0;
        for unit in self.units.units() {
            if !self.is_expired(&unit, now) {
                continue;
            }
            if let Some(unit) = self.units.remove_if_same(unit.key(), &unit) {
                self.teardown(&unit, event_types::CONVERSATION_EXPIRED).await;
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(container = %self.core.name(), reaped, "Expired conversations reaped");
        }
        reaped
    }

    async fn teardown(&self, unit: &CorrelationUnit, event_type: &str) -> usize {
        let report = unit.teardown(self.core.teardown_timeout()).await;
        let conversation = match unit.key() {
            CorrelationKey::Conversation(id) => id.to_string(),
            other => other.to_string(),
        };
        self.core.emit(
            event_type,
            serde_json::json!({
                "conversation_id": conversation,
                "destroyed": report.destroyed,
                "failed": report.failures.len(),
            }),
        );
        report.destroyed
    }

    fn key_for(&self, name: &str, work: &WorkContext) -> Result<CorrelationKey, ResolutionError> {
        work.correlation_key(Scope::Conversation)
            .ok_or_else(|| ResolutionError::MissingCorrelationKey {
                name: name.to_string(),
                scope: Scope::Conversation,
            })
    }
}

#[async_trait]
impl ScopeContainer for ConversationalScopeContainer {
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
            let report = unit.teardown(self.core.teardown_timeout()).await;
            destroyed += report.destroyed;
            failed += report.failures.len();
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

        if let Some(unit) = self.units.unit(&key) {
            if self.is_expired(&unit, Instant::now()) {
                if let Some(unit) = self.units.remove_if_same(&key, &unit) {
                    self.teardown(&unit, event_types::CONVERSATION_EXPIRED).await;
                }
                return Err(ResolutionError::ConversationExpired {
                    conversation: match &key {
                        CorrelationKey::Conversation(id) => id.to_string(),
                        other => other.to_string(),
                    },
                }
                .into());
            }
        }

        loop {
            let unit = self
                .units
                .unit_or_create(&key, self.core.name(), self.core.sink())
                .ok_or_else(|| self.core.not_running("get context"))?;
            if let Some(context) = unit.context_or_create(&factory) {
                unit.touch();
                return Ok(context);
            }
            // ended or reaped concurrently
            self.units.remove_if_same(&key, &unit);
        }
    }

    fn get_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        self.units.unit(key)?.context(name)
    }

    fn remove_context(&self, name: &str, work: &WorkContext) -> Option<Arc<ComponentContext>> {
        let key = work.correlation_key(Scope::Conversation)?;
        self.remove_context_by_key(name, &key)
    }

    fn remove_context_by_key(&self, name: &str, key: &CorrelationKey) -> Option<Arc<ComponentContext>> {
        self.units.unit(key)?.remove(name)
    }

    async fn on_event(&self, event: ScopeEvent) -> Result<(), RuntimeError> {
        match event {
            ScopeEvent::ConversationEnd(conversation) => {
                self.end_conversation(&conversation).await;
                Ok(())
            }
            ScopeEvent::ScopeStop => self.stop().await,
            ScopeEvent::InstanceCreated(context) => {
                if let Some(unit) = self.units.unit(context.key()) {
                    unit.queue().push(context);
                }
                Ok(())
            }
            ScopeEvent::ScopeStart | ScopeEvent::RequestEnd(_) => Ok(()),
        }
    }

    fn begin_dispatch(&self) -> Result<InFlightGuard, IllegalStateError> {
        self.core.begin_dispatch()
    }

    fn in_flight(&self) -> usize {
        self.core.in_flight()
    }
}

impl std::fmt::Debug for ConversationalScopeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationalScopeContainer")
            .field("core", &self.core)
            .field("limits", &*self.limits.read())
            .field("active_conversations", &self.active_conversations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{RecordingComponent, ShutdownLog};

    fn conversation(id: &str) -> WorkContext {
        let work = WorkContext::new();
        work.set_conversation_id(&ConversationId::new(id));
        work
    }

    async fn container(log: &ShutdownLog, sink: Arc<CollectingEventSink>) -> ConversationalScopeContainer {
        let container = ConversationalScopeContainer::new("conversation").with_event_sink(sink);
        container
            .register_factory(Arc::new(RecordingComponent::factory("Cart", Scope::Conversation, log)))
            .await
            .unwrap();
        container.start().unwrap();
        container
    }

    #[test]
    fn test_tighten_limits_only_lowers() {
        let container = ConversationalScopeContainer::new("c");
        container.tighten_limits(Some(Duration::from_secs(60)), None);
        container.tighten_limits(Some(Duration::from_secs(120)), Some(Duration::from_secs(5)));
        container.tighten_limits(None, Some(Duration::from_secs(10)));

        assert_eq!(container.max_age(), Some(Duration::from_secs(60)));
        assert_eq!(container.max_idle_time(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_with_config() {
        let container = ConversationalScopeContainer::new("c").with_config(&ConversationConfig {
            max_age_seconds: Some(30.0),
            max_idle_seconds: None,
        });
        assert_eq!(container.max_age(), Some(Duration::from_secs(30)));
        assert!(container.max_idle_time().is_none());
    }

    #[tokio::test]
    async fn test_contexts_shared_within_conversation() {
        let container = container(&ShutdownLog::new(), Arc::new(CollectingEventSink::new())).await;

        let a1 = container.get_context("Cart", &conversation("a")).await.unwrap();
        let a2 = container.get_context("Cart", &conversation("a")).await.unwrap();
        let b = container.get_context("Cart", &conversation("b")).await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(container.active_conversations(), 2);
    }

    #[tokio::test]
    async fn test_end_conversation() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let container = container(&log, sink.clone()).await;
        let context = container.get_context("Cart", &conversation("a")).await.unwrap();
        context.instance().await.unwrap();

        container
            .on_event(ScopeEvent::ConversationEnd(ConversationId::new("a")))
            .await
            .unwrap();

        assert_eq!(log.destroyed(), vec!["Cart"]);
        assert_eq!(container.active_conversations(), 0);
        assert_eq!(sink.events_of_type(event_types::CONVERSATION_ENDED).len(), 1);

        let fresh = container.get_context("Cart", &conversation("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&fresh, &context));
    }

    #[tokio::test]
    async fn test_idle_conversation_expires_on_lookup() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let container = container(&log, sink.clone()).await;
        container.tighten_limits(None, Some(Duration::from_millis(30)));

        let context = container.get_context("Cart", &conversation("a")).await.unwrap();
        context.instance().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = container.get_context("Cart", &conversation("a")).await;

        assert!(matches!(
            result,
            Err(RuntimeError::Resolution(ResolutionError::ConversationExpired { .. }))
        ));
        assert_eq!(log.destroyed(), vec!["Cart"]);
        assert_eq!(sink.events_of_type(event_types::CONVERSATION_EXPIRED).len(), 1);
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let log = ShutdownLog::new();
        let container = container(&log, Arc::new(CollectingEventSink::new())).await;
        container.tighten_limits(Some(Duration::from_millis(30)), None);

        for id in ["a", "b"] {
            let ctx = container.get_context("Cart", &conversation(id)).await.unwrap();
            ctx.instance().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        container.get_context("Cart", &conversation("c")).await.unwrap();

        assert_eq!(container.reap_expired().await, 2);
        assert_eq!(container.active_conversations(), 1);
        assert_eq!(log.destroyed().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_conversation_id() {
        let container = container(&ShutdownLog::new(), Arc::new(CollectingEventSink::new())).await;
        let result = container.get_context("Cart", &WorkContext::new()).await;
        assert!(matches!(
            result,
            Err(RuntimeError::Resolution(ResolutionError::MissingCorrelationKey { .. }))
        ));
    }
}
