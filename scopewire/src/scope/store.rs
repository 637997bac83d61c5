//! Live-context stores keyed by correlation unit.

use super::destroy_queue::{DestroyQueue, TeardownReport};
use crate::component::{ComponentContext, ContextFactory, InstanceListener};
use crate::events::EventSink;
use crate::work::CorrelationKey;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Creates a started context subscribed to `queue`.
pub(crate) fn open_context(
    factory: &Arc<ContextFactory>,
    key: CorrelationKey,
    queue: &Arc<DestroyQueue>,
) -> Arc<ComponentContext> {
    let context = factory.create_context(key);
    // fresh contexts are always UNINITIALIZED
    let _ = context.start();
    let listener: Weak<dyn InstanceListener> = Arc::downgrade(queue) as Weak<dyn InstanceListener>;
    context.add_listener(listener);
    context
}

/// Live contexts for one request or conversation.
///
/// A unit closes at teardown and never hands out contexts again.
pub(crate) struct CorrelationUnit {
    key: CorrelationKey,
    contexts: DashMap<String, Arc<ComponentContext>>,
    queue: Arc<DestroyQueue>,
    created_at: Instant,
    last_access: Mutex<Instant>,
    closed: RwLock<bool>,
}

impl CorrelationUnit {
    fn new(key: CorrelationKey, container: &str, sink: Arc<dyn EventSink>) -> Self {
        let now = Instant::now();
        Self {
            key,
            contexts: DashMap::new(),
            queue: DestroyQueue::new(container, sink),
            created_at: now,
            last_access: Mutex::new(now),
            closed: RwLock::new(false),
        }
    }

    pub(crate) fn key(&self) -> &CorrelationKey {
        &self.key
    }

    pub(crate) fn queue(&self) -> &Arc<DestroyQueue> {
        &self.queue
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }

    pub(crate) fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Returns the context for `factory`, creating it atomically on a miss.
    /// Returns `None` once the unit has closed.
    pub(crate) fn context_or_create(&self, factory: &Arc<ContextFactory>) -> Option<Arc<ComponentContext>> {
        let closed = self.closed.read();
        if *closed {
            return None;
        }
        let context = self
            .contexts
            .entry(factory.name().to_string())
            .or_insert_with(|| open_context(factory, self.key.clone(), &self.queue))
            .clone();
        Some(context)
    }

    pub(crate) fn context(&self, name: &str) -> Option<Arc<ComponentContext>> {
        self.contexts.get(name).map(|c| Arc::clone(c.value()))
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<ComponentContext>> {
        let (_, context) = self.contexts.remove(name)?;
        self.queue.remove(context.id());
        context.mark_stopped();
        Some(context)
    }

    /// Closes the unit, destroys queued contexts last-first and stops the rest.
    pub(crate) async fn teardown(&self, timeout: Duration) -> TeardownReport {
        *self.closed.write() = true;
        let report = self.queue.shutdown(timeout).await;
        for entry in &self.contexts {
            entry.value().mark_stopped();
        }
        self.contexts.clear();
        report
    }
}

/// Correlation units addressed by key.
pub(crate) struct KeyedStore {
    units: DashMap<CorrelationKey, Arc<CorrelationUnit>>,
    closed: RwLock<bool>,
}

impl KeyedStore {
    pub(crate) fn new() -> Self {
        Self {
            units: DashMap::new(),
            closed: RwLock::new(false),
        }
    }

    /// Returns the unit for `key`, creating it atomically on a miss.
    /// Returns `None` once the store has been drained.
    pub(crate) fn unit_or_create(
        &self,
        key: &CorrelationKey,
        container: &str,
        sink: &Arc<dyn EventSink>,
    ) -> Option<Arc<CorrelationUnit>> {
        let closed = self.closed.read();
        if *closed {
            return None;
        }
        let unit = self
            .units
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CorrelationUnit::new(key.clone(), container, Arc::clone(sink))))
            .clone();
        Some(unit)
    }

    pub(crate) fn unit(&self, key: &CorrelationKey) -> Option<Arc<CorrelationUnit>> {
        self.units.get(key).map(|u| Arc::clone(u.value()))
    }

    pub(crate) fn remove(&self, key: &CorrelationKey) -> Option<Arc<CorrelationUnit>> {
        self.units.remove(key).map(|(_, unit)| unit)
    }

    /// Removes `key` only if it still maps to `unit`.
    pub(crate) fn remove_if_same(
        &self,
        key: &CorrelationKey,
        unit: &Arc<CorrelationUnit>,
    ) -> Option<Arc<CorrelationUnit>> {
        self.units
            .remove_if(key, |_, current| Arc::ptr_eq(current, unit))
            .map(|(_, unit)| unit)
    }

    pub(crate) fn units(&self) -> Vec<Arc<CorrelationUnit>> {
        self.units.iter().map(|u| Arc::clone(u.value())).collect()
    }

    /// Closes the store and removes every unit.
    pub(crate) fn drain(&self) -> Vec<Arc<CorrelationUnit>> {
        *self.closed.write() = true;
        let keys: Vec<_> = self.units.iter().map(|u| u.key().clone()).collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Scope;
    use crate::events::NoOpEventSink;
    use crate::testing::{RecordingComponent, ShutdownLog};
    use crate::work::RequestId;

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(NoOpEventSink)
    }

    #[tokio::test]
    async fn test_unit_creates_context_once() {
        let log = ShutdownLog::new();
        let factory = Arc::new(RecordingComponent::factory("A", Scope::Request, &log));
        let store = KeyedStore::new();
        let key = CorrelationKey::Request(RequestId::new());

        let unit = store.unit_or_create(&key, "test", &sink()).unwrap();
        let first = unit.context_or_create(&factory).unwrap();
        let second = store
            .unit_or_create(&key, "test", &sink())
            .unwrap()
            .context_or_create(&factory)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_if_same_ignores_replaced_unit() {
        let store = KeyedStore::new();
        let key = CorrelationKey::Request(RequestId::new());
        let old = store.unit_or_create(&key, "test", &sink()).unwrap();
        store.remove(&key);
        let _new = store.unit_or_create(&key, "test", &sink()).unwrap();

        assert!(store.remove_if_same(&key, &old).is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_counts_and_stops() {
        let log = ShutdownLog::new();
        let store = KeyedStore::new();
        let key = CorrelationKey::Request(RequestId::new());
        let unit = store.unit_or_create(&key, "test", &sink()).unwrap();
        let used = unit
            .context_or_create(&Arc::new(RecordingComponent::factory("Used", Scope::Request, &log)))
            .unwrap();
        let idle = unit
            .context_or_create(&Arc::new(RecordingComponent::factory("Idle", Scope::Request, &log)))
            .unwrap();
        used.instance().await.unwrap();

        let report = unit.teardown(Duration::from_secs(1)).await;

        assert_eq!(report.destroyed, 1);
        assert!(report.failures.is_empty());
        assert_eq!(log.destroyed(), vec!["Used"]);
        assert_eq!(idle.lifecycle_state(), crate::core::LifecycleState::Stopped);
        assert!(unit.context("Used").is_none());
    }

    #[tokio::test]
    async fn test_closed_unit_hands_out_nothing() {
        let log = ShutdownLog::new();
        let factory = Arc::new(RecordingComponent::factory("A", Scope::Request, &log));
        let store = KeyedStore::new();
        let key = CorrelationKey::Request(RequestId::new());
        let unit = store.unit_or_create(&key, "test", &sink()).unwrap();
        let early = unit.context_or_create(&factory).unwrap();

        unit.teardown(Duration::from_secs(1)).await;

        assert!(unit.context_or_create(&factory).is_none());
        assert!(early.instance().await.is_err());
        assert!(log.created().is_empty());
    }

    #[tokio::test]
    async fn test_drained_store_creates_no_units() {
        let store = KeyedStore::new();
        let key = CorrelationKey::Request(RequestId::new());
        store.unit_or_create(&key, "test", &sink()).unwrap();

        assert_eq!(store.drain().len(), 1);
        assert!(store.unit_or_create(&key, "test", &sink()).is_none());
        assert_eq!(store.len(), 0);
    }
}
