//! Ordered teardown of destroyable contexts.

use crate::component::{ComponentContext, InstanceListener};
use crate::core::LifecycleState;
use crate::events::{event_types, with_timestamp, EventSink};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A destroy hook that failed during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// The component name.
    pub component: String,
    /// What went wrong.
    pub reason: String,
}

/// Outcome of [`DestroyQueue::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Destroy hooks that ran to completion.
    pub destroyed: usize,
    /// Destroy hooks that failed, panicked or timed out.
    pub failures: Vec<TeardownFailure>,
}

#[derive(Default)]
struct Pending {
    contexts: Vec<Arc<ComponentContext>>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Queued,
    Skipped,
    Closed,
}

/// Contexts in instance-creation order, destroyed last-first.
///
/// A queue closes when it shuts down. Instances created afterwards are
/// refused, and their contexts destroy them on the spot.
pub struct DestroyQueue {
    container: String,
    pending: Mutex<Pending>,
    sink: Arc<dyn EventSink>,
}

impl DestroyQueue {
    /// Creates an empty queue owned by `container`.
    #[must_use]
    pub fn new(container: impl Into<String>, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            container: container.into(),
            pending: Mutex::new(Pending::default()),
            sink,
        })
    }

    fn admit(&self, context: &Arc<ComponentContext>) -> Admission {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Admission::Closed;
        }
        if !context.is_destroyable() || pending.contexts.iter().any(|c| c.id() == context.id()) {
            return Admission::Skipped;
        }
        pending.contexts.push(Arc::clone(context));
        Admission::Queued
    }

    /// Appends a context if it is destroyable, not already queued and the
    /// queue is still open.
    pub fn push(&self, context: Arc<ComponentContext>) -> bool {
        self.admit(&context) == Admission::Queued
    }

    /// Removes a context without destroying it.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.contexts.len();
        pending.contexts.retain(|c| c.id() != id);
        pending.contexts.len() != before
    }

    /// Returns the queued component names in creation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.pending
            .lock()
            .contexts
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Returns the number of queued contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().contexts.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().contexts.is_empty()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Closes the queue and destroys every queued context in reverse
    /// creation order.
    ///
    /// Each destroy hook runs under `timeout`. Errors, panics and timeouts
    /// are logged and reported to the event sink; they never stop the
    /// remaining teardown.
    pub async fn shutdown(&self, timeout: Duration) -> TeardownReport {
        let contexts = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            std::mem::take(&mut pending.contexts)
        };
        let mut report = TeardownReport::default();

        for context in contexts.into_iter().rev() {
            if context.lifecycle_state() != LifecycleState::Running {
                continue;
            }
            let outcome =
                tokio::time::timeout(timeout, AssertUnwindSafe(context.destroy()).catch_unwind())
                    .await;
            let reason = match outcome {
                Ok(Ok(Ok(ran))) => {
                    report.destroyed += usize::from(ran);
                    None
                }
                Ok(Ok(Err(e))) => Some(e.to_string()),
                Ok(Err(_)) => Some("destroy hook panicked".to_string()),
                Err(_) => Some(format!("destroy hook timed out after {timeout:?}")),
            };

            if let Some(reason) = reason {
                warn!(
                    container = %self.container,
                    component = %context.name(),
                    reason = %reason,
                    "Component teardown failed"
                );
                self.sink
                    .emit(
                        event_types::DESTROY_FAILED,
                        Some(with_timestamp(serde_json::json!({
                            "container": self.container,
                            "component": context.name(),
                            "key": context.key().to_string(),
                            "reason": reason,
                        }))),
                    )
                    .await;
                report.failures.push(TeardownFailure {
                    component: context.name().to_string(),
                    reason,
                });
            }
        }
        report
    }
}

impl InstanceListener for DestroyQueue {
    fn on_instance_created(&self, context: &Arc<ComponentContext>) -> bool {
        self.sink.try_emit(
            event_types::INSTANCE_CREATED,
            Some(with_timestamp(serde_json::json!({
                "container": self.container,
                "component": context.name(),
                "scope": context.scope(),
                "key": context.key().to_string(),
            }))),
        );
        match self.admit(context) {
            Admission::Queued => {
                debug!(
                    container = %self.container,
                    component = %context.name(),
                    "Queued for teardown"
                );
                true
            }
            Admission::Skipped => true,
            Admission::Closed => false,
        }
    }
}

impl std::fmt::Debug for DestroyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyQueue")
            .field("container", &self.container)
            .field("contexts", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ContextFactory;
    use crate::core::Scope;
    use crate::events::CollectingEventSink;
    use crate::testing::{FailingComponent, FailureMode, RecordingComponent, ShutdownLog};
    use crate::work::CorrelationKey;
    use pretty_assertions::assert_eq;

    async fn running(factory: ContextFactory) -> Arc<ComponentContext> {
        let context = Arc::new(factory).create_context(CorrelationKey::Module);
        context.start().unwrap();
        context.instance().await.unwrap();
        context
    }

    #[tokio::test]
    async fn test_reverse_order_teardown() {
        let log = ShutdownLog::new();
        let queue = DestroyQueue::new("test", Arc::new(CollectingEventSink::new()));
        for name in ["A", "B", "C"] {
            let ctx = running(RecordingComponent::factory(name, Scope::Module, &log)).await;
            assert!(queue.push(ctx));
        }

        let report = queue.shutdown(Duration::from_secs(1)).await;

        assert!(report.failures.is_empty());
        assert_eq!(report.destroyed, 3);
        assert_eq!(log.destroyed(), vec!["C", "B", "A"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_skips_duplicates_and_non_destroyable() {
        let log = ShutdownLog::new();
        let queue = DestroyQueue::new("test", Arc::new(CollectingEventSink::new()));
        let ctx = running(RecordingComponent::factory("A", Scope::Module, &log)).await;
        let pinned = running(
            RecordingComponent::factory("Pinned", Scope::Module, &log).with_destroyable(false),
        )
        .await;

        assert!(queue.push(Arc::clone(&ctx)));
        assert!(!queue.push(Arc::clone(&ctx)));
        assert!(!queue.push(pinned));
        assert_eq!(queue.names(), vec!["A"]);

        assert!(queue.remove(ctx.id()));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_block_siblings() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let queue = DestroyQueue::new("test", sink.clone());

        queue.push(running(RecordingComponent::factory("A", Scope::Module, &log)).await);
        queue.push(running(FailingComponent::factory("Broken", Scope::Module, FailureMode::DestroyError)).await);
        queue.push(running(FailingComponent::factory("Panicky", Scope::Module, FailureMode::DestroyPanic)).await);
        queue.push(running(RecordingComponent::factory("D", Scope::Module, &log)).await);

        let report = queue.shutdown(Duration::from_secs(1)).await;

        assert_eq!(log.destroyed(), vec!["D", "A"]);
        assert_eq!(report.destroyed, 2);
        let failed: Vec<_> = report.failures.iter().map(|f| f.component.as_str()).collect();
        assert_eq!(failed, vec!["Panicky", "Broken"]);
        assert_eq!(sink.events_of_type(event_types::DESTROY_FAILED).len(), 2);
    }

    #[tokio::test]
    async fn test_slow_destroy_times_out() {
        let log = ShutdownLog::new();
        let queue = DestroyQueue::new("test", Arc::new(CollectingEventSink::new()));
        queue.push(running(RecordingComponent::factory("A", Scope::Module, &log)).await);
        queue.push(running(FailingComponent::factory("Slow", Scope::Module, FailureMode::DestroyHang)).await);

        let report = queue.shutdown(Duration::from_millis(20)).await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("timed out"));
        assert_eq!(log.destroyed(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_listener_queues_created_instances() {
        let log = ShutdownLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let queue = DestroyQueue::new("test", sink.clone());
        let ctx = Arc::new(RecordingComponent::factory("A", Scope::Module, &log))
            .create_context(CorrelationKey::Module);
        ctx.start().unwrap();
        let listener: std::sync::Weak<dyn InstanceListener> =
            Arc::downgrade(&queue) as std::sync::Weak<dyn InstanceListener>;
        ctx.add_listener(listener);

        ctx.instance().await.unwrap();

        assert_eq!(queue.names(), vec!["A"]);
        assert_eq!(sink.events_of_type(event_types::INSTANCE_CREATED).len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_contexts_are_not_counted() {
        let log = ShutdownLog::new();
        let queue = DestroyQueue::new("test", Arc::new(CollectingEventSink::new()));
        let live = running(RecordingComponent::factory("A", Scope::Module, &log)).await;
        let stopped = running(RecordingComponent::factory("B", Scope::Module, &log)).await;
        queue.push(live);
        queue.push(Arc::clone(&stopped));
        stopped.mark_stopped();

        let report = queue.shutdown(Duration::from_secs(1)).await;

        assert_eq!(report.destroyed, 1);
        assert!(report.failures.is_empty());
        assert_eq!(log.destroyed(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_closed_queue_refuses_instances() {
        let log = ShutdownLog::new();
        let queue = DestroyQueue::new("test", Arc::new(CollectingEventSink::new()));
        queue.shutdown(Duration::from_secs(1)).await;
        assert!(queue.is_closed());

        let ctx = Arc::new(RecordingComponent::factory("Late", Scope::Module, &log))
            .create_context(CorrelationKey::Module);
        ctx.start().unwrap();
        let listener: std::sync::Weak<dyn InstanceListener> =
            Arc::downgrade(&queue) as std::sync::Weak<dyn InstanceListener>;
        ctx.add_listener(listener);

        assert!(ctx.instance().await.is_err());
        assert!(queue.is_empty());
        assert_eq!(log.destroyed(), vec!["Late"]);
    }
}
