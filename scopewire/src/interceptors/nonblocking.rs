//! Non-blocking dispatch onto a worker scheduler.

use crate::core::{Fault, FaultKind, Message};
use crate::events::{default_sink, event_types, with_timestamp, EventSink};
use crate::scope::{ScopeContainer, ScopeEvent};
use crate::wire::{Interceptor, Next};
use crate::work::{RequestId, WorkContext, WorkScheduler};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands the rest of the chain to a worker and returns at once.
///
/// The caller's work context keeps its conversational identifier but loses
/// its current message and correlation ids. The continuation runs with a
/// fresh work context seeded only with that conversational identifier and
/// a new request id. Its failures go to the event sink, never to the
/// caller, which receives a deferred placeholder reply.
pub struct NonBlockingBridgingInterceptor {
    scheduler: Arc<dyn WorkScheduler>,
    sink: Arc<dyn EventSink>,
    request_scope: Option<Arc<dyn ScopeContainer>>,
}

impl NonBlockingBridgingInterceptor {
    /// Creates a bridge submitting to `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn WorkScheduler>) -> Self {
        Self {
            scheduler,
            sink: default_sink(),
            request_scope: None,
        }
    }

    /// Sets the sink that receives continuation failures.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Ends each continuation's request on `container` when it finishes.
    #[must_use]
    pub fn with_request_scope(mut self, container: Arc<dyn ScopeContainer>) -> Self {
        self.request_scope = Some(container);
        self
    }
}

#[async_trait]
impl Interceptor for NonBlockingBridgingInterceptor {
    fn name(&self) -> &str {
        "non-blocking"
    }

    async fn invoke(&self, mut message: Message, next: Next) -> Message {
        let caller = message.work_context().clone();
        let conversation = caller.conversation_id();
        caller.set_current_message_id(None);
        caller.set_current_correlation_id(None);
        if let Some(id) = &conversation {
            caller.set_conversation_id(id);
        }
        let reply = message.deferred_reply();

        let request_id = RequestId::new();
        let worker = WorkContext::for_request(request_id);
        if let Some(id) = &conversation {
            worker.set_conversation_id(id);
        }
        message.set_work_context(worker);

        let operation = message.operation().name().to_string();
        let message_id = message.message_id();
        let sink = Arc::clone(&self.sink);
        let request_scope = self.request_scope.clone();
        let continuation_operation = operation.clone();
        let work = async move {
            let outcome = AssertUnwindSafe(next.run(message)).catch_unwind().await;
            let failure = match outcome {
                Ok(reply) => reply.fault().cloned(),
                Err(_) => Some(Fault::new(FaultKind::Infrastructure, "continuation panicked")),
            };
            if let Some(fault) = failure {
                warn!(
                    operation = %continuation_operation,
                    message_id = %message_id,
                    fault = %fault,
                    "Non-blocking continuation failed"
                );
                sink.emit(
                    event_types::NONBLOCKING_FAILED,
                    Some(with_timestamp(serde_json::json!({
                        "operation": continuation_operation,
                        "message_id": message_id.to_string(),
                        "fault": fault.to_dict(),
                    }))),
                )
                .await;
            }
            if let Some(container) = request_scope {
                if let Err(e) = container.on_event(ScopeEvent::RequestEnd(request_id)).await {
                    warn!(error = %e, "Failed to end continuation request");
                }
            }
        }
        .boxed();

        if let Err(e) = self.scheduler.schedule_work(work) {
            warn!(operation = %operation, error = %e, "Non-blocking dispatch rejected");
            self.sink.try_emit(
                event_types::SCHEDULE_FAILED,
                Some(with_timestamp(serde_json::json!({
                    "operation": operation,
                    "message_id": message_id.to_string(),
                    "error": e.to_string(),
                }))),
            );
            return reply.with_fault(Fault::new(FaultKind::Scheduler, e.to_string()));
        }
        debug!(operation = %operation, message_id = %message_id, "Continuation scheduled");
        reply
    }
}

impl std::fmt::Debug for NonBlockingBridgingInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingBridgingInterceptor")
            .field("request_scope", &self.request_scope.as_ref().map(|c| c.name().to_string()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Operation, Scope};
    use crate::errors::SchedulerError;
    use crate::events::CollectingEventSink;
    use crate::scope::RequestScopeContainer;
    use crate::testing::{RecordingComponent, ShutdownLog};
    use crate::wire::{InvocationChain, TargetInvoker};
    use crate::work::{ConversationId, MockWorkScheduler, TokioWorkScheduler, Work, WorkContextSnapshot};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Records the work context it runs under.
    struct Probe {
        seen: mpsc::UnboundedSender<(WorkContextSnapshot, WorkContext)>,
    }

    #[async_trait]
    impl Interceptor for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn invoke(&self, message: Message, _next: Next) -> Message {
            let work = message.work_context().clone();
            let _ = self.seen.send((work.snapshot(), work));
            message.with_body(serde_json::json!("done"))
        }
    }

    struct Faulty {
        panic: bool,
    }

    #[async_trait]
    impl Interceptor for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        async fn invoke(&self, message: Message, _next: Next) -> Message {
            if self.panic {
                panic!("boom");
            }
            message.with_fault(Fault::target("downstream failed"))
        }
    }

    fn capturing_scheduler() -> (MockWorkScheduler, Arc<Mutex<Vec<Work>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let mut scheduler = MockWorkScheduler::new();
        scheduler
            .expect_schedule_work()
            .times(1)
            .returning(move |work| {
                sink.lock().push(work);
                Ok(())
            });
        (scheduler, captured)
    }

    async fn run_captured(captured: &Arc<Mutex<Vec<Work>>>) {
        let work: Vec<Work> = captured.lock().drain(..).collect();
        for w in work {
            w.await;
        }
    }

    fn conversational_message(operation: Operation, conversation: &str) -> Message {
        let work = WorkContext::new();
        work.set_conversation_id(&ConversationId::new(conversation));
        work.set_current_message_id(Some(Uuid::new_v4()));
        work.set_current_correlation_id(Some(Uuid::new_v4()));
        Message::new(Arc::new(operation), serde_json::json!({"n": 1}), work)
    }

    fn chain_with(bridge: NonBlockingBridgingInterceptor, terminal: Arc<dyn Interceptor>) -> InvocationChain {
        InvocationChain::new(
            Arc::new(Operation::one_way("notify")),
            vec![Arc::new(bridge), terminal],
        )
    }

    #[tokio::test]
    async fn test_invoke_resets_caller_and_schedules_continuation() {
        let (scheduler, captured) = capturing_scheduler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler)),
            Arc::new(Probe { seen: tx }),
        );
        let message = conversational_message(Operation::one_way("notify"), "convID");
        let caller = message.work_context().clone();

        let reply = chain.invoke(message).await;

        assert!(reply.is_deferred());
        assert!(!reply.is_fault());
        assert!(rx.try_recv().is_err());
        assert_eq!(caller.conversation_id(), Some(ConversationId::new("convID")));
        assert!(caller.current_message_id().is_none());
        assert!(caller.current_correlation_id().is_none());

        run_captured(&captured).await;
        let (snapshot, worker) = rx.recv().await.unwrap();
        assert_eq!(
            snapshot.identifiers.get(crate::work::CONVERSATIONAL_IDENTIFIER),
            Some(&"convID".to_string())
        );
        assert!(!worker.ptr_eq(&caller));
        assert!(snapshot.request_id.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conversation_survives_hop_to_worker() {
        let scheduler = Arc::new(TokioWorkScheduler::current().unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::clone(&scheduler) as Arc<dyn WorkScheduler>),
            Arc::new(Probe { seen: tx }),
        );

        let message = conversational_message(Operation::one_way("notify"), "conv-42");
        let caller = message.work_context().clone();
        let reply = chain.invoke(message).await;
        assert!(reply.is_deferred());

        let (snapshot, worker) = rx.recv().await.unwrap();
        scheduler.wait_idle().await;

        assert_eq!(worker.conversation_id(), Some(ConversationId::new("conv-42")));
        assert!(snapshot.current_message_id.is_none());
        assert!(snapshot.current_correlation_id.is_none());
        assert!(!worker.ptr_eq(&caller));
        assert_eq!(caller.conversation_id(), Some(ConversationId::new("conv-42")));
    }

    #[tokio::test]
    async fn test_no_conversation_stays_unset() {
        let (scheduler, captured) = capturing_scheduler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler)),
            Arc::new(Probe { seen: tx }),
        );
        let message = Message::new(
            Arc::new(Operation::one_way("notify")),
            serde_json::Value::Null,
            WorkContext::new(),
        );

        chain.invoke(message).await;
        run_captured(&captured).await;

        let (_, worker) = rx.recv().await.unwrap();
        assert!(worker.conversation_id().is_none());
    }

    #[tokio::test]
    async fn test_continuation_fault_is_reported_not_returned() {
        let (scheduler, captured) = capturing_scheduler();
        let sink = Arc::new(CollectingEventSink::new());
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler)).with_event_sink(sink.clone()),
            Arc::new(Faulty { panic: false }),
        );

        let reply = chain.invoke(conversational_message(Operation::one_way("notify"), "c")).await;
        assert!(!reply.is_fault());

        run_captured(&captured).await;
        let failures = sink.events_of_type(event_types::NONBLOCKING_FAILED);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1.as_ref().unwrap()["fault"]["kind"], "target");
    }

    #[tokio::test]
    async fn test_continuation_panic_is_contained() {
        let (scheduler, captured) = capturing_scheduler();
        let sink = Arc::new(CollectingEventSink::new());
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler)).with_event_sink(sink.clone()),
            Arc::new(Faulty { panic: true }),
        );

        let reply = chain.invoke(conversational_message(Operation::one_way("notify"), "c")).await;
        assert!(reply.is_deferred());

        run_captured(&captured).await;
        assert_eq!(sink.events_of_type(event_types::NONBLOCKING_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_rejection_faults_caller() {
        let mut scheduler = MockWorkScheduler::new();
        scheduler
            .expect_schedule_work()
            .returning(|_| Err(SchedulerError::Saturated { max_in_flight: 1 }));
        let sink = Arc::new(CollectingEventSink::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler)).with_event_sink(sink.clone()),
            Arc::new(Probe { seen: tx }),
        );

        let reply = chain.invoke(conversational_message(Operation::one_way("notify"), "c")).await;

        assert_eq!(reply.fault().unwrap().kind, FaultKind::Scheduler);
        assert_eq!(sink.events_of_type(event_types::SCHEDULE_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_continuation_request_is_ended() {
        let log = ShutdownLog::new();
        let container = Arc::new(RequestScopeContainer::new("request"));
        container
            .register_factory(Arc::new(RecordingComponent::factory("Audit", Scope::Request, &log)))
            .await
            .unwrap();
        container.start().unwrap();

        let (scheduler, captured) = capturing_scheduler();
        let target = Arc::new(TargetInvoker::new(
            "Audit",
            Arc::clone(&container) as Arc<dyn ScopeContainer>,
        ));
        let chain = chain_with(
            NonBlockingBridgingInterceptor::new(Arc::new(scheduler))
                .with_request_scope(Arc::clone(&container) as Arc<dyn ScopeContainer>),
            target,
        );

        chain
            .invoke(Message::new(
                Arc::new(Operation::one_way("record")),
                serde_json::Value::Null,
                WorkContext::new(),
            ))
            .await;
        run_captured(&captured).await;

        assert_eq!(log.invoked().len(), 1);
        assert_eq!(log.destroyed(), vec!["Audit"]);
        assert_eq!(container.active_requests(), 0);
    }
}
