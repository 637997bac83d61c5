//! Per-operation invocation chains.

use super::{Interceptor, Next};
use crate::core::{Message, Operation};
use std::fmt;
use std::sync::Arc;

/// The immutable, ordered interceptors for one operation.
///
/// The first interceptor runs first on the way in and last on the way out.
/// The last one is the terminal that reaches the target.
#[derive(Clone)]
pub struct InvocationChain {
    operation: Arc<Operation>,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InvocationChain {
    /// Creates a chain for `operation`.
    #[must_use]
    pub fn new(operation: Arc<Operation>, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            operation,
            interceptors: Arc::from(interceptors),
        }
    }

    /// Returns the operation this chain serves.
    #[must_use]
    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    /// Returns the interceptors in execution order.
    #[must_use]
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Returns the interceptor names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.interceptors.iter().map(|i| i.name().to_string()).collect()
    }

    /// Returns the terminal interceptor.
    #[must_use]
    pub fn terminal(&self) -> Option<&Arc<dyn Interceptor>> {
        self.interceptors.last()
    }

    /// Returns true if any non-terminal interceptor must run.
    #[must_use]
    pub fn requires_invocation(&self) -> bool {
        let len = self.interceptors.len();
        self.interceptors[..len.saturating_sub(1)]
            .iter()
            .any(|i| i.requires_invocation())
    }

    /// Returns the number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Walks the chain from head to terminal.
    pub async fn invoke(&self, message: Message) -> Message {
        Next::new(Arc::clone(&self.interceptors)).run(message).await
    }
}

impl fmt::Debug for InvocationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationChain")
            .field("operation", &self.operation.name())
            .field("interceptors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FaultKind;
    use crate::work::WorkContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        elidable: bool,
    }

    #[async_trait]
    impl Interceptor for Trace {
        fn name(&self) -> &str {
            self.name
        }

        fn requires_invocation(&self) -> bool {
            !self.elidable
        }

        async fn invoke(&self, message: Message, next: Next) -> Message {
            self.log.lock().push(format!("in:{}", self.name));
            let reply = next.run(message).await;
            self.log.lock().push(format!("out:{}", self.name));
            reply
        }
    }

    struct Terminal;

    #[async_trait]
    impl Interceptor for Terminal {
        fn name(&self) -> &str {
            "terminal"
        }

        async fn invoke(&self, message: Message, _next: Next) -> Message {
            message.with_body(serde_json::json!("done"))
        }
    }

    fn trace(name: &'static str, log: &Arc<Mutex<Vec<String>>>, elidable: bool) -> Arc<dyn Interceptor> {
        Arc::new(Trace {
            name,
            log: Arc::clone(log),
            elidable,
        })
    }

    #[tokio::test]
    async fn test_nested_middleware_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let operation = Arc::new(Operation::new("op"));
        let chain = InvocationChain::new(
            Arc::clone(&operation),
            vec![trace("outer", &log, false), trace("inner", &log, false), Arc::new(Terminal)],
        );

        let reply = chain
            .invoke(Message::new(operation, serde_json::Value::Null, WorkContext::new()))
            .await;

        assert_eq!(reply.body(), &serde_json::json!("done"));
        assert_eq!(
            *log.lock(),
            vec!["in:outer", "in:inner", "out:inner", "out:outer"]
        );
        assert_eq!(chain.terminal().unwrap().name(), "terminal");
    }

    #[tokio::test]
    async fn test_requires_invocation_ignores_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let operation = Arc::new(Operation::new("op"));

        let elidable = InvocationChain::new(
            Arc::clone(&operation),
            vec![trace("cache", &log, true), Arc::new(Terminal)],
        );
        assert!(!elidable.requires_invocation());

        let required = InvocationChain::new(operation, vec![trace("monitor", &log, false), Arc::new(Terminal)]);
        assert!(required.requires_invocation());
    }

    #[tokio::test]
    async fn test_empty_chain_faults() {
        let operation = Arc::new(Operation::new("op"));
        let chain = InvocationChain::new(Arc::clone(&operation), Vec::new());
        assert!(chain.is_empty());

        let reply = chain
            .invoke(Message::new(operation, serde_json::Value::Null, WorkContext::new()))
            .await;
        assert_eq!(reply.fault().unwrap().kind, FaultKind::Infrastructure);
    }
}
