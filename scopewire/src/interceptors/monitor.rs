//! Monitoring interceptor.

use crate::core::Message;
use crate::wire::{Interceptor, Next};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Counts calls and faults passing through a chain.
///
/// A monitor must see every call, so a wire carrying one is never
/// optimized into a direct dispatch.
pub struct MonitorInterceptor {
    name: String,
    invocations: AtomicUsize,
    faults: AtomicUsize,
    total_micros: AtomicU64,
}

impl MonitorInterceptor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocations: AtomicUsize::new(0),
            faults: AtomicUsize::new(0),
            total_micros: AtomicU64::new(0),
        }
    }

    /// Returns the number of calls seen.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Returns the number of replies that carried a fault.
    #[must_use]
    pub fn fault_count(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Returns the mean time spent downstream, in microseconds.
    #[must_use]
    pub fn mean_latency_micros(&self) -> u64 {
        let calls = self.invocation_count() as u64;
        if calls == 0 {
            return 0;
        }
        self.total_micros.load(Ordering::SeqCst) / calls
    }
}

impl Default for MonitorInterceptor {
    fn default() -> Self {
        Self::new("monitor")
    }
}

#[async_trait]
impl Interceptor for MonitorInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, message: Message, next: Next) -> Message {
        let operation = message.operation().name().to_string();
        let started = Instant::now();
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let reply = next.run(message).await;

        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(elapsed, Ordering::SeqCst);
        if let Some(fault) = reply.fault() {
            self.faults.fetch_add(1, Ordering::SeqCst);
            warn!(
                monitor = %self.name,
                operation = %operation,
                fault = %fault,
                "Call returned a fault"
            );
        } else {
            debug!(
                monitor = %self.name,
                operation = %operation,
                elapsed_us = elapsed,
                "Call completed"
            );
        }
        reply
    }
}

impl std::fmt::Debug for MonitorInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorInterceptor")
            .field("name", &self.name)
            .field("invocations", &self.invocation_count())
            .field("faults", &self.fault_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fault, Operation};
    use crate::wire::InvocationChain;
    use crate::work::WorkContext;
    use std::sync::Arc;

    struct Reply {
        fault: bool,
    }

    #[async_trait]
    impl Interceptor for Reply {
        fn name(&self) -> &str {
            "reply"
        }

        async fn invoke(&self, message: Message, _next: Next) -> Message {
            if self.fault {
                message.with_fault(Fault::target("nope"))
            } else {
                message.with_body(serde_json::json!("ok"))
            }
        }
    }

    fn message() -> Message {
        Message::new(
            Arc::new(Operation::new("ping")),
            serde_json::Value::Null,
            WorkContext::new(),
        )
    }

    #[test]
    fn test_monitor_requires_invocation() {
        assert!(MonitorInterceptor::default().requires_invocation());
    }

    #[tokio::test]
    async fn test_counts_calls_and_faults() {
        let monitor = Arc::new(MonitorInterceptor::new("audit"));
        let ok = InvocationChain::new(
            Arc::new(Operation::new("ping")),
            vec![monitor.clone(), Arc::new(Reply { fault: false })],
        );
        let failing = InvocationChain::new(
            Arc::new(Operation::new("ping")),
            vec![monitor.clone(), Arc::new(Reply { fault: true })],
        );

        ok.invoke(message()).await;
        ok.invoke(message()).await;
        let reply = failing.invoke(message()).await;

        assert!(reply.is_fault());
        assert_eq!(monitor.invocation_count(), 3);
        assert_eq!(monitor.fault_count(), 1);
    }
}
