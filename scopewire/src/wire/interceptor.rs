//! Interceptor trait and the chain cursor.

use crate::core::{Fault, FaultKind, Message};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One step of an invocation chain.
///
/// An interceptor may pass the message on through `next`, transform it on
/// the way in or out, short-circuit with a fault, or hand `next` to
/// another task and return at once.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Returns the interceptor's name.
    fn name(&self) -> &str;

    /// Returns true if the interceptor must run even when the wire could
    /// call its target directly. Interceptors that may be elided return false.
    fn requires_invocation(&self) -> bool {
        true
    }

    /// Handles a message.
    async fn invoke(&self, message: Message, next: Next) -> Message;
}

/// The rest of an invocation chain.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Interceptor>]>,
    position: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Arc<dyn Interceptor>]>) -> Self {
        Self { chain, position: 0 }
    }

    /// A cursor with nothing left to run, for terminal interceptors called directly.
    #[must_use]
    pub fn empty() -> Self {
        let chain: Arc<[Arc<dyn Interceptor>]> = Arc::from(Vec::new());
        Self::new(chain)
    }

    /// Returns the number of interceptors still to run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.position)
    }

    /// Returns true if the chain is exhausted.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Runs the next interceptor.
    ///
    /// Running past the end yields an infrastructure fault: every chain
    /// must end in an interceptor that does not call `next`.
    pub async fn run(self, message: Message) -> Message {
        let Some(interceptor) = self.chain.get(self.position).cloned() else {
            return message.with_fault(Fault::new(
                FaultKind::Infrastructure,
                "invocation chain ended without reaching a target",
            ));
        };
        let next = Self {
            chain: self.chain,
            position: self.position + 1,
        };
        interceptor.invoke(message, next).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.chain[self.position.min(self.chain.len())..]
            .iter()
            .map(|i| i.name())
            .collect();
        f.debug_struct("Next").field("remaining", &names).finish()
    }
}
