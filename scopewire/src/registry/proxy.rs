//! Caller-facing service proxies.

use super::composite::{CompositeRegistry, RegistryInner};
use crate::component::ComponentContext;
use crate::core::{Message, ServiceContract};
use crate::errors::{ResolutionError, RuntimeError};
use crate::wire::Wire;
use crate::work::{ConversationId, RequestId, WorkContext, CONVERSATIONAL_IDENTIFIER};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A handle on a resolved service, backed by a cached wire.
///
/// Each call sets the work context's current message and correlation ids
/// for its duration. A call made outside any request runs in a transient
/// request that ends when the call returns. Calls on a conversational
/// contract start a conversation if none is active, and an operation that
/// ends the conversation clears it from the work context.
#[derive(Clone)]
pub struct ServiceProxy {
    wire: Arc<Wire>,
    registry: Weak<RegistryInner>,
}

impl ServiceProxy {
    pub(crate) fn new(wire: Arc<Wire>, registry: Weak<RegistryInner>) -> Self {
        Self { wire, registry }
    }

    /// Returns the backing wire.
    #[must_use]
    pub fn wire(&self) -> &Arc<Wire> {
        &self.wire
    }

    /// Returns the service contract.
    #[must_use]
    pub fn contract(&self) -> &Arc<ServiceContract> {
        self.wire.contract()
    }

    /// Returns the target context directly when the wire allows it.
    pub async fn target_service(&self, work: &WorkContext) -> Result<Arc<ComponentContext>, RuntimeError> {
        self.wire.target_service(work).await
    }

    /// Calls `operation` with `body` on behalf of `work`.
    pub async fn invoke(
        &self,
        operation: &str,
        body: serde_json::Value,
        work: &WorkContext,
    ) -> Result<serde_json::Value, RuntimeError> {
        let contract = self.wire.contract();
        let operation = contract
            .operation(operation)
            .cloned()
            .ok_or_else(|| ResolutionError::unknown_operation(contract.interface(), operation))?;

        let transient = if work.request_id().is_none() {
            let request_id = RequestId::new();
            work.set_request_id(Some(request_id));
            Some(request_id)
        } else {
            None
        };
        if contract.is_conversational() && work.conversation_id().is_none() {
            let conversation = ConversationId::generate();
            debug!(wire = %self.wire.key(), conversation = %conversation, "Conversation started");
            work.set_conversation_id(&conversation);
        }

        let previous_message = work.current_message_id();
        let previous_correlation = work.current_correlation_id();
        let mut message = Message::new(Arc::clone(&operation), body, work.clone());
        if let Some(parent) = previous_message {
            message = message.with_correlation_id(parent);
        }
        work.set_current_message_id(Some(message.message_id()));
        work.set_current_correlation_id(message.correlation_id());

        let reply = self.wire.invoke(message).await;

        work.set_current_message_id(previous_message);
        work.set_current_correlation_id(previous_correlation);
        if let Some(request_id) = transient {
            if let Some(inner) = self.registry.upgrade() {
                CompositeRegistry::from_inner(inner).end_request(request_id).await;
            }
            work.set_request_id(None);
        }

        let body = reply.into_result()?;
        if contract.is_conversational() && operation.ends_conversation() {
            work.clear_identifier(CONVERSATIONAL_IDENTIFIER);
        }
        Ok(body)
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("wire", &self.wire.key())
            .finish_non_exhaustive()
    }
}
