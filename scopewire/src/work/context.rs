//! Work context: per-call correlation state.
//!
//! A work context belongs to one logical call, not to a thread. It travels
//! inside every [`Message`](crate::core::Message), and any hop that moves a
//! call onto another execution unit must snapshot and reseed it explicitly.

use super::{ConversationId, CorrelationKey, RequestId};
use crate::core::Scope;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier key under which the conversation id is stored.
pub const CONVERSATIONAL_IDENTIFIER: &str = "scopewire.conversation";

/// A point-in-time copy of a work context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkContextSnapshot {
    /// Id of the message currently being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_message_id: Option<Uuid>,

    /// Correlation id of the message currently being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_correlation_id: Option<Uuid>,

    /// The request this call belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,

    /// Named identifiers, including the conversational identifier.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub identifiers: HashMap<String, String>,
}

/// Shared handle to the work state of one logical call.
///
/// Clones share state; use [`WorkContext::from_snapshot`] to seed an
/// independent context.
#[derive(Clone, Default)]
pub struct WorkContext {
    state: Arc<RwLock<WorkContextSnapshot>>,
}

impl WorkContext {
    /// Creates an empty work context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a work context bound to a request.
    #[must_use]
    pub fn for_request(request_id: RequestId) -> Self {
        let ctx = Self::new();
        ctx.set_request_id(Some(request_id));
        ctx
    }

    /// Creates an independent work context seeded from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: WorkContextSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> WorkContextSnapshot {
        self.state.read().clone()
    }

    /// Returns the current message id.
    #[must_use]
    pub fn current_message_id(&self) -> Option<Uuid> {
        self.state.read().current_message_id
    }

    /// Sets or clears the current message id.
    pub fn set_current_message_id(&self, id: Option<Uuid>) {
        self.state.write().current_message_id = id;
    }

    /// Returns the current correlation id.
    #[must_use]
    pub fn current_correlation_id(&self) -> Option<Uuid> {
        self.state.read().current_correlation_id
    }

    /// Sets or clears the current correlation id.
    pub fn set_current_correlation_id(&self, id: Option<Uuid>) {
        self.state.write().current_correlation_id = id;
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.state.read().request_id
    }

    /// Sets or clears the request id.
    pub fn set_request_id(&self, id: Option<RequestId>) {
        self.state.write().request_id = id;
    }

    /// Returns a named identifier.
    #[must_use]
    pub fn identifier(&self, key: &str) -> Option<String> {
        self.state.read().identifiers.get(key).cloned()
    }

    /// Sets a named identifier.
    pub fn set_identifier(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().identifiers.insert(key.into(), value.into());
    }

    /// Removes a named identifier, returning its value.
    pub fn clear_identifier(&self, key: &str) -> Option<String> {
        self.state.write().identifiers.remove(key)
    }

    /// Returns the conversational identifier.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.identifier(CONVERSATIONAL_IDENTIFIER).map(ConversationId::new)
    }

    /// Sets the conversational identifier.
    pub fn set_conversation_id(&self, id: &ConversationId) {
        self.set_identifier(CONVERSATIONAL_IDENTIFIER, id.as_str());
    }

    /// Returns the correlation key this call uses for the given scope.
    ///
    /// Module-like scopes always resolve; request and conversation scopes
    /// need the matching id to be present.
    #[must_use]
    pub fn correlation_key(&self, scope: Scope) -> Option<CorrelationKey> {
        match scope {
            Scope::Module | Scope::Composite => Some(CorrelationKey::Module),
            Scope::Request => self.request_id().map(CorrelationKey::Request),
            Scope::Conversation => self.conversation_id().map(CorrelationKey::Conversation),
        }
    }

    /// Returns true if both handles share the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("WorkContext")
            .field("current_message_id", &state.current_message_id)
            .field("current_correlation_id", &state.current_correlation_id)
            .field("request_id", &state.request_id)
            .field("identifiers", &state.identifiers)
            .finish()
    }
}
