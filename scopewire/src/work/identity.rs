//! Correlation identities.

use crate::core::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Explicit handle for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical session token that survives across non-blocking hops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps an existing conversation id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random conversation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The value distinguishing instances within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Module-like scopes have a single instance per name.
    Module,
    /// One instance per request.
    Request(RequestId),
    /// One instance per conversation.
    Conversation(ConversationId),
}

impl CorrelationKey {
    /// Returns true if this key can address contexts of the given scope.
    #[must_use]
    pub fn matches_scope(&self, scope: Scope) -> bool {
        match self {
            Self::Module => scope.is_module_like(),
            Self::Request(_) => scope == Scope::Request,
            Self::Conversation(_) => scope == Scope::Conversation,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Request(id) => write!(f, "request:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}
