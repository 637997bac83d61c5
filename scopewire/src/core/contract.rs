//! Service contracts and operations.

use crate::errors::BuilderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Whether the caller waits for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directionality {
    /// The caller receives the target's reply.
    RequestResponse,
    /// The caller receives no reply; dispatch may be non-blocking.
    OneWay,
}

impl Default for Directionality {
    fn default() -> Self {
        Self::RequestResponse
    }
}

/// Position of an operation within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSequence {
    /// The operation takes no part in a conversation.
    NoConversation,
    /// The operation starts or continues a conversation.
    Continue,
    /// The operation ends the conversation once it completes.
    End,
}

impl Default for ConversationSequence {
    fn default() -> Self {
        Self::NoConversation
    }
}

/// Whether a contract's interactions are conversational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionScope {
    /// Every call stands alone.
    NonConversational,
    /// Calls are correlated by a conversation id.
    Conversational,
}

impl Default for InteractionScope {
    fn default() -> Self {
        Self::NonConversational
    }
}

/// A single operation of a service contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    name: String,
    #[serde(default)]
    directionality: Directionality,
    #[serde(default)]
    conversation_sequence: ConversationSequence,
}

impl Operation {
    /// Creates a request/response operation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directionality: Directionality::RequestResponse,
            conversation_sequence: ConversationSequence::NoConversation,
        }
    }

    /// Creates a one-way operation.
    #[must_use]
    pub fn one_way(name: impl Into<String>) -> Self {
        Self::new(name).with_directionality(Directionality::OneWay)
    }

    /// Sets the directionality.
    #[must_use]
    pub fn with_directionality(mut self, directionality: Directionality) -> Self {
        self.directionality = directionality;
        self
    }

    /// Sets the conversation sequence.
    #[must_use]
    pub fn with_conversation_sequence(mut self, sequence: ConversationSequence) -> Self {
        self.conversation_sequence = sequence;
        self
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directionality.
    #[must_use]
    pub fn directionality(&self) -> Directionality {
        self.directionality
    }

    /// Returns the conversation sequence.
    #[must_use]
    pub fn conversation_sequence(&self) -> ConversationSequence {
        self.conversation_sequence
    }

    /// Returns true if the caller does not wait for a reply.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.directionality == Directionality::OneWay
    }

    /// Returns true if completing this operation ends the conversation.
    #[must_use]
    pub fn ends_conversation(&self) -> bool {
        self.conversation_sequence == ConversationSequence::End
    }
}

/// The contract a wire carries between a reference and a service.
#[derive(Debug, Clone, Default)]
pub struct ServiceContract {
    interface: String,
    operations: BTreeMap<String, Arc<Operation>>,
    interaction: InteractionScope,
    max_age: Option<Duration>,
    max_idle_time: Option<Duration>,
}

impl ServiceContract {
    /// Creates an empty non-conversational contract.
    #[must_use]
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Adds an operation, replacing any operation with the same name.
    #[must_use]
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations
            .insert(operation.name().to_string(), Arc::new(operation));
        self
    }

    /// Marks the contract conversational.
    #[must_use]
    pub fn conversational(mut self) -> Self {
        self.interaction = InteractionScope::Conversational;
        self
    }

    /// Sets the maximum conversation age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Sets the maximum conversation idle time.
    #[must_use]
    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = Some(max_idle_time);
        self
    }

    /// Returns the interface name.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Looks up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations.get(name)
    }

    /// Iterates over operations in name order.
    pub fn operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.values()
    }

    /// Returns the interaction scope.
    #[must_use]
    pub fn interaction(&self) -> InteractionScope {
        self.interaction
    }

    /// Returns true if the contract is conversational.
    #[must_use]
    pub fn is_conversational(&self) -> bool {
        self.interaction == InteractionScope::Conversational
    }

    /// Returns the maximum conversation age, if declared.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Returns the maximum conversation idle time, if declared.
    #[must_use]
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time
    }

    /// Checks conversational consistency.
    ///
    /// Conversation limits and end-of-conversation operations are only
    /// meaningful on a conversational contract.
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.is_conversational() {
            return Ok(());
        }
        if self.max_age.is_some() || self.max_idle_time.is_some() {
            return Err(BuilderError::invalid_conversational_contract(
                &self.interface,
                "conversation limits declared on a non-conversational contract",
            ));
        }
        if let Some(op) = self.operations.values().find(|op| op.ends_conversation()) {
            return Err(BuilderError::invalid_conversational_contract(
                &self.interface,
                format!("operation '{}' ends a conversation on a non-conversational contract", op.name()),
            ));
        }
        Ok(())
    }
}
