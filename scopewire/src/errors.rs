//! Error types for the scopewire runtime.
//!
//! The taxonomy follows the call boundary each error is reported at:
//! builder errors at registration, lifecycle errors on illegal transitions,
//! resolution errors when a name cannot be turned into a live context, and
//! component errors from business code (which travel as faults inside the
//! chain and only become errors at the outer proxy).

use crate::core::{ContextKind, Fault, LifecycleState, Scope};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for scopewire operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A configuration or wiring error raised at registration time.
    #[error("{0}")]
    Builder(#[from] BuilderError),

    /// A start/stop call outside the legal transitions.
    #[error("{0}")]
    IllegalState(#[from] IllegalStateError),

    /// A name could not be resolved to a live context.
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// A business component failed.
    #[error("Target error: {0}")]
    Target(#[from] ComponentError),

    /// The worker scheduler refused work.
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A fault returned by the invocation chain.
    #[error("Invocation fault: {0}")]
    Fault(#[from] Fault),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Returns a short type tag for event payloads.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Builder(_) => "BuilderError",
            Self::IllegalState(_) => "IllegalStateError",
            Self::Resolution(_) => "ResolutionError",
            Self::Target(_) => "TargetError",
            Self::Scheduler(_) => "SchedulerError",
            Self::Config(_) => "ConfigError",
            Self::Fault(_) => "Fault",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.type_name()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::Fault(fault) = self {
            map.insert("fault".to_string(), serde_json::json!(fault.to_dict()));
        }
        map
    }
}

/// Errors raised while building factories, contracts and wires.
#[derive(Debug, Clone, Error)]
pub enum BuilderError {
    /// A context with this name is already registered.
    #[error("Duplicate component name: {name}")]
    DuplicateName {
        /// The duplicate name.
        name: String,
    },

    /// The name does not match the allowed pattern.
    #[error("Invalid component name: '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A contract mixes conversational and non-conversational declarations.
    #[error("Invalid conversational contract '{interface}': {reason}")]
    InvalidConversationalContract {
        /// The contract interface.
        interface: String,
        /// What is inconsistent.
        reason: String,
    },

    /// A wire was built without a terminal interceptor.
    #[error("Wire {source_uri} -> {target_uri} has no target")]
    MissingTarget {
        /// The wire source.
        source_uri: String,
        /// The wire target.
        target_uri: String,
    },
}

impl BuilderError {
    /// Creates a duplicate name error.
    #[must_use]
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Creates an invalid name error.
    #[must_use]
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Creates an invalid conversational contract error.
    #[must_use]
    pub fn invalid_conversational_contract(
        interface: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConversationalContract {
            interface: interface.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by illegal lifecycle transitions.
#[derive(Debug, Clone, Error)]
pub enum IllegalStateError {
    /// The operation is not legal in the current state.
    #[error("{target} cannot {operation} while {actual} (expected {expected})")]
    WrongState {
        /// The container or context name.
        target: String,
        /// The attempted operation.
        operation: String,
        /// The state the operation requires.
        expected: LifecycleState,
        /// The state actually observed.
        actual: LifecycleState,
    },

    /// Stop was called while dispatches were still in flight.
    #[error("{target} cannot stop with {in_flight} dispatch(es) in flight")]
    Busy {
        /// The container name.
        target: String,
        /// Number of active dispatches.
        in_flight: usize,
    },
}

impl IllegalStateError {
    /// Creates a wrong state error.
    #[must_use]
    pub fn wrong_state(
        target: impl Into<String>,
        operation: impl Into<String>,
        expected: LifecycleState,
        actual: LifecycleState,
    ) -> Self {
        Self::WrongState {
            target: target.into(),
            operation: operation.into(),
            expected,
            actual,
        }
    }
}

/// Errors raised while resolving a target.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// No context is registered under this name.
    #[error("Target not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// The named context cannot terminate a wire.
    #[error("Target '{name}' is a {kind} context and cannot be invoked")]
    NotInvocable {
        /// The requested name.
        name: String,
        /// The context kind found.
        kind: ContextKind,
    },

    /// The work context carries no key for the target's scope.
    #[error("No {scope} correlation key available to resolve '{name}'")]
    MissingCorrelationKey {
        /// The requested name.
        name: String,
        /// The target scope.
        scope: Scope,
    },

    /// The conversation outlived its age or idle limit.
    #[error("Conversation expired: {conversation}")]
    ConversationExpired {
        /// The conversation id.
        conversation: String,
    },

    /// The contract has no such operation.
    #[error("Operation '{operation}' not found on '{interface}'")]
    UnknownOperation {
        /// The contract interface.
        interface: String,
        /// The requested operation.
        operation: String,
    },

    /// The wire must be invoked through its chain.
    #[error("Wire {wire} is not optimizable")]
    NotOptimizable {
        /// The wire description.
        wire: String,
    },

    /// Service promotion loops back on itself.
    #[error("Promotion cycle while resolving '{name}'")]
    PromotionCycle {
        /// The requested name.
        name: String,
    },

    /// The registry a reference belongs to has been dropped.
    #[error("Registry for reference '{reference}' is no longer available")]
    RegistryDropped {
        /// The reference name.
        reference: String,
    },
}

impl ResolutionError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an unknown operation error.
    #[must_use]
    pub fn unknown_operation(interface: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnknownOperation {
            interface: interface.into(),
            operation: operation.into(),
        }
    }
}

/// Errors returned by business components.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component reported a failure.
    #[error("{message}")]
    Failed {
        /// The failure description.
        message: String,
        /// Whether a retry may succeed.
        retryable: bool,
    },

    /// Any other error surfaced by component code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ComponentError {
    /// Creates a non-retryable failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Marks the failure retryable.
    #[must_use]
    pub fn retryable(self) -> Self {
        match self {
            Self::Failed { message, .. } => Self::Failed {
                message,
                retryable: true,
            },
            other => other,
        }
    }

    /// Returns true if a retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { retryable: true, .. })
    }
}

/// Errors raised by the worker scheduler.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The scheduler is at its in-flight limit.
    #[error("Work scheduler saturated ({max_in_flight} tasks in flight)")]
    Saturated {
        /// The configured limit.
        max_in_flight: usize,
    },

    /// No async runtime is available to run work on.
    #[error("No async runtime available for scheduled work")]
    NoRuntime,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
