//! Scope, lifecycle state and context kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifetime and sharing policy of a component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One instance per module for the lifetime of the container.
    Module,
    /// One instance per logical request.
    Request,
    /// One instance per conversation id.
    Conversation,
    /// One instance per composite, managed like module scope.
    Composite,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Module
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Request => write!(f, "request"),
            Self::Conversation => write!(f, "conversation"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

impl Scope {
    /// Returns true for scopes whose contexts are created eagerly at scope start.
    #[must_use]
    pub fn is_module_like(&self) -> bool {
        matches!(self, Self::Module | Self::Composite)
    }

    /// Returns true for scopes keyed by a correlation unit.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        matches!(self, Self::Request | Self::Conversation)
    }
}

/// Lifecycle state shared by scope containers and component contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created but not started.
    Uninitialized,
    /// Started and serving lookups.
    Running,
    /// Stopped; never restarted.
    Stopped,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The kind of context registered under a name in a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// A component implementation managed by a scope container.
    Atomic,
    /// A nested composite with its own registry.
    Composite,
    /// An outbound reference served by a binding.
    Reference,
    /// A service promoting another context under a new name.
    Service,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::Composite => write!(f, "composite"),
            Self::Reference => write!(f, "reference"),
            Self::Service => write!(f, "service"),
        }
    }
}

impl ContextKind {
    /// Returns true if a wire can terminate at a context of this kind.
    #[must_use]
    pub fn is_invocable(&self) -> bool {
        !matches!(self, Self::Composite)
    }
}
