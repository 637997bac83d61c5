//! Per-call work state and worker scheduling.
//!
//! This module provides:
//! - Request and conversation identities used as correlation keys
//! - The work context carried by every message
//! - The worker scheduler non-blocking hops submit continuations to

mod context;
mod identity;
mod scheduler;

pub use context::{WorkContext, WorkContextSnapshot, CONVERSATIONAL_IDENTIFIER};
pub use identity::{ConversationId, CorrelationKey, RequestId};
pub use scheduler::{TokioWorkScheduler, Work, WorkScheduler};

#[cfg(test)]
pub use scheduler::MockWorkScheduler;
