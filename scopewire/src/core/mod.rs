//! Core domain model types for scopewire.
//!
//! This module contains the value types shared by every other module:
//! - Scope, lifecycle state and context kind enums
//! - Service contracts and their operations
//! - The message and fault types carried through invocation chains

mod contract;
mod message;
mod status;

pub use contract::{
    ConversationSequence, Directionality, InteractionScope, Operation, ServiceContract,
};
pub use message::{Fault, FaultKind, Message};
pub use status::{ContextKind, LifecycleState, Scope};
