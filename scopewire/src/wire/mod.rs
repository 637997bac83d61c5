//! Wires and invocation chains.
//!
//! A [`Wire`] connects a source reference to a target service. It holds
//! one immutable [`InvocationChain`] per contract operation, built once by
//! [`WireBuilder`] and shared by all callers of that edge.

mod builder;
mod chain;
mod interceptor;
mod runtime_wire;
mod target;

pub use builder::WireBuilder;
pub use chain::InvocationChain;
pub use interceptor::{Interceptor, Next};
pub use runtime_wire::{BindingType, Wire, WireKey};
pub use target::TargetInvoker;
