//! # Scopewire
//!
//! The scope container and wire/interceptor invocation core of a component
//! runtime.
//!
//! Scopewire provides:
//!
//! - **Scope containers**: decide when a component instance is created and
//!   destroyed relative to module, request and conversation boundaries
//! - **Wires**: typed, cached connections from a reference to a target service,
//!   each holding one invocation chain per operation
//! - **Interceptor chains**: ordered middleware between a wire's two ends,
//!   including non-blocking hops onto a worker scheduler
//! - **Work contexts**: per-call correlation state that survives those hops
//! - **Composite registry**: resolves component names to live services
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scopewire::prelude::*;
//!
//! let registry = CompositeRegistry::builder("app").build()?;
//! registry.register_component(ComponentDefinition::new(
//!     "Greeter",
//!     Scope::Request,
//!     contract,
//!     |_refs| Ok(Arc::new(GreeterImpl::default()) as Arc<dyn Component>),
//! )).await?;
//! registry.start().await?;
//!
//! let greeter = registry.get_service("client", "Greeter")?;
//! let reply = greeter.invoke("greet", json!({"name": "Ada"}), &WorkContext::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod component;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod interceptors;
pub mod observability;
pub mod registry;
pub mod scope;
pub mod testing;
pub mod wire;
pub mod work;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::component::{Component, ComponentContext, ContextFactory};
    pub use crate::config::{ConversationConfig, RuntimeConfig, SchedulerConfig};
    pub use crate::core::{
        ContextKind, ConversationSequence, Directionality, Fault, FaultKind,
        InteractionScope, LifecycleState, Message, Operation, Scope, ServiceContract,
    };
    pub use crate::errors::{
        BuilderError, ComponentError, IllegalStateError, ResolutionError, RuntimeError,
        SchedulerError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::interceptors::{
        MonitorInterceptor, NonBlockingBridgingInterceptor, RetryInterceptor,
    };
    pub use crate::registry::{
        ComponentDefinition, CompositeRegistry, References, RegisteredContext, ServiceProxy,
        ServiceReference,
    };
    pub use crate::scope::{
        ConversationalScopeContainer, ModuleScopeContainer, RequestScopeContainer,
        ScopeContainer, ScopeEvent,
    };
    pub use crate::wire::{BindingType, Interceptor, InvocationChain, Next, Wire, WireBuilder};
    pub use crate::work::{
        ConversationId, CorrelationKey, RequestId, TokioWorkScheduler, WorkContext,
        WorkScheduler,
    };
    pub use std::sync::Arc;
}
