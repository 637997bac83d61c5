//! Runtime wires.

use super::{InvocationChain, Next, TargetInvoker};
use crate::component::ComponentContext;
use crate::core::{Fault, Message, ServiceContract};
use crate::errors::{ResolutionError, RuntimeError};
use crate::events::{event_types, EventSink};
use crate::wire::Interceptor;
use crate::work::WorkContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a wire reaches its target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingType {
    /// In-process call to a component in a scope container.
    #[default]
    Local,
    /// A binding collaborator supplies the terminal leg.
    Named(String),
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Identity of a wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireKey {
    /// The source (reference) URI.
    pub source: String,
    /// The target (service) URI.
    pub target: String,
    /// The binding used to reach the target.
    pub binding: BindingType,
}

impl WireKey {
    /// Creates a wire key.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>, binding: BindingType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            binding,
        }
    }
}

impl fmt::Display for WireKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.source, self.target, self.binding)
    }
}

/// A typed connection from a reference to a target service.
///
/// Built once by [`WireBuilder`](super::WireBuilder) and shared by every
/// caller of the same edge.
pub struct Wire {
    key: WireKey,
    contract: Arc<ServiceContract>,
    chains: HashMap<String, Arc<InvocationChain>>,
    target: Option<Arc<TargetInvoker>>,
    optimizable: bool,
    sink: Arc<dyn EventSink>,
}

impl Wire {
    pub(crate) fn new(
        key: WireKey,
        contract: Arc<ServiceContract>,
        chains: HashMap<String, Arc<InvocationChain>>,
        target: Option<Arc<TargetInvoker>>,
        optimizable: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            key,
            contract,
            chains,
            target,
            optimizable,
            sink,
        }
    }

    /// Returns the wire identity.
    #[must_use]
    pub fn key(&self) -> &WireKey {
        &self.key
    }

    /// Returns the source URI.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.key.source
    }

    /// Returns the target URI.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.key.target
    }

    /// Returns the binding type.
    #[must_use]
    pub fn binding(&self) -> &BindingType {
        &self.key.binding
    }

    /// Returns the service contract.
    #[must_use]
    pub fn contract(&self) -> &Arc<ServiceContract> {
        &self.contract
    }

    /// Returns true if calls may skip the chain and go straight to the target.
    #[must_use]
    pub fn is_optimizable(&self) -> bool {
        self.optimizable
    }

    /// Returns the cached chain for an operation.
    pub fn invocation_chain(&self, operation: &str) -> Result<&Arc<InvocationChain>, ResolutionError> {
        self.chains
            .get(operation)
            .ok_or_else(|| ResolutionError::unknown_operation(self.contract.interface(), operation))
    }

    /// Returns every cached chain keyed by operation name.
    #[must_use]
    pub fn invocation_chains(&self) -> &HashMap<String, Arc<InvocationChain>> {
        &self.chains
    }

    /// Returns the target context without a proxy.
    ///
    /// Only optimizable local wires expose their target.
    pub async fn target_service(&self, work: &WorkContext) -> Result<Arc<ComponentContext>, RuntimeError> {
        match (&self.target, self.optimizable) {
            (Some(target), true) => target.resolve(work).await,
            _ => Err(ResolutionError::NotOptimizable {
                wire: self.key.to_string(),
            }
            .into()),
        }
    }

    /// Sends a message through the wire.
    pub async fn invoke(&self, message: Message) -> Message {
        let operation = message.operation().name().to_string();
        let chain = match self.invocation_chain(&operation) {
            Ok(chain) => Arc::clone(chain),
            Err(e) => return message.with_fault(Fault::from_error(&RuntimeError::from(e))),
        };

        debug!(wire = %self.key, operation = %operation, "Wire invoked");
        self.sink.try_emit(
            event_types::WIRE_INVOKED,
            Some(serde_json::json!({
                "wire": self.key.to_string(),
                "operation": operation,
                "optimized": self.optimizable,
            })),
        );

        let reply = match (&self.target, self.optimizable) {
            (Some(target), true) => target.invoke(message, Next::empty()).await,
            _ => chain.invoke(message).await,
        };

        if let Some(fault) = reply.fault() {
            self.sink.try_emit(
                event_types::WIRE_FAULT,
                Some(serde_json::json!({
                    "wire": self.key.to_string(),
                    "operation": operation,
                    "fault": fault.to_dict(),
                })),
            );
        }
        reply
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wire")
            .field("key", &self.key)
            .field("interface", &self.contract.interface())
            .field("operations", &self.chains.keys().collect::<Vec<_>>())
            .field("optimizable", &self.optimizable)
            .finish()
    }
}
