//! Messages and faults carried through invocation chains.

use super::Operation;
use crate::errors::{ComponentError, RuntimeError};
use crate::work::WorkContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Metadata key marking a reply produced before the target ran.
pub const DISPATCH_METADATA_KEY: &str = "dispatch";

/// Where in the pipeline a fault originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The business component returned an error.
    Target,
    /// The target could not be resolved to a live context.
    Resolution,
    /// An interceptor short-circuited the call.
    Interceptor,
    /// The worker scheduler refused a non-blocking dispatch.
    Scheduler,
    /// The runtime itself misbehaved (illegal state, lost task).
    Infrastructure,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Resolution => write!(f, "resolution"),
            Self::Interceptor => write!(f, "interceptor"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// A fault payload returned through the chain in place of a reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} fault: {message}")]
pub struct Fault {
    /// Origin of the fault.
    pub kind: FaultKind,
    /// Human readable description.
    pub message: String,
    /// Whether re-running the chain may succeed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl Fault {
    /// Creates a fault of the given kind.
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a target fault.
    #[must_use]
    pub fn target(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Target, message)
    }

    /// Creates an interceptor fault.
    #[must_use]
    pub fn interceptor(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Interceptor, message)
    }

    /// Marks the fault retryable.
    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Converts a component error into a target fault.
    #[must_use]
    pub fn from_component_error(error: &ComponentError) -> Self {
        Self {
            kind: FaultKind::Target,
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    /// Converts a runtime error into a fault of the matching kind.
    #[must_use]
    pub fn from_error(error: &RuntimeError) -> Self {
        match error {
            RuntimeError::Target(e) => Self::from_component_error(e),
            RuntimeError::Resolution(_) => Self::new(FaultKind::Resolution, error.to_string()),
            RuntimeError::Scheduler(_) => Self::new(FaultKind::Scheduler, error.to_string()),
            RuntimeError::Fault(fault) => fault.clone(),
            _ => Self::new(FaultKind::Infrastructure, error.to_string()),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("retryable".to_string(), serde_json::json!(self.retryable));
        map
    }
}

/// A single call travelling through an invocation chain.
///
/// Carries the operation, the argument (later reply) payload or a fault, and
/// the work context of the logical call it belongs to.
#[derive(Debug, Clone)]
pub struct Message {
    operation: Arc<Operation>,
    body: serde_json::Value,
    fault: Option<Fault>,
    message_id: Uuid,
    correlation_id: Option<Uuid>,
    metadata: HashMap<String, serde_json::Value>,
    work_context: WorkContext,
}

impl Message {
    /// Creates a message with a fresh message id.
    #[must_use]
    pub fn new(operation: Arc<Operation>, body: serde_json::Value, work_context: WorkContext) -> Self {
        Self {
            operation,
            body,
            fault: None,
            message_id: Uuid::new_v4(),
            correlation_id: None,
            metadata: HashMap::new(),
            work_context,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Replaces the payload with a reply body and clears any fault.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self.fault = None;
        self
    }

    /// Replaces the payload with a fault.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.body = serde_json::Value::Null;
        self.fault = Some(fault);
        self
    }

    /// Returns the operation.
    #[must_use]
    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    /// Returns the argument or reply payload.
    #[must_use]
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Replaces the payload in place.
    pub fn set_body(&mut self, body: serde_json::Value) {
        self.body = body;
    }

    /// Returns the fault, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Returns true if the message carries a fault.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Returns the message id.
    #[must_use]
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Sets a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Returns the work context.
    #[must_use]
    pub fn work_context(&self) -> &WorkContext {
        &self.work_context
    }

    /// Rebinds the message to another work context.
    pub fn set_work_context(&mut self, work_context: WorkContext) {
        self.work_context = work_context;
    }

    /// Builds the placeholder reply handed back when the rest of the chain
    /// runs elsewhere.
    #[must_use]
    pub fn deferred_reply(&self) -> Self {
        let mut reply = Self {
            operation: self.operation.clone(),
            body: serde_json::Value::Null,
            fault: None,
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            metadata: HashMap::new(),
            work_context: self.work_context.clone(),
        };
        reply.set_metadata(DISPATCH_METADATA_KEY, serde_json::json!("deferred"));
        reply
    }

    /// Returns true if this is a placeholder from a non-blocking hop.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.metadata.get(DISPATCH_METADATA_KEY) == Some(&serde_json::json!("deferred"))
    }

    /// Splits the message into its reply body or fault.
    pub fn into_result(self) -> Result<serde_json::Value, Fault> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResolutionError;

    fn message() -> Message {
        Message::new(
            Arc::new(Operation::new("greet")),
            serde_json::json!({"name": "Ada"}),
            WorkContext::new(),
        )
    }

    #[test]
    fn test_new_message() {
        let msg = message();
        assert_eq!(msg.operation().name(), "greet");
        assert_eq!(msg.body()["name"], "Ada");
        assert!(!msg.is_fault());
        assert!(msg.correlation_id().is_none());
    }

    #[test]
    fn test_fault_replaces_body() {
        let msg = message().with_fault(Fault::target("boom"));
        assert!(msg.is_fault());
        assert!(msg.body().is_null());
        assert_eq!(msg.into_result().unwrap_err().kind, FaultKind::Target);
    }

    #[test]
    fn test_body_clears_fault() {
        let msg = message()
            .with_fault(Fault::target("boom"))
            .with_body(serde_json::json!("ok"));
        assert_eq!(msg.into_result().unwrap(), serde_json::json!("ok"));
    }

    #[test]
    fn test_deferred_reply_keeps_identity() {
        let msg = message().with_correlation_id(Uuid::new_v4());
        let reply = msg.deferred_reply();

        assert!(reply.is_deferred());
        assert!(!msg.is_deferred());
        assert_eq!(reply.message_id(), msg.message_id());
        assert_eq!(reply.correlation_id(), msg.correlation_id());
        assert!(reply.body().is_null());
    }

    #[test]
    fn test_fault_from_error() {
        let err = RuntimeError::from(ResolutionError::not_found("Missing"));
        let fault = Fault::from_error(&err);
        assert_eq!(fault.kind, FaultKind::Resolution);
        assert!(fault.message.contains("Missing"));

        let err = RuntimeError::from(ComponentError::new("flaky").retryable());
        let fault = Fault::from_error(&err);
        assert_eq!(fault.kind, FaultKind::Target);
        assert!(fault.retryable);
    }

    #[test]
    fn test_fault_to_dict() {
        let dict = Fault::interceptor("denied").to_dict();
        assert_eq!(dict.get("kind").unwrap(), "interceptor");
        assert_eq!(dict.get("message").unwrap(), "denied");
    }
}
