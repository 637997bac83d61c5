//! Event emission for runtime observability.
//!
//! Every scope container and the registry hold an explicit
//! `Arc<dyn EventSink>`; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

#[cfg(test)]
pub use sink::MockEventSink;

use std::sync::Arc;

/// Event type names emitted by the runtime.
pub mod event_types {
    /// A scope container entered RUNNING.
    pub const SCOPE_STARTED: &str = "scope.started";
    /// A scope container entered STOPPED.
    pub const SCOPE_STOPPED: &str = "scope.stopped";
    /// A component instance was created.
    pub const INSTANCE_CREATED: &str = "component.instance_created";
    /// A destroy hook failed or timed out.
    pub const DESTROY_FAILED: &str = "component.destroy_failed";
    /// A conversation was ended explicitly.
    pub const CONVERSATION_ENDED: &str = "conversation.ended";
    /// A conversation exceeded its age or idle limit.
    pub const CONVERSATION_EXPIRED: &str = "conversation.expired";
    /// A request unit was discarded.
    pub const REQUEST_ENDED: &str = "request.ended";
    /// A wire dispatched a message.
    pub const WIRE_INVOKED: &str = "wire.invoked";
    /// A wire dispatch returned a fault.
    pub const WIRE_FAULT: &str = "wire.fault";
    /// A detached continuation failed.
    pub const NONBLOCKING_FAILED: &str = "dispatch.nonblocking_failed";
    /// Scheduling a continuation was rejected.
    pub const SCHEDULE_FAILED: &str = "dispatch.schedule_failed";
}

/// Returns the sink used when none is configured.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}

/// Adds an RFC 3339 timestamp to an event payload object.
#[must_use]
pub fn with_timestamp(mut data: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut data {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    data
}
