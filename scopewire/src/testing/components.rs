//! Components for exercising containers and wires.

use super::ShutdownLog;
use crate::component::{Component, ContextFactory};
use crate::core::{Message, Scope};
use crate::errors::ComponentError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A component that logs its lifecycle and echoes calls.
///
/// Replies carry the instance id so callers can tell instances apart.
#[derive(Debug)]
pub struct RecordingComponent {
    name: String,
    instance_id: Uuid,
    log: ShutdownLog,
    calls: AtomicUsize,
}

impl RecordingComponent {
    /// Creates a recording component.
    #[must_use]
    pub fn new(name: impl Into<String>, log: ShutdownLog) -> Self {
        Self {
            name: name.into(),
            instance_id: Uuid::new_v4(),
            log,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns a factory producing recording components.
    #[must_use]
    pub fn factory(name: impl Into<String>, scope: Scope, log: &ShutdownLog) -> ContextFactory {
        let name = name.into();
        let log = log.clone();
        let component_name = name.clone();
        ContextFactory::new(name, scope, move |_| {
            Ok(Arc::new(Self::new(component_name.clone(), log.clone())) as Arc<dyn Component>)
        })
    }

    /// Returns this instance's id.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Returns how many calls this instance handled.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for RecordingComponent {
    async fn invoke(&self, message: &Message) -> Result<serde_json::Value, ComponentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.record_invoked(&self.name, message.operation().name());
        Ok(serde_json::json!({
            "component": self.name,
            "instance": self.instance_id.to_string(),
            "operation": message.operation().name(),
            "body": message.body().clone(),
            "call": call,
        }))
    }

    async fn init(&self) -> Result<(), ComponentError> {
        self.log.record_created(&self.name);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ComponentError> {
        self.log.record_destroyed(&self.name);
        Ok(())
    }
}

/// How a [`FailingComponent`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every call fails.
    InvokeError,
    /// The first `failures` calls fail with a retryable error.
    Transient {
        /// Number of failing calls before success.
        failures: usize,
    },
    /// Initialization fails.
    InitError,
    /// The destroy hook returns an error.
    DestroyError,
    /// The destroy hook panics.
    DestroyPanic,
    /// The destroy hook never completes.
    DestroyHang,
}

/// A component that fails in a configurable way.
#[derive(Debug)]
pub struct FailingComponent {
    name: String,
    mode: FailureMode,
    attempts: AtomicUsize,
}

impl FailingComponent {
    /// Creates a failing component.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: FailureMode) -> Self {
        Self {
            name: name.into(),
            mode,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns a factory producing failing components.
    #[must_use]
    pub fn factory(name: impl Into<String>, scope: Scope, mode: FailureMode) -> ContextFactory {
        let name = name.into();
        let component_name = name.clone();
        ContextFactory::new(name, scope, move |_| {
            Ok(Arc::new(Self::new(component_name.clone(), mode)) as Arc<dyn Component>)
        })
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for FailingComponent {
    async fn invoke(&self, _message: &Message) -> Result<serde_json::Value, ComponentError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mode {
            FailureMode::InvokeError => Err(ComponentError::new(format!("{} failed", self.name))),
            FailureMode::Transient { failures } if attempt <= failures => Err(ComponentError::new(
                format!("{} unavailable (attempt {attempt})", self.name),
            )
            .retryable()),
            _ => Ok(serde_json::json!({"component": self.name, "attempt": attempt})),
        }
    }

    async fn init(&self) -> Result<(), ComponentError> {
        if self.mode == FailureMode::InitError {
            return Err(ComponentError::new(format!("{} refused to initialize", self.name)));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ComponentError> {
        match self.mode {
            FailureMode::DestroyError => {
                Err(ComponentError::new(format!("{} failed to release", self.name)))
            }
            FailureMode::DestroyPanic => panic!("{} panicked during destroy", self.name),
            FailureMode::DestroyHang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
