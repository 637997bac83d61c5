//! Components and the contexts that own them.
//!
//! A [`ContextFactory`] is the immutable template for one component kind.
//! A [`ComponentContext`] is the live wrapper around at most one instance
//! created from that template.

mod context;
mod factory;

pub use context::{ComponentContext, InstanceListener};
pub use factory::{ContextFactory, CreationStrategy};

use crate::core::Message;
use crate::errors::ComponentError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Business logic hosted by the runtime.
#[async_trait]
pub trait Component: Send + Sync {
    /// Handles one operation call and returns the reply body.
    async fn invoke(&self, message: &Message) -> Result<serde_json::Value, ComponentError>;

    /// Called once after the instance is created.
    async fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called once when the owning context is torn down.
    async fn destroy(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// A component backed by a closure.
pub struct FnComponent<F>
where
    F: Fn(&Message) -> Result<serde_json::Value, ComponentError> + Send + Sync,
{
    func: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&Message) -> Result<serde_json::Value, ComponentError> + Send + Sync,
{
    /// Creates a closure-backed component.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnComponent<F>
where
    F: Fn(&Message) -> Result<serde_json::Value, ComponentError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnComponent").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Component for FnComponent<F>
where
    F: Fn(&Message) -> Result<serde_json::Value, ComponentError> + Send + Sync,
{
    async fn invoke(&self, message: &Message) -> Result<serde_json::Value, ComponentError> {
        (self.func)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use crate::work::WorkContext;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fn_component() {
        let component = FnComponent::new(|msg: &Message| {
            Ok(serde_json::json!({"echo": msg.body().clone()}))
        });
        let message = Message::new(
            Arc::new(Operation::new("echo")),
            serde_json::json!("hi"),
            WorkContext::new(),
        );

        let reply = component.invoke(&message).await.unwrap();
        assert_eq!(reply, serde_json::json!({"echo": "hi"}));
        assert!(component.init().await.is_ok());
        assert!(component.destroy().await.is_ok());
    }
}
