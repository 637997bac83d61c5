//! Terminal interceptor dispatching to a local component.

use super::{Interceptor, Next};
use crate::component::ComponentContext;
use crate::core::{Fault, Message, Scope};
use crate::errors::RuntimeError;
use crate::scope::{ScopeContainer, ScopeEvent};
use crate::work::WorkContext;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves the target context from its scope container and calls it.
///
/// The dispatch counts as in flight on the container for as long as the
/// component runs. Completing an operation that ends the conversation
/// tears the conversation down.
pub struct TargetInvoker {
    target: String,
    container: Arc<dyn ScopeContainer>,
}

impl TargetInvoker {
    /// Creates a target invoker for component `target` in `container`.
    #[must_use]
    pub fn new(target: impl Into<String>, container: Arc<dyn ScopeContainer>) -> Self {
        Self {
            target: target.into(),
            container,
        }
    }

    /// Returns the target component name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the container owning the target.
    #[must_use]
    pub fn container(&self) -> &Arc<dyn ScopeContainer> {
        &self.container
    }

    /// Resolves the target context for the given work context.
    pub async fn resolve(&self, work: &WorkContext) -> Result<Arc<ComponentContext>, RuntimeError> {
        self.container.get_context(&self.target, work).await
    }

    async fn dispatch(&self, message: &Message) -> Result<serde_json::Value, RuntimeError> {
        let _in_flight = self.container.begin_dispatch()?;
        let context = self.resolve(message.work_context()).await?;
        let instance = context.instance().await?;
        Ok(instance.invoke(message).await?)
    }

    async fn end_conversation(&self, work: &WorkContext) {
        let Some(conversation) = work.conversation_id() else {
            return;
        };
        debug!(
            component = %self.target,
            conversation = %conversation,
            "Operation ends conversation"
        );
        if let Err(e) = self
            .container
            .on_event(ScopeEvent::ConversationEnd(conversation))
            .await
        {
            warn!(component = %self.target, error = %e, "Failed to end conversation");
        }
    }
}

#[async_trait]
impl Interceptor for TargetInvoker {
    fn name(&self) -> &str {
        "target"
    }

    async fn invoke(&self, message: Message, _next: Next) -> Message {
        let result = self.dispatch(&message).await;
        let ends_conversation = result.is_ok()
            && message.operation().ends_conversation()
            && self.container.scope() == Scope::Conversation;
        let work = message.work_context().clone();

        let reply = match result {
            Ok(body) => message.with_body(body),
            Err(e) => message.with_fault(Fault::from_error(&e)),
        };
        if ends_conversation {
            self.end_conversation(&work).await;
        }
        reply
    }
}

impl fmt::Debug for TargetInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetInvoker")
            .field("target", &self.target)
            .field("container", &self.container.name())
            .finish()
    }
}
