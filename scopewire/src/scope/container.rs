//! State shared by every scope container.

use crate::component::ContextFactory;
use crate::core::{LifecycleState, Scope};
use crate::errors::{BuilderError, IllegalStateError, ResolutionError, RuntimeError};
use crate::events::{default_sink, event_types, with_timestamp, EventSink};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts one dispatch against a container until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct FactoryTable {
    order: Vec<String>,
    by_name: HashMap<String, Arc<ContextFactory>>,
}

/// Lifecycle, factory registry and event plumbing common to all containers.
pub(crate) struct ContainerCore {
    name: String,
    scope: Scope,
    state: Mutex<LifecycleState>,
    factories: RwLock<FactoryTable>,
    sink: Arc<dyn EventSink>,
    teardown_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl ContainerCore {
    pub(crate) fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            state: Mutex::new(LifecycleState::Uninitialized),
            factories: RwLock::new(FactoryTable::default()),
            sink: default_sink(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn set_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink;
    }

    pub(crate) fn set_teardown_timeout(&mut self, timeout: Duration) {
        self.teardown_timeout = timeout;
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub(crate) fn teardown_timeout(&self) -> Duration {
        self.teardown_timeout
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Counts a dispatch. Refused unless RUNNING; shares the state lock
    /// with [`begin_stop`](Self::begin_stop).
    pub(crate) fn begin_dispatch(&self) -> Result<InFlightGuard, IllegalStateError> {
        let state = self.state.lock();
        if *state != LifecycleState::Running {
            return Err(IllegalStateError::wrong_state(
                &self.name,
                "dispatch",
                LifecycleState::Running,
                *state,
            ));
        }
        Ok(InFlightGuard::new(Arc::clone(&self.in_flight)))
    }

    pub(crate) fn ensure_running(&self, operation: &str) -> Result<(), IllegalStateError> {
        let state = self.state();
        if state == LifecycleState::Running {
            Ok(())
        } else {
            Err(IllegalStateError::wrong_state(
                &self.name,
                operation,
                LifecycleState::Running,
                state,
            ))
        }
    }

    /// The error for `operation` attempted after the container left RUNNING.
    pub(crate) fn not_running(&self, operation: &str) -> IllegalStateError {
        IllegalStateError::wrong_state(&self.name, operation, LifecycleState::Running, self.state())
    }

    /// Adds a factory. Registration is closed once the container stops.
    pub(crate) fn register(&self, factory: Arc<ContextFactory>) -> Result<(), RuntimeError> {
        let state = self.state();
        if state == LifecycleState::Stopped {
            return Err(IllegalStateError::wrong_state(
                &self.name,
                "register factory",
                LifecycleState::Running,
                state,
            )
            .into());
        }

        let mut table = self.factories.write();
        if table.by_name.contains_key(factory.name()) {
            return Err(BuilderError::duplicate(factory.name()).into());
        }
        debug!(container = %self.name, component = %factory.name(), "Factory registered");
        table.order.push(factory.name().to_string());
        table.by_name.insert(factory.name().to_string(), factory);
        Ok(())
    }

    pub(crate) fn factory(&self, name: &str) -> Result<Arc<ContextFactory>, ResolutionError> {
        self.factories
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ResolutionError::not_found(name))
    }

    /// Returns the factories in registration order.
    pub(crate) fn factories(&self) -> Vec<Arc<ContextFactory>> {
        let table = self.factories.read();
        table
            .order
            .iter()
            .filter_map(|name| table.by_name.get(name).cloned())
            .collect()
    }

    pub(crate) fn start(&self) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Uninitialized {
                return Err(IllegalStateError::wrong_state(
                    &self.name,
                    "start",
                    LifecycleState::Uninitialized,
                    *state,
                )
                .into());
            }
            *state = LifecycleState::Running;
        }
        debug!(container = %self.name, scope = %self.scope, "Scope container started");
        self.emit(event_types::SCOPE_STARTED, serde_json::json!({}));
        Ok(())
    }

    /// Moves RUNNING to STOPPED, refusing while dispatches are in flight.
    pub(crate) fn begin_stop(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if *state != LifecycleState::Running {
            return Err(IllegalStateError::wrong_state(
                &self.name,
                "stop",
                LifecycleState::Running,
                *state,
            )
            .into());
        }
        let in_flight = self.in_flight();
        if in_flight > 0 {
            return Err(IllegalStateError::Busy {
                target: self.name.clone(),
                in_flight,
            }
            .into());
        }
        *state = LifecycleState::Stopped;
        Ok(())
    }

    pub(crate) fn finish_stop(&self, destroyed: usize, failed: usize) {
        info!(
            container = %self.name,
            scope = %self.scope,
            destroyed,
            failed,
            "Scope container stopped"
        );
        self.emit(
            event_types::SCOPE_STOPPED,
            serde_json::json!({"destroyed": destroyed, "failed": failed}),
        );
    }

    /// Emits an event tagged with this container's name and scope.
    pub(crate) fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let serde_json::Value::Object(map) = &mut data {
            map.insert("container".to_string(), serde_json::json!(self.name));
            map.insert("scope".to_string(), serde_json::json!(self.scope));
        }
        self.sink.try_emit(event_type, Some(with_timestamp(data)));
    }
}

impl std::fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerCore")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("state", &self.state())
            .field("factories", &self.factories.read().order)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
