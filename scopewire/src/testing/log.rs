//! Lifecycle log shared between test components.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct LogInner {
    created: Vec<String>,
    invoked: Vec<(String, String)>,
    destroyed: Vec<String>,
}

/// Records component lifecycle calls in the order they happen.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct ShutdownLog {
    inner: Arc<Mutex<LogInner>>,
}

impl ShutdownLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an instance creation.
    pub fn record_created(&self, name: &str) {
        self.inner.lock().created.push(name.to_string());
    }

    /// Records an invocation of `operation` on `name`.
    pub fn record_invoked(&self, name: &str, operation: &str) {
        self.inner
            .lock()
            .invoked
            .push((name.to_string(), operation.to_string()));
    }

    /// Records a destroy hook.
    pub fn record_destroyed(&self, name: &str) {
        self.inner.lock().destroyed.push(name.to_string());
    }

    /// Returns created component names in order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.inner.lock().created.clone()
    }

    /// Returns `(component, operation)` pairs in call order.
    #[must_use]
    pub fn invoked(&self) -> Vec<(String, String)> {
        self.inner.lock().invoked.clone()
    }

    /// Returns destroyed component names in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.inner.lock().destroyed.clone()
    }

    /// Clears all records.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.created.clear();
        inner.invoked.clear();
        inner.destroyed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_records() {
        let log = ShutdownLog::new();
        let other = log.clone();
        other.record_created("A");
        other.record_invoked("A", "greet");
        log.record_destroyed("A");

        assert_eq!(log.created(), vec!["A"]);
        assert_eq!(log.invoked(), vec![("A".to_string(), "greet".to_string())]);
        assert_eq!(other.destroyed(), vec!["A"]);

        log.clear();
        assert!(other.created().is_empty());
    }
}
