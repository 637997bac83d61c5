//! Runtime configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Converts seconds to a Duration, saturating where `from_secs_f64` would panic.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

fn check_seconds(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0) {
        return Err(ConfigError::Invalid(format!("{field} must be positive")));
    }
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("{field} is out of range: {e}")))
}

/// Limits applied to conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum conversation lifetime in seconds.
    #[serde(default)]
    pub max_age_seconds: Option<f64>,
    /// Maximum time between calls in seconds.
    #[serde(default)]
    pub max_idle_seconds: Option<f64>,
}

impl ConversationConfig {
    /// Returns the maximum age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_seconds.map(seconds)
    }

    /// Returns the maximum idle time as a Duration.
    #[must_use]
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_seconds.map(seconds)
    }
}

/// Worker scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running continuations.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Conversation limits.
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Time allowed for each component's destroy hook.
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_seconds: f64,
    /// Default tracing filter directive.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Whether to emit JSON formatted logs.
    #[serde(default)]
    pub json_logs: bool,
}

fn default_teardown_timeout() -> f64 {
    10.0
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            scheduler: SchedulerConfig::default(),
            teardown_timeout_seconds: default_teardown_timeout(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the conversation limits.
    #[must_use]
    pub fn with_conversation(mut self, conversation: ConversationConfig) -> Self {
        self.conversation = conversation;
        self
    }

    /// Bounds the worker scheduler.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.scheduler.max_in_flight = Some(max_in_flight);
        self
    }

    /// Sets the teardown timeout.
    #[must_use]
    pub fn with_teardown_timeout(mut self, seconds: f64) -> Self {
        self.teardown_timeout_seconds = seconds;
        self
    }

    /// Returns the teardown timeout as a Duration.
    #[must_use]
    pub fn teardown_timeout(&self) -> Duration {
        seconds(self.teardown_timeout_seconds)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("teardown_timeout_seconds", self.teardown_timeout_seconds)?;
        for (field, value) in [
            ("conversation.max_age_seconds", self.conversation.max_age_seconds),
            ("conversation.max_idle_seconds", self.conversation.max_idle_seconds),
        ] {
            if let Some(value) = value {
                check_seconds(field, value)?;
            }
        }
        if self.scheduler.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid(
                "scheduler.max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
