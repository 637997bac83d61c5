//! Testing utilities for scopewire runtimes.
//!
//! This module provides:
//! - A shared log of instance creation, invocation and teardown
//! - Recording and failing components with ready-made factories

mod components;
mod log;

pub use components::{FailingComponent, FailureMode, RecordingComponent};
pub use log::ShutdownLog;
