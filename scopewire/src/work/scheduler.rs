//! Worker scheduler for non-blocking continuations.

use crate::config::SchedulerConfig;
use crate::errors::SchedulerError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An independent unit of work handed to a scheduler.
pub type Work = BoxFuture<'static, ()>;

/// Executes continuations on execution units other than the caller's.
///
/// Submission never waits for the work to run. Once accepted, work cannot
/// be cancelled by the submitter.
#[cfg_attr(test, mockall::automock)]
pub trait WorkScheduler: Send + Sync {
    /// Submits work for independent execution.
    fn schedule_work(&self, work: Work) -> Result<(), SchedulerError>;
}

/// A scheduler that spawns work onto a tokio runtime.
///
/// Optionally bounded: when `max_in_flight` tasks are running, further
/// submissions are rejected with [`SchedulerError::Saturated`].
pub struct TokioWorkScheduler {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    max_in_flight: Option<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioWorkScheduler {
    /// Creates an unbounded scheduler on the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            permits: None,
            max_in_flight: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Creates a scheduler on the runtime of the calling task.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| SchedulerError::NoRuntime)
    }

    /// Creates a scheduler on the current runtime using the given configuration.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Self::current()?;
        Ok(match config.max_in_flight {
            Some(max) => scheduler.with_max_in_flight(max),
            None => scheduler,
        })
    }

    /// Bounds the number of concurrently running tasks.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(max_in_flight)));
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Returns the number of submitted tasks that have not finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Waits until every submitted task, including tasks submitted while
    /// waiting, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<_> = {
                let mut tasks = self.tasks.lock();
                std::mem::take(&mut *tasks)
            };

            if handles.is_empty() {
                return;
            }

            for handle in handles {
                if let Err(join_error) = handle.await {
                    warn!("Scheduled work did not complete: {}", join_error);
                }
            }
        }
    }
}

impl WorkScheduler for TokioWorkScheduler {
    fn schedule_work(&self, work: Work) -> Result<(), SchedulerError> {
        let permit = match &self.permits {
            Some(semaphore) => Some(semaphore.clone().try_acquire_owned().map_err(|_| {
                SchedulerError::Saturated {
                    max_in_flight: self.max_in_flight.unwrap_or_default(),
                }
            })?),
            None => None,
        };

        let handle = self.handle.spawn(async move {
            let _permit = permit;
            work.await;
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        debug!(pending = tasks.len(), "Work scheduled");
        Ok(())
    }
}

impl std::fmt::Debug for TokioWorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioWorkScheduler")
            .field("max_in_flight", &self.max_in_flight)
            .field("pending", &self.pending_count())
            .finish()
    }
}
