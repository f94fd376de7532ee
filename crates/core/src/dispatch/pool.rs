//! Worker-thread pool execution.

use super::{QueuedTask, ResultStream};
use crate::Error;
use crate::computation::{Computation, ComputationError, RawResult, apply_task};
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;

/// Pool sizing and limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum tasks running at once (at least 1)
    pub workers: usize,
    /// Bound on waiting for each result once the caller asks for it
    pub task_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Pool with `workers` concurrent tasks and no timeout
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            task_timeout: None,
        }
    }

    /// Set the per-result timeout
    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }
}

type TaskHandle = AbortOnDropHandle<Result<RawResult, ComputationError>>;

/// Submits every task up front and resolves handles in submission order.
///
/// Dropping the stream aborts tasks still waiting for a permit.
pub(super) fn run(
    config: &PoolConfig,
    computation: Arc<dyn Computation>,
    queue: Vec<QueuedTask>,
) -> ResultStream {
    let permits = Arc::new(Semaphore::new(config.workers));

    let handles: Vec<(usize, TaskHandle)> = queue
        .into_iter()
        .map(|QueuedTask { index, args }| {
            let permits = Arc::clone(&permits);
            let computation = Arc::clone(&computation);
            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| ComputationError::new("worker pool closed"))?;
                tracing::debug!(index, "Running task on pool thread");
                tokio::task::spawn_blocking(move || apply_task(computation.as_ref(), &args))
                    .await
                    .map_err(|e| ComputationError::new(format!("worker thread failed: {e}")))?
            });
            (index, AbortOnDropHandle::new(handle))
        })
        .collect();

    let timeout = config.task_timeout;
    stream::iter(handles)
        .then(move |(index, handle)| async move {
            let joined = match timeout {
                Some(limit) => tokio::time::timeout(limit, handle)
                    .await
                    .map_err(|_| Error::TaskTimeout {
                        index,
                        backend: "pool",
                        timeout: limit,
                    })?,
                None => handle.await,
            };
            match joined {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(Error::TaskFailed {
                    index,
                    backend: "pool",
                    message: e.to_string(),
                }),
                Err(e) => Err(Error::TaskFailed {
                    index,
                    backend: "pool",
                    message: format!("task was cancelled or panicked: {e}"),
                }),
            }
        })
        .boxed()
}
