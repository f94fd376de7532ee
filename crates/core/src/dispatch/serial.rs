//! In-process, one-at-a-time execution.

use super::{QueuedTask, ResultStream};
use crate::Error;
use crate::computation::{Computation, apply_task};
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;

/// Each task runs when the stream is polled for it, on the polling task.
pub(super) fn run(computation: Arc<dyn Computation>, queue: Vec<QueuedTask>) -> ResultStream {
    stream::iter(queue)
        .map(move |task| {
            tracing::debug!(index = task.index, "Running task in process");
            apply_task(computation.as_ref(), &task.args).map_err(|e| Error::TaskFailed {
                index: task.index,
                backend: "serial",
                message: e.to_string(),
            })
        })
        .boxed()
}
