//! Adapter for externally scheduled execution.

use super::{QueuedTask, ResultStream};
use crate::Result;
use crate::computation::{Computation, RawResult, TaskArgs};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;

/// Deployment details forwarded with every batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteContext {
    /// Code dependencies the remote side must load before running tasks
    pub dependencies: Vec<String>,
    /// Machines the executor may schedule on
    pub machines: Vec<String>,
}

/// An external scheduler that runs a whole batch.
///
/// Implementations must return one result per submitted task, in submission
/// order. Scheduling, retries and transport are the implementation's concern.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Run `batch` and return its results in submission order
    async fn submit_batch(
        &self,
        computation: Arc<dyn Computation>,
        batch: Vec<TaskArgs>,
        context: &RemoteContext,
    ) -> Result<Vec<RawResult>>;
}

/// Backend variant wrapping an injected executor
#[derive(Clone)]
pub struct RemoteBackend {
    executor: Arc<dyn RemoteExecutor>,
    context: RemoteContext,
}

impl RemoteBackend {
    /// Wrap an executor
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, context: RemoteContext) -> Self {
        Self { executor, context }
    }

    /// Name of the wrapped executor
    #[must_use]
    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Submit the queue as one batch; results stream out once it returns.
    ///
    /// The result count is not checked here; the engine compares it with
    /// the plan.
    pub(super) fn run(
        &self,
        computation: Arc<dyn Computation>,
        queue: Vec<QueuedTask>,
    ) -> ResultStream {
        let executor = Arc::clone(&self.executor);
        let context = self.context.clone();
        let batch: Vec<TaskArgs> = queue.into_iter().map(|task| task.args).collect();

        stream::once(async move {
            tracing::info!(
                executor = executor.name(),
                tasks = batch.len(),
                dependencies = context.dependencies.len(),
                "Submitting batch to remote executor"
            );
            executor.submit_batch(computation, batch, &context).await
        })
        .flat_map(|outcome| match outcome {
            Ok(results) => stream::iter(results.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::computation::{apply_task, computation_fn};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// Runs batches locally and records what it was given
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(usize, RemoteContext)>>,
    }

    #[async_trait]
    impl RemoteExecutor for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn submit_batch(
            &self,
            computation: Arc<dyn Computation>,
            batch: Vec<TaskArgs>,
            context: &RemoteContext,
        ) -> Result<Vec<RawResult>> {
            self.seen
                .lock()
                .unwrap()
                .push((batch.len(), context.clone()));
            batch
                .iter()
                .map(|args| {
                    apply_task(computation.as_ref(), args).map_err(|e| Error::Remote {
                        executor: "recording".into(),
                        message: e.to_string(),
                    })
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_remote_adapter_forwards_batch_and_context() {
        let executor = Arc::new(Recording::default());
        let context = RemoteContext {
            dependencies: vec!["lib.rs".into()],
            machines: vec!["node1".into()],
        };
        let backend = RemoteBackend::new(executor.clone(), context.clone());
        let double = Arc::new(computation_fn("double", "1", |args| {
            Ok(json!(args.at(0).and_then(Value::as_i64).unwrap_or(0) * 2))
        }));
        let queue = vec![
            QueuedTask {
                index: 0,
                args: TaskArgs::from(1),
            },
            QueuedTask {
                index: 3,
                args: TaskArgs::from(2),
            },
        ];

        let out: Vec<Value> = backend
            .run(double, queue)
            .map(|r| r.unwrap().value)
            .collect()
            .await;

        assert_eq!(out, vec![json!(2), json!(4)]);
        assert_eq!(executor.seen.lock().unwrap().as_slice(), &[(2, context)]);
        assert_eq!(backend.executor_name(), "recording");
    }
}
