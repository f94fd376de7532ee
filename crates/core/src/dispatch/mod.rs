//! Backends that run the uncached tasks.
//!
//! Every backend offers the same capability: take the COMPUTE queue in
//! submission order and yield one result per task, in that same order,
//! regardless of the order in which tasks finish.

mod pool;
mod remote;
mod serial;

pub use pool::PoolConfig;
pub use remote::{RemoteBackend, RemoteContext, RemoteExecutor};

use crate::Result;
use crate::computation::{Computation, RawResult, TaskArgs};
#[cfg(unix)]
use crate::isolated::IsolatedConfig;
use futures::stream::BoxStream;
use std::sync::Arc;

/// A task handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    /// Input index of the task
    pub index: usize,
    /// Task arguments
    pub args: TaskArgs,
}

/// Results in submission order
pub type ResultStream = BoxStream<'static, Result<RawResult>>;

/// The closed set of execution strategies
#[derive(Clone)]
pub enum Backend {
    /// Run each task in the calling task, one at a time
    Serial,
    /// Run tasks on blocking worker threads
    Pool(PoolConfig),
    /// Run each task in a fresh child process
    #[cfg(unix)]
    Isolated(IsolatedConfig),
    /// Hand the whole queue to a remote executor
    Remote(RemoteBackend),
}

impl Backend {
    /// Name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Pool(_) => "pool",
            #[cfg(unix)]
            Self::Isolated(_) => "isolated",
            Self::Remote(_) => "remote",
        }
    }

    /// Submit the queue and return its results in submission order.
    ///
    /// Pool tasks start immediately; serial and isolated tasks start as the
    /// stream is polled.
    pub fn run(&self, computation: Arc<dyn Computation>, queue: Vec<QueuedTask>) -> ResultStream {
        tracing::debug!(backend = self.name(), tasks = queue.len(), "Dispatching tasks");
        match self {
            Self::Serial => serial::run(computation, queue),
            Self::Pool(config) => pool::run(config, computation, queue),
            #[cfg(unix)]
            Self::Isolated(config) => crate::isolated::run(config.clone(), computation, queue),
            Self::Remote(remote) => remote.run(computation, queue),
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => f.write_str("Serial"),
            Self::Pool(config) => f.debug_tuple("Pool").field(config).finish(),
            #[cfg(unix)]
            Self::Isolated(config) => f.debug_tuple("Isolated").field(config).finish(),
            Self::Remote(remote) => f
                .debug_tuple("Remote")
                .field(&remote.executor_name())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::computation::computation_fn;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn queue(values: &[i64]) -> Vec<QueuedTask> {
        values
            .iter()
            .enumerate()
            .map(|(index, v)| QueuedTask {
                index,
                args: TaskArgs::from(*v),
            })
            .collect()
    }

    /// Sleeps longer for smaller inputs so completion order is reversed
    fn slow_double() -> Arc<dyn Computation> {
        Arc::new(computation_fn("slow_double", "1", |args| {
            let n = args.at(0).and_then(Value::as_i64).ok_or("expected integer")?;
            let delay = u64::try_from(50 - n.clamp(0, 50)).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(delay));
            Ok(json!(n * 2))
        }))
    }

    async fn values(stream: ResultStream) -> Vec<Value> {
        stream
            .map(|r| r.unwrap().value)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_serial_backend_preserves_order() {
        let out = values(Backend::Serial.run(slow_double(), queue(&[1, 20, 40]))).await;
        assert_eq!(out, vec![json!(2), json!(40), json!(80)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_backend_preserves_order() {
        let backend = Backend::Pool(PoolConfig::new(4));
        let out = values(backend.run(slow_double(), queue(&[1, 10, 20, 30, 40, 49]))).await;
        assert_eq!(
            out,
            vec![json!(2), json!(20), json!(40), json!(60), json!(80), json!(98)]
        );
    }

    #[tokio::test]
    async fn test_pool_reports_failing_index() {
        let fails_on_three = Arc::new(computation_fn("picky", "1", |args| {
            match args.at(0).and_then(Value::as_i64) {
                Some(3) => Err("three is not allowed".into()),
                Some(n) => Ok(json!(n)),
                None => Err("expected integer".into()),
            }
        }));
        let backend = Backend::Pool(PoolConfig::new(2));
        let mut stream = backend.run(fails_on_three, queue(&[1, 2, 3]));

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::TaskFailed { index: 2, backend: "pool", .. }
        ));
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::Serial.name(), "serial");
        assert_eq!(Backend::Pool(PoolConfig::new(1)).name(), "pool");
    }
}
