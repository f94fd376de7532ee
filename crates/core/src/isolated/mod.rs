//! Process-isolated execution.
//!
//! Each task runs in a fresh child process so a crash, leak or global state
//! change in the computation cannot affect the parent or other tasks. One
//! task walks these phases:
//!
//! 1. Spawn: bind a private [`WorkerChannel`] and start the worker program
//!    with the channel address as its last argument.
//! 2. Connect: wait for the worker to connect, bounded by the spawn timeout
//!    and raced against the child exiting early.
//! 3. Exchange: send one [`ExecutionRequest`], read one [`ExecutionResponse`].
//! 4. Reap: wait for the child to exit, killing it if it lingers.
//! 5. Cleanup: remove the channel directory on every path.

mod channel;
pub mod protocol;
pub mod worker;

pub use channel::WorkerChannel;
pub use protocol::{ExecutionRequest, ExecutionResponse};
pub use worker::serve;

use crate::computation::{Computation, RawResult};
use crate::dispatch::{QueuedTask, ResultStream};
use crate::{Error, Result};
use futures::StreamExt;
use futures::stream;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use uuid::Uuid;

/// Argument that switches a binary into worker mode
pub const WORKER_ARG: &str = "__worker";

/// How long a worker may linger after answering before it is killed
pub const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Program and leading arguments used to start a worker.
///
/// The channel address is appended as the final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments before the address
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Command running `program` with no leading arguments
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a leading argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-run the current executable as `<exe> __worker <address>`
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable path is unavailable.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_ARG))
    }
}

/// Settings for the isolated backend
#[derive(Debug, Clone)]
pub struct IsolatedConfig {
    /// How to start a worker
    pub command: WorkerCommand,
    /// Bound on the Connect phase
    pub spawn_timeout: Duration,
    /// Bound on waiting for the response
    pub task_timeout: Option<Duration>,
    /// Workers alive at once (at least 1)
    pub max_concurrent: usize,
}

impl IsolatedConfig {
    /// Config with the default spawn timeout, no task timeout and one worker
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            spawn_timeout: crate::config::DEFAULT_SPAWN_TIMEOUT,
            task_timeout: None,
            max_concurrent: 1,
        }
    }
}

/// Run each queued task in its own worker, `max_concurrent` at a time,
/// yielding results in submission order.
pub(crate) fn run(
    config: IsolatedConfig,
    computation: Arc<dyn Computation>,
    queue: Vec<QueuedTask>,
) -> ResultStream {
    let limit = config.max_concurrent.max(1);
    let config = Arc::new(config);
    stream::iter(queue)
        .map(move |task| {
            let config = Arc::clone(&config);
            let computation = Arc::clone(&computation);
            async move { run_task(&config, computation.as_ref(), task).await }
        })
        .buffered(limit)
        .boxed()
}

/// Run one task in a fresh worker process.
///
/// # Errors
///
/// - [`Error::WorkerSpawn`] if the worker cannot start or exits before connecting
/// - [`Error::WorkerSpawnTimeout`] if it does not connect in time
/// - [`Error::TaskTimeout`] if the response does not arrive in time
/// - [`Error::WorkerExecution`] if the computation failed or the worker died
/// - [`Error::Protocol`] if the response does not answer the request
pub async fn run_task(
    config: &IsolatedConfig,
    computation: &dyn Computation,
    task: QueuedTask,
) -> Result<RawResult> {
    let index = task.index;
    let channel = WorkerChannel::bind().map_err(|e| Error::WorkerSpawn {
        index,
        message: format!("cannot create worker channel: {e}"),
    })?;

    let outcome = exchange(config, computation, task, &channel).await;

    if let Err(e) = channel.close() {
        tracing::warn!(index, error = %e, "Failed to remove worker channel directory");
    }
    outcome
}

async fn exchange(
    config: &IsolatedConfig,
    computation: &dyn Computation,
    task: QueuedTask,
    channel: &WorkerChannel,
) -> Result<RawResult> {
    let QueuedTask { index, args } = task;

    let mut child = Command::new(&config.command.program)
        .args(&config.command.args)
        .arg(channel.address())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::WorkerSpawn {
            index,
            message: format!("cannot start {}: {e}", config.command.program.display()),
        })?;
    tracing::debug!(index, pid = child.id(), "Spawned isolated worker");

    let mut stream = tokio::select! {
        accepted = channel.accept() => accepted.map_err(|e| Error::WorkerSpawn {
            index,
            message: format!("accept failed: {e}"),
        })?,
        status = child.wait() => {
            return Err(Error::WorkerSpawn {
                index,
                message: format!("worker exited before connecting ({})", describe(status)),
            });
        }
        () = tokio::time::sleep(config.spawn_timeout) => {
            return Err(Error::WorkerSpawnTimeout {
                index,
                timeout: config.spawn_timeout,
            });
        }
    };

    let id = computation.id();
    let request = ExecutionRequest {
        request_id: Uuid::new_v4(),
        module: computation.module().to_string(),
        name: id.name,
        version: id.version,
        args,
    };
    request
        .write_to(&mut stream)
        .await
        .map_err(|e| Error::WorkerExecution {
            index,
            diagnostic: format!("cannot send request to worker: {e}"),
        })?;

    let response = match config.task_timeout {
        Some(limit) => tokio::time::timeout(limit, ExecutionResponse::read_from(&mut stream))
            .await
            .map_err(|_| Error::TaskTimeout {
                index,
                backend: "isolated",
                timeout: limit,
            })?,
        None => ExecutionResponse::read_from(&mut stream).await,
    };
    drop(stream);

    let status = reap(&mut child, index).await;

    let response = response.map_err(|e| Error::WorkerExecution {
        index,
        diagnostic: format!(
            "worker closed the channel without a result ({e}); exit status: {status}"
        ),
    })?;
    if response.request_id() != request.request_id {
        return Err(Error::protocol(format!(
            "task {index}: response answers request {} but {} was sent",
            response.request_id(),
            request.request_id
        )));
    }

    match response {
        ExecutionResponse::Completed { value, elapsed, .. } => Ok(RawResult { value, elapsed }),
        ExecutionResponse::Failed { diagnostic, .. } => {
            Err(Error::WorkerExecution { index, diagnostic })
        }
    }
}

async fn reap(child: &mut Child, index: usize) -> String {
    if let Ok(status) = tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        return describe(status);
    }
    tracing::warn!(index, "Isolated worker did not exit after answering; killing it");
    if let Err(e) = child.start_kill() {
        tracing::warn!(index, error = %e, "Failed to kill isolated worker");
    }
    describe(child.wait().await)
}

fn describe(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unknown: {e}"),
    }
}
