//! The `map` orchestrator.
//!
//! A call moves through four phases:
//!
//! - PLANNING: derive keys and decide LOAD / COMPUTE / reuse per slot
//! - DISPATCHING: hand the COMPUTE queue to the selected backend
//! - RECONCILING: walk the slots in input order, loading from the store or
//!   pulling the next backend result, committing fresh results and
//!   publishing progress after every slot
//! - DONE: return the values in input order
//!
//! Any error aborts the call. Entries committed before the failure stay in
//! the store and are loaded by the next identical call.

use crate::computation::{Computation, TaskArgs};
use crate::config::{BackendKind, MapConfig};
use crate::dispatch::{
    Backend, PoolConfig, QueuedTask, RemoteBackend, RemoteContext, RemoteExecutor,
};
#[cfg(unix)]
use crate::isolated::{IsolatedConfig, WorkerCommand};
use crate::plan::{Decision, Slot, plan};
use crate::progress::{ProgressSnapshot, ProgressTracker, Reporter, StatusFile, StdoutSink};
use crate::{Error, Result};
use futures::StreamExt;
use futures::stream;
use memomap_cache::{CacheEntry, CacheStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Values of a finished call and its final progress
#[derive(Debug, Clone)]
pub struct MapReport {
    /// One value per input task, in input order
    pub values: Vec<Value>,
    /// Progress after the last slot
    pub progress: ProgressSnapshot,
}

/// Runs computations over task lists with caching and a chosen backend
pub struct MapEngine {
    config: MapConfig,
    store: CacheStore,
    remote: Option<Arc<dyn RemoteExecutor>>,
    #[cfg(unix)]
    worker_command: Option<WorkerCommand>,
    mirror_stdout: bool,
}

impl MapEngine {
    /// Engine for a resolved configuration.
    ///
    /// The final snapshot is mirrored to stdout unless disabled with
    /// [`MapEngine::with_stdout_mirror`].
    #[must_use]
    pub fn new(config: MapConfig) -> Self {
        let store = CacheStore::in_workdir(&config.workdir);
        Self {
            config,
            store,
            remote: None,
            #[cfg(unix)]
            worker_command: None,
            mirror_stdout: true,
        }
    }

    /// Executor used when the `remote` backend is selected
    #[must_use]
    pub fn with_remote(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(executor);
        self
    }

    /// Program started for each isolated task, instead of re-running the
    /// current executable
    #[cfg(unix)]
    #[must_use]
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Whether the final snapshot is also written to stdout
    #[must_use]
    pub const fn with_stdout_mirror(mut self, mirror: bool) -> Self {
        self.mirror_stdout = mirror;
        self
    }

    /// The resolved configuration
    #[must_use]
    pub const fn config(&self) -> &MapConfig {
        &self.config
    }

    /// The cache store under the working directory
    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Build the backend selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedBackend`] for `remote` without an executor
    /// and for `isolated` on platforms without Unix sockets.
    pub fn backend(&self) -> Result<Backend> {
        match self.config.backend {
            BackendKind::Serial => Ok(Backend::Serial),
            BackendKind::Pool => Ok(Backend::Pool(
                PoolConfig::new(self.config.workers).with_task_timeout(self.config.task_timeout),
            )),
            #[cfg(unix)]
            BackendKind::Isolated => {
                let command = match &self.worker_command {
                    Some(command) => command.clone(),
                    None => WorkerCommand::current_exe()
                        .map_err(|e| Error::io(e, "locate the current executable"))?,
                };
                let mut isolated = IsolatedConfig::new(command);
                isolated.spawn_timeout = self.config.spawn_timeout;
                isolated.task_timeout = self.config.task_timeout;
                Ok(Backend::Isolated(isolated))
            }
            #[cfg(not(unix))]
            BackendKind::Isolated => Err(Error::unsupported_backend(
                "isolated (requires Unix domain sockets)",
            )),
            BackendKind::Remote => {
                let executor = self.remote.clone().ok_or_else(|| {
                    Error::unsupported_backend("remote (no remote executor configured)")
                })?;
                Ok(Backend::Remote(RemoteBackend::new(
                    executor,
                    RemoteContext {
                        dependencies: self.config.dependencies.clone(),
                        machines: self.config.machines.clone(),
                    },
                )))
            }
        }
    }

    /// Map `computation` over `tasks`, returning values in input order
    ///
    /// # Errors
    ///
    /// See [`MapEngine::run`].
    pub async fn map(
        &self,
        computation: Arc<dyn Computation>,
        tasks: Vec<TaskArgs>,
    ) -> Result<Vec<Value>> {
        Ok(self.run(computation, tasks).await?.values)
    }

    /// Run a single task through the cache and backend
    ///
    /// # Errors
    ///
    /// See [`MapEngine::run`].
    pub async fn apply(&self, computation: Arc<dyn Computation>, args: TaskArgs) -> Result<Value> {
        let backend = self.config.backend.name();
        self.map(computation, vec![args])
            .await?
            .into_iter()
            .next()
            .ok_or(Error::ResultCountMismatch {
                backend,
                expected: 1,
                actual: 0,
            })
    }

    /// Map `computation` over `tasks` and report the final progress.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: an unsupported backend, key derivation
    /// failure, a corrupt cache entry, a failed or timed-out task, a worker
    /// failure, or a backend producing the wrong number of results.
    pub async fn run(
        &self,
        computation: Arc<dyn Computation>,
        tasks: Vec<TaskArgs>,
    ) -> Result<MapReport> {
        let backend = self.backend()?;
        let result = self.execute(&backend, computation, tasks).await;
        if let Err(e) = &result {
            tracing::error!(
                backend = backend.name(),
                index = ?e.task_index(),
                error = %e,
                "Map call aborted"
            );
        }
        result
    }

    async fn execute(
        &self,
        backend: &Backend,
        computation: Arc<dyn Computation>,
        tasks: Vec<TaskArgs>,
    ) -> Result<MapReport> {
        let plan = plan(&tasks, computation.as_ref(), self.config.cache, &self.store)?;
        tracing::info!(
            computation = %computation.id(),
            backend = backend.name(),
            cache = %self.config.cache,
            tasks = plan.len(),
            compute = plan.compute_indices().len(),
            load = plan.count(|d| *d == Decision::Load),
            "Planned map call"
        );

        let queue: Vec<QueuedTask> = plan
            .compute_indices()
            .iter()
            .map(|&index| QueuedTask {
                index,
                args: tasks[index].clone(),
            })
            .collect();
        let expected = queue.len();
        let mut results = if queue.is_empty() {
            stream::empty().boxed()
        } else {
            backend.run(Arc::clone(&computation), queue)
        };

        let mut tracker = ProgressTracker::new(plan.len());
        let mut reporter = self.reporter();
        let mut values: Vec<Value> = Vec::with_capacity(plan.len());
        let mut durations: Vec<Duration> = Vec::with_capacity(plan.len());
        let mut received = 0;

        for slot in plan.slots() {
            let index = slot.index;
            let (value, elapsed) = match (slot.decision, slot.key.as_ref()) {
                (Decision::Load, _) => {
                    let entry = self.load_slot(slot)?;
                    tracker.record_load(entry.elapsed);
                    (entry.value, entry.elapsed)
                }
                (Decision::Reuse { first }, _) => {
                    tracing::debug!(index, first, "Reusing result of duplicate task");
                    tracker.record_load(durations[first]);
                    (values[first].clone(), durations[first])
                }
                (Decision::Compute, key) => {
                    let Some(result) = results.next().await else {
                        return Err(Error::ResultCountMismatch {
                            backend: backend.name(),
                            expected,
                            actual: received,
                        });
                    };
                    let result = result?;
                    received += 1;
                    if self.config.cache.writes()
                        && let Some(key) = key
                    {
                        let entry =
                            CacheEntry::new(result.value.clone(), result.elapsed, computation.id());
                        self.store.store(key, &entry)?;
                        tracing::info!(index, key = %key, "Stored computed result");
                    }
                    tracker.record_processed(result.elapsed);
                    (result.value, result.elapsed)
                }
            };
            values.push(value);
            durations.push(elapsed);
            reporter.slot(&tracker.snapshot());
        }

        if results.next().await.is_some() {
            return Err(Error::ResultCountMismatch {
                backend: backend.name(),
                expected,
                actual: received + 1,
            });
        }

        let progress = tracker.snapshot();
        reporter.finish(&progress);
        tracing::info!(
            loaded = progress.loaded,
            processed = progress.processed,
            "Map call finished"
        );
        Ok(MapReport { values, progress })
    }

    fn load_slot(&self, slot: &Slot) -> Result<CacheEntry> {
        let index = slot.index;
        let Some(key) = slot.key.as_ref() else {
            return Err(Error::protocol(format!(
                "task {index}: planned to load without a cache key"
            )));
        };
        let entry = self.store.load(key).map_err(|e| match e {
            memomap_cache::Error::CacheCorrupt { key, message, .. } => Error::CacheCorrupt {
                index,
                key,
                message,
            },
            other => Error::Cache(other),
        })?;
        tracing::info!(index, key = %key, "Loaded cached result");
        Ok(entry)
    }

    fn reporter(&self) -> Reporter {
        let reporter = Reporter::new().every_slot(StatusFile::new(
            &self.config.workdir,
            &self.config.program_name,
        ));
        if self.mirror_stdout {
            reporter.at_end(StdoutSink)
        } else {
            reporter
        }
    }
}

impl std::fmt::Debug for MapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEngine")
            .field("config", &self.config)
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("mirror_stdout", &self.mirror_stdout)
            .finish_non_exhaustive()
    }
}
