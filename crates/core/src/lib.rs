//! Cached, backend-agnostic `map` for memomap.
//!
//! [`MapEngine`] maps a [`Computation`] over a list of [`TaskArgs`] and
//! returns one value per task in input order. Results are memoized on disk
//! through [`memomap_cache`], so a repeated call only computes tasks whose
//! entries are missing.
//!
//! # Backends
//!
//! - `serial`: one task at a time in the calling task
//! - `pool`: blocking worker threads bounded by `workers`
//! - `isolated`: a fresh child process per task, talking over a private Unix
//!   socket (Unix only)
//! - `remote`: a caller-supplied [`RemoteExecutor`]
//!
//! Whatever the backend, results are reassembled in submission order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use memomap_core::{MapConfig, MapEngine, MapOptions, computation_fn};
//!
//! let config = MapConfig::resolve(MapOptions::default().backend("pool"))?;
//! let double = Arc::new(computation_fn("double", "1", |args| {
//!     Ok(json!(args.at(0).and_then(Value::as_i64).unwrap_or(0) * 2))
//! }));
//! let values = MapEngine::new(config).map(double, vec![1.into(), 2.into()]).await?;
//! ```

pub mod computation;
pub mod config;
pub mod dispatch;
pub mod engine;
mod error;
#[cfg(unix)]
pub mod isolated;
pub mod plan;
pub mod progress;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use computation::{
    Computation, ComputationError, FnComputation, RawResult, Registry, TaskArgs, apply_task,
    computation_fn,
};
pub use config::{BackendKind, CacheMode, MapConfig, MapOptions};
pub use dispatch::{Backend, RemoteContext, RemoteExecutor};
pub use engine::{MapEngine, MapReport};
#[cfg(unix)]
pub use isolated::{WORKER_ARG, WorkerCommand};
pub use memomap_cache::{CacheKey, CacheStore, ComputationId};
pub use progress::{ProgressSnapshot, ProgressTracker};
