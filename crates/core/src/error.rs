//! Error types for map planning and dispatch

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Error type for `map` calls
///
/// Every variant is fatal to the enclosing call. Entries committed to the
/// cache before the failure are kept.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Cache store or key derivation failure outside of a specific task
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] memomap_cache::Error),

    /// No key could be derived for a task while caching was required
    #[error("Task {index}: cannot derive a cache key for '{computation}': {reason}")]
    #[diagnostic(
        code(memomap::introspection),
        help("Give the computation a non-empty name and version, or set the cache mode to 'off'")
    )]
    ComputationIntrospection {
        /// Input index of the task
        index: usize,
        /// Computation name
        computation: String,
        /// Why derivation failed
        reason: String,
    },

    /// Stored entry for a planned LOAD slot cannot be decoded
    #[error("Task {index}: cache entry {key} is corrupt: {message}")]
    #[diagnostic(
        code(memomap::cache_corrupt),
        help("Delete the entry file or rerun with cache mode 'refresh'")
    )]
    CacheCorrupt {
        /// Input index of the task
        index: usize,
        /// Hex key of the entry
        key: String,
        /// Decoder message
        message: String,
    },

    /// Unknown backend identifier, or a backend that was not wired up
    #[error("Unsupported map backend: {backend}")]
    #[diagnostic(
        code(memomap::unsupported_backend),
        help("Use one of: serial, pool, isolated, remote (remote needs an executor)")
    )]
    UnsupportedBackend {
        /// The requested backend
        backend: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    #[diagnostic(code(memomap::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A computation returned an error or panicked
    #[error("Task {index} failed on the {backend} backend: {message}")]
    #[diagnostic(code(memomap::task_failed))]
    TaskFailed {
        /// Input index of the task
        index: usize,
        /// Backend in use
        backend: &'static str,
        /// Computation diagnostic
        message: String,
    },

    /// A task did not produce a result within the configured timeout
    #[error("Task {index} on the {backend} backend did not finish within {timeout:?}")]
    #[diagnostic(code(memomap::task_timeout))]
    TaskTimeout {
        /// Input index of the task
        index: usize,
        /// Backend in use
        backend: &'static str,
        /// The configured bound
        timeout: Duration,
    },

    /// The isolated worker did not connect within the spawn timeout
    #[error("Task {index}: isolated worker did not connect within {timeout:?}")]
    #[diagnostic(
        code(memomap::worker_spawn_timeout),
        help("Check that the worker program handles the `__worker <address>` invocation")
    )]
    WorkerSpawnTimeout {
        /// Input index of the task
        index: usize,
        /// The configured bound
        timeout: Duration,
    },

    /// The isolated worker could not be started or exited before connecting
    #[error("Task {index}: isolated worker could not be started: {message}")]
    #[diagnostic(code(memomap::worker_spawn))]
    WorkerSpawn {
        /// Input index of the task
        index: usize,
        /// What went wrong
        message: String,
    },

    /// The isolated worker reported a failure or died without answering
    #[error("Task {index}: isolated worker failed: {diagnostic}")]
    #[diagnostic(code(memomap::worker_execution))]
    WorkerExecution {
        /// Input index of the task
        index: usize,
        /// Diagnostic text from the child
        diagnostic: String,
    },

    /// Malformed or unexpected frame on the worker channel
    #[error("Worker protocol error: {message}")]
    #[diagnostic(code(memomap::protocol))]
    Protocol {
        /// What was wrong with the exchange
        message: String,
    },

    /// The remote executor rejected or failed the batch
    #[error("Remote executor '{executor}' failed: {message}")]
    #[diagnostic(code(memomap::remote))]
    Remote {
        /// Executor name
        executor: String,
        /// Failure message
        message: String,
    },

    /// The dispatcher yielded a different number of results than planned
    #[error("The {backend} backend produced {actual} results for {expected} computed tasks")]
    #[diagnostic(code(memomap::result_count_mismatch))]
    ResultCountMismatch {
        /// Backend in use
        backend: &'static str,
        /// Number of COMPUTE slots
        expected: usize,
        /// Number of results seen (a lower bound on over-production)
        actual: usize,
    },

    /// I/O error outside of the cache store
    #[error("I/O {operation} failed: {source}")]
    #[diagnostic(code(memomap::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Operation that failed
        operation: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an unsupported backend error
    #[must_use]
    pub fn unsupported_backend(backend: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend: backend.into(),
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create an I/O error
    #[must_use]
    pub fn io(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            operation: operation.into(),
        }
    }

    /// Input index of the task this error is about, if any
    #[must_use]
    pub const fn task_index(&self) -> Option<usize> {
        match self {
            Self::ComputationIntrospection { index, .. }
            | Self::CacheCorrupt { index, .. }
            | Self::TaskFailed { index, .. }
            | Self::TaskTimeout { index, .. }
            | Self::WorkerSpawnTimeout { index, .. }
            | Self::WorkerSpawn { index, .. }
            | Self::WorkerExecution { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for `map` calls
pub type Result<T> = std::result::Result<T, Error>;
