//! Map configuration, assembled once at the call boundary.
//!
//! Resolution order for every option:
//! 1. `MEMOMAP_*` environment variable
//! 2. Call-site value in [`MapOptions`]
//! 3. Built-in default
//!
//! Only [`MapConfig::resolve`] reads the process environment; everything
//! below it receives the resolved [`MapConfig`] explicitly.

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable selecting the backend
pub const ENV_BACKEND: &str = "MEMOMAP_BACKEND";
/// Environment variable selecting the cache mode
pub const ENV_CACHE: &str = "MEMOMAP_CACHE";
/// Environment variable listing code dependencies (comma separated)
pub const ENV_DEPENDENCIES: &str = "MEMOMAP_DEPENDENCIES";
/// Environment variable listing remote machines (comma separated)
pub const ENV_MACHINES: &str = "MEMOMAP_MACHINES";
/// Environment variable setting the working directory
pub const ENV_WORKDIR: &str = "MEMOMAP_WORKDIR";
/// Environment variable setting the pool size
pub const ENV_WORKERS: &str = "MEMOMAP_WORKERS";
/// Environment variable setting the worker spawn timeout in seconds
pub const ENV_SPAWN_TIMEOUT: &str = "MEMOMAP_SPAWN_TIMEOUT_SECS";
/// Environment variable setting the per-task timeout in seconds
pub const ENV_TASK_TIMEOUT: &str = "MEMOMAP_TASK_TIMEOUT_SECS";

/// Default working directory
pub const DEFAULT_WORKDIR: &str = "work";
/// Default bound on waiting for an isolated worker to connect
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether results are read from and written to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Compute everything, touch nothing on disk
    Off,
    /// Load existing entries, compute and store the rest
    #[default]
    On,
    /// Compute everything and overwrite existing entries
    Refresh,
}

impl CacheMode {
    /// Whether fresh results are committed to the store
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::On | Self::Refresh)
    }

    /// Whether existing entries may satisfy a task
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::On)
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "no" | "false" | "0" => Ok(Self::Off),
            "on" | "yes" | "true" | "1" => Ok(Self::On),
            "refresh" => Ok(Self::Refresh),
            other => Err(Error::configuration(format!(
                "unknown cache mode '{other}' (expected off, on or refresh)"
            ))),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Refresh => "refresh",
        })
    }
}

/// Which execution strategy runs uncached tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In the calling task, one after another
    #[default]
    Serial,
    /// On a pool of blocking worker threads
    Pool,
    /// One fresh child process per task
    Isolated,
    /// Handed to an injected remote executor
    Remote,
}

impl BackendKind {
    /// Canonical name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Pool => "pool",
            Self::Isolated => "isolated",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "pool" | "multiprocessing" | "m" => Ok(Self::Pool),
            "isolated" | "serial_isolated" => Ok(Self::Isolated),
            "remote" | "playdoh" | "ipython" | "ipcluster" => Ok(Self::Remote),
            _ => Err(Error::unsupported_backend(s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Call-site options; `None` falls through to the default
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// Backend identifier
    pub backend: Option<String>,
    /// Cache mode identifier
    pub cache: Option<String>,
    /// Code dependencies shipped to remote executors
    pub dependencies: Option<Vec<String>>,
    /// Remote machines
    pub machines: Option<Vec<String>>,
    /// Working directory holding `map_cache/` and status files
    pub workdir: Option<PathBuf>,
    /// Pool size
    pub workers: Option<usize>,
    /// Bound on waiting for an isolated worker to connect
    pub spawn_timeout: Option<Duration>,
    /// Bound on waiting for a single task's result
    pub task_timeout: Option<Duration>,
    /// Name used for the status file (`status_<name>`)
    pub program_name: Option<String>,
}

impl MapOptions {
    /// Set the backend identifier
    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the cache mode identifier
    #[must_use]
    pub fn cache(mut self, cache: impl Into<String>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Set the pool size
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the code dependencies
    #[must_use]
    pub fn dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    /// Set the status file program name
    #[must_use]
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = Some(name.into());
        self
    }

    /// Set the per-task timeout
    #[must_use]
    pub const fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Set the spawn timeout
    #[must_use]
    pub const fn spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = Some(timeout);
        self
    }
}

/// Fully resolved configuration threaded through a `map` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// Cache mode
    pub cache: CacheMode,
    /// Code dependencies shipped to remote executors
    pub dependencies: Vec<String>,
    /// Remote machines
    pub machines: Vec<String>,
    /// Working directory
    pub workdir: PathBuf,
    /// Pool size (at least 1)
    pub workers: usize,
    /// Bound on waiting for an isolated worker to connect
    pub spawn_timeout: Duration,
    /// Bound on waiting for a single task's result
    pub task_timeout: Option<Duration>,
    /// Name used for the status file
    pub program_name: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            cache: CacheMode::default(),
            dependencies: Vec::new(),
            machines: Vec::new(),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            workers: default_workers(),
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
            task_timeout: None,
            program_name: default_program_name(),
        }
    }
}

impl MapConfig {
    /// Resolve options against the process environment
    ///
    /// # Errors
    ///
    /// Returns an error for unknown backends, cache modes or unparsable numbers.
    pub fn resolve(options: MapOptions) -> Result<Self> {
        Self::resolve_with(options, |name| std::env::var(name).ok())
    }

    /// Resolve options against an injected environment lookup
    ///
    /// # Errors
    ///
    /// Returns an error for unknown backends, cache modes or unparsable numbers.
    pub fn resolve_with<F>(options: MapOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let backend = match env(ENV_BACKEND).or(options.backend) {
            Some(s) => s.parse()?,
            None => defaults.backend,
        };
        let cache = match env(ENV_CACHE).or(options.cache) {
            Some(s) => s.parse()?,
            None => defaults.cache,
        };
        let dependencies = env(ENV_DEPENDENCIES)
            .map(|s| split_list(&s))
            .or(options.dependencies)
            .unwrap_or(defaults.dependencies);
        let machines = env(ENV_MACHINES)
            .map(|s| split_list(&s))
            .or(options.machines)
            .unwrap_or(defaults.machines);
        let workdir = env(ENV_WORKDIR)
            .map(PathBuf::from)
            .or(options.workdir)
            .unwrap_or(defaults.workdir);
        let workers = match env(ENV_WORKERS) {
            Some(s) => parse_number(ENV_WORKERS, &s)?,
            None => options.workers.unwrap_or(defaults.workers),
        }
        .max(1);
        let spawn_timeout = match env(ENV_SPAWN_TIMEOUT) {
            Some(s) => Duration::from_secs(parse_number(ENV_SPAWN_TIMEOUT, &s)?),
            None => options.spawn_timeout.unwrap_or(defaults.spawn_timeout),
        };
        let task_timeout = match env(ENV_TASK_TIMEOUT) {
            Some(s) => Some(Duration::from_secs(parse_number(ENV_TASK_TIMEOUT, &s)?)),
            None => options.task_timeout,
        };
        let program_name = options
            .program_name
            .filter(|n| !n.is_empty())
            .unwrap_or(defaults.program_name);

        Ok(Self {
            backend,
            cache,
            dependencies,
            machines,
            workdir,
            workers,
            spawn_timeout,
            task_timeout,
            program_name,
        })
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::configuration(format!("{name} must be a number, got '{value}'")))
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_program_name() -> String {
    std::env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "memomap".to_string())
}
