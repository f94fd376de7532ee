//! Computations, their arguments, and the registry workers resolve them from.

use memomap_cache::ComputationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Module name used when a computation does not declare one
pub const DEFAULT_MODULE: &str = "main";

/// Arguments of one task.
///
/// A single value is passed as-is, a positional sequence as an ordered list
/// and named fields as a sorted map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskArgs {
    /// One bare argument
    Single(Value),
    /// Positional arguments
    Positional(Vec<Value>),
    /// Named arguments
    Named(BTreeMap<String, Value>),
}

impl TaskArgs {
    /// Positional arguments from anything convertible to JSON values
    pub fn positional<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(items.into_iter().map(Into::into).collect())
    }

    /// Named arguments from `(name, value)` pairs
    pub fn named<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Positional argument at `position`; a single argument is position 0
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&Value> {
        match self {
            Self::Single(v) if position == 0 => Some(v),
            Self::Positional(items) => items.get(position),
            _ => None,
        }
    }

    /// Named argument
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Named(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Number of arguments
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Positional(items) => items.len(),
            Self::Named(fields) => fields.len(),
        }
    }

    /// True when there are no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Value> for TaskArgs {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<i32> for TaskArgs {
    fn from(value: i32) -> Self {
        Self::Single(value.into())
    }
}

impl From<i64> for TaskArgs {
    fn from(value: i64) -> Self {
        Self::Single(value.into())
    }
}

impl From<f64> for TaskArgs {
    fn from(value: f64) -> Self {
        Self::Single(value.into())
    }
}

impl From<&str> for TaskArgs {
    fn from(value: &str) -> Self {
        Self::Single(value.into())
    }
}

/// Failure reported by a computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationError {
    message: String,
}

impl ComputationError {
    /// Create an error with a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The diagnostic text
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ComputationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ComputationError {}

impl From<String> for ComputationError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ComputationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A function mapped over task arguments.
///
/// Implementations should be deterministic in their arguments: results are
/// cached under a key derived from [`Computation::id`] and the arguments.
pub trait Computation: Send + Sync {
    /// Stable identity used in cache keys
    fn id(&self) -> ComputationId;

    /// Registry module an isolated worker resolves this computation from
    fn module(&self) -> &str {
        DEFAULT_MODULE
    }

    /// Run the computation
    ///
    /// # Errors
    ///
    /// Returns a [`ComputationError`] describing why no value was produced.
    fn call(&self, args: &TaskArgs) -> Result<Value, ComputationError>;
}

type CallFn = dyn Fn(&TaskArgs) -> Result<Value, ComputationError> + Send + Sync;

/// Closure-backed [`Computation`]
pub struct FnComputation {
    id: ComputationId,
    module: String,
    f: Box<CallFn>,
}

impl FnComputation {
    /// Place the computation in a registry module
    #[must_use]
    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }
}

impl std::fmt::Debug for FnComputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnComputation")
            .field("id", &self.id)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl Computation for FnComputation {
    fn id(&self) -> ComputationId {
        self.id.clone()
    }

    fn module(&self) -> &str {
        &self.module
    }

    fn call(&self, args: &TaskArgs) -> Result<Value, ComputationError> {
        (self.f)(args)
    }
}

/// Wrap a closure as a computation with the given name and version
pub fn computation_fn<F>(name: impl Into<String>, version: impl Into<String>, f: F) -> FnComputation
where
    F: Fn(&TaskArgs) -> Result<Value, ComputationError> + Send + Sync + 'static,
{
    FnComputation {
        id: ComputationId::new(name, version),
        module: DEFAULT_MODULE.to_string(),
        f: Box::new(f),
    }
}

/// A computed value and the wall-clock time it took
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// The computed value
    pub value: Value,
    /// Elapsed time of the call
    pub elapsed: Duration,
}

/// Invoke a computation, timing it and turning panics into errors
///
/// # Errors
///
/// Returns the computation's error, or a [`ComputationError`] carrying the
/// panic message.
pub fn apply_task(
    computation: &dyn Computation,
    args: &TaskArgs,
) -> Result<RawResult, ComputationError> {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| computation.call(args)));
    let elapsed = start.elapsed();
    match outcome {
        Ok(Ok(value)) => Ok(RawResult { value, elapsed }),
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(ComputationError::new(format!(
            "computation panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Named computations an isolated worker can run
#[derive(Clone, Default)]
pub struct Registry {
    module: String,
    computations: BTreeMap<String, Arc<dyn Computation>>,
}

impl Registry {
    /// Create an empty registry serving `module`
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            computations: BTreeMap::new(),
        }
    }

    /// Module this registry serves
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Register a computation under its name, replacing any previous one
    pub fn register(&mut self, computation: Arc<dyn Computation>) -> &mut Self {
        let name = computation.id().name;
        self.computations.insert(name, computation);
        self
    }

    /// Builder-style [`Registry::register`]
    #[must_use]
    pub fn with(mut self, computation: Arc<dyn Computation>) -> Self {
        self.register(computation);
        self
    }

    /// Look up a computation by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Computation>> {
        self.computations.get(name).cloned()
    }

    /// Resolve `(module, name, version)` as sent by a parent process
    ///
    /// # Errors
    ///
    /// Returns a diagnostic if the module is not served here, the name is
    /// unknown, or the registered version differs.
    pub fn resolve(
        &self,
        module: &str,
        name: &str,
        version: &str,
    ) -> Result<Arc<dyn Computation>, ComputationError> {
        if module != self.module {
            return Err(ComputationError::new(format!(
                "module '{module}' is not available in this worker (serves '{}')",
                self.module
            )));
        }
        let computation = self.get(name).ok_or_else(|| {
            ComputationError::new(format!("computation '{name}' is not registered in '{module}'"))
        })?;
        let registered = computation.id();
        if registered.version != version {
            return Err(ComputationError::new(format!(
                "computation '{name}' is at version '{}' in this worker, parent expected '{version}'",
                registered.version
            )));
        }
        Ok(computation)
    }

    /// Names of all registered computations
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.computations.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("module", &self.module)
            .field("computations", &self.computations.keys().collect::<Vec<_>>())
            .finish()
    }
}
