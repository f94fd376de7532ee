//! Command-line interface.

use crate::demo;
use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use memomap_core::{MapConfig, MapEngine, MapOptions, TaskArgs};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Map execution error exit code
pub const EXIT_MAP: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(memomap::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The map call failed (exit code 3)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Map(memomap_core::Error),
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Resolution problems are the user's to fix; everything else is a map failure.
impl From<memomap_core::Error> for CliError {
    fn from(err: memomap_core::Error) -> Self {
        match err {
            memomap_core::Error::Configuration { message } => Self::config(message),
            memomap_core::Error::UnsupportedBackend { backend } => Self::config_with_help(
                format!("unsupported backend '{backend}'"),
                "Use one of: serial, pool, isolated",
            ),
            other => Self::Map(other),
        }
    }
}

/// Get the exit code for a given error
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Map(_) => EXIT_MAP,
    }
}

/// Render an error to stderr with miette
pub fn render_error(err: CliError) {
    let report = Report::new(err);
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{report:?}");
    let _ = stderr.flush();
}

/// Map demo computations over JSON arguments with on-disk memoization.
#[derive(Parser, Debug)]
#[command(name = "memomap")]
#[command(about = "Map computations over task lists with on-disk memoization")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Map a computation over tasks and print the results as a JSON array.
    #[command(about = "Map a demo computation over JSON task arguments")]
    Run {
        /// Computation to run.
        #[arg(help = "Name of the computation (see `memomap list`)")]
        computation: String,

        /// One JSON value per task.
        #[arg(
            help = "Task arguments as JSON: scalars pass one argument, arrays are positional, objects are named",
            allow_negative_numbers = true
        )]
        tasks: Vec<String>,

        /// Execution backend.
        #[arg(long, short = 'b', help = "Backend: serial, pool, isolated")]
        backend: Option<String>,

        /// Cache mode.
        #[arg(long, short = 'c', help = "Cache mode: on, off, refresh")]
        cache: Option<String>,

        /// Working directory holding the cache and status file.
        #[arg(long, short = 'w', value_name = "DIR")]
        workdir: Option<PathBuf>,

        /// Pool size.
        #[arg(long, short = 'j', help = "Number of concurrent pool workers")]
        workers: Option<usize>,

        /// Code dependency forwarded to remote executors.
        #[arg(long = "dependency", short = 'd', value_name = "PATH")]
        dependencies: Vec<String>,

        /// Also print the final progress report to stdout.
        #[arg(long, help = "Print the progress report before the results")]
        progress: bool,
    },

    /// List the available computations.
    #[command(about = "List demo computations")]
    List,
}

/// Parse one task argument from JSON.
///
/// Arrays become positional arguments, objects named arguments, and any
/// other value a single argument.
///
/// # Errors
///
/// Returns a configuration error if `raw` is not valid JSON.
pub fn parse_task(raw: &str) -> Result<TaskArgs, CliError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        CliError::config_with_help(
            format!("task argument '{raw}' is not valid JSON: {e}"),
            "Quote strings, e.g. '\"text\"'",
        )
    })?;
    Ok(match value {
        Value::Array(items) => TaskArgs::positional(items),
        Value::Object(fields) => TaskArgs::named(fields),
        other => TaskArgs::Single(other),
    })
}

/// Execute a parsed command and return what should be printed.
///
/// # Errors
///
/// Returns a [`CliError`] for invalid input or a failed map call.
pub async fn execute(cli: Cli) -> Result<String, CliError> {
    match cli.command {
        Commands::List => {
            let registry = demo::registry();
            let lines: Vec<String> = registry
                .names()
                .filter_map(|name| registry.get(name))
                .map(|c| c.id().to_string())
                .collect();
            Ok(lines.join("\n"))
        }
        Commands::Run {
            computation,
            tasks,
            backend,
            cache,
            workdir,
            workers,
            dependencies,
            progress,
        } => {
            let computation = demo::registry().get(&computation).ok_or_else(|| {
                CliError::config_with_help(
                    format!("unknown computation '{computation}'"),
                    "Run `memomap list` to see the available computations",
                )
            })?;
            let tasks = tasks
                .iter()
                .map(|raw| parse_task(raw))
                .collect::<Result<Vec<_>, _>>()?;

            let mut options = MapOptions::default();
            if !dependencies.is_empty() {
                options = options.dependencies(dependencies);
            }
            if let Some(backend) = backend {
                options = options.backend(backend);
            }
            if let Some(cache) = cache {
                options = options.cache(cache);
            }
            if let Some(workdir) = workdir {
                options = options.workdir(workdir);
            }
            if let Some(workers) = workers {
                options = options.workers(workers);
            }
            let config = MapConfig::resolve(options)?;
            tracing::debug!(?config, "Resolved map configuration");

            let values = MapEngine::new(config)
                .with_stdout_mirror(progress)
                .map(computation, tasks)
                .await?;
            serde_json::to_string(&values)
                .map_err(|e| CliError::Map(memomap_core::Error::protocol(e.to_string())))
        }
    }
}
