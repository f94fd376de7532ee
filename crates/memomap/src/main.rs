//! memomap CLI Application

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use memomap::cli::{self, Cli, CliError, EXIT_OK, exit_code_for, render_error};
use memomap::demo;
use std::future::Future;
use std::path::PathBuf;

/// Main entry point
fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    init_tracing();

    // The isolated worker entry point bypasses argument parsing
    let args: Vec<String> = std::env::args().collect();
    #[cfg(unix)]
    if args.len() > 2 && args[1] == memomap_core::WORKER_ARG {
        let address = PathBuf::from(&args[2]);
        let exit_code = run_with_tokio(async move {
            memomap_core::isolated::serve(&address, &demo::registry())
                .await
                .map_err(CliError::from)?;
            Ok(String::new())
        });
        std::process::exit(exit_code);
    }

    let cli = Cli::parse();
    let exit_code = run_with_tokio(cli::execute(cli));
    std::process::exit(exit_code);
}

/// Logs go to stderr so stdout carries only results
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Create a tokio runtime, run `task`, print its output and map errors to
/// exit codes
fn run_with_tokio<F>(task: F) -> i32
where
    F: Future<Output = Result<String, CliError>>,
{
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            return 1;
        }
    };

    match rt.block_on(task) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            EXIT_OK
        }
        Err(err) => {
            let code = exit_code_for(&err);
            render_error(err);
            code
        }
    }
}
