//! memomap command-line front end.
//!
//! The binary maps the computations in [`demo`] over JSON task arguments.
//! It is also its own isolated worker: `memomap __worker <address>` serves
//! one request from a parent running the `isolated` backend.

pub mod cli;
pub mod demo;

pub use cli::{Cli, CliError};
