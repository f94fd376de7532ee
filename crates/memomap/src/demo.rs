//! Built-in computations served by the `memomap` binary.
//!
//! The same registry backs `memomap run` in the parent and `memomap __worker`
//! in isolated children, so both sides agree on names and versions.

use memomap_core::{Computation, ComputationError, Registry, TaskArgs, computation_fn};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Registry module of the demo computations
pub const MODULE: &str = "memomap::demo";

/// All demo computations
#[must_use]
pub fn registry() -> Registry {
    Registry::new(MODULE)
        .with(double())
        .with(add())
        .with(sqrt())
        .with(sleepy())
        .with(abort())
}

fn integer(args: &TaskArgs, position: usize) -> Result<i64, ComputationError> {
    args.at(position)
        .and_then(Value::as_i64)
        .ok_or_else(|| ComputationError::new(format!("argument {position} must be an integer")))
}

fn number(args: &TaskArgs, position: usize) -> Result<f64, ComputationError> {
    args.at(position)
        .and_then(Value::as_f64)
        .ok_or_else(|| ComputationError::new(format!("argument {position} must be a number")))
}

/// `x -> 2x`
#[must_use]
pub fn double() -> Arc<dyn Computation> {
    Arc::new(
        computation_fn("double", "1", |args| Ok(json!(integer(args, 0)? * 2))).in_module(MODULE),
    )
}

/// `[a, b] -> a + b`
#[must_use]
pub fn add() -> Arc<dyn Computation> {
    Arc::new(
        computation_fn("add", "1", |args| Ok(json!(number(args, 0)? + number(args, 1)?)))
            .in_module(MODULE),
    )
}

/// Square root; negative input is an error
#[must_use]
pub fn sqrt() -> Arc<dyn Computation> {
    Arc::new(
        computation_fn("sqrt", "1", |args| {
            let x = number(args, 0)?;
            if x < 0.0 {
                return Err(format!("cannot take the square root of {x}").into());
            }
            Ok(json!(x.sqrt()))
        })
        .in_module(MODULE),
    )
}

/// `[value, millis]`: sleep, then return `value`
#[must_use]
pub fn sleepy() -> Arc<dyn Computation> {
    Arc::new(
        computation_fn("sleepy", "1", |args| {
            let millis = args.at(1).and_then(Value::as_u64).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(millis));
            Ok(args.at(0).cloned().unwrap_or_default())
        })
        .in_module(MODULE),
    )
}

/// Terminates the whole process; only meaningful on the isolated backend
#[must_use]
pub fn abort() -> Arc<dyn Computation> {
    Arc::new(computation_fn("abort", "1", |_| std::process::abort()).in_module(MODULE))
}
