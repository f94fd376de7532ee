//! Isolated-process backend tests against the built `memomap` binary
#![cfg(unix)]

use memomap::demo;
use memomap_cache::derive_key;
use futures::StreamExt;
use memomap_core::dispatch::QueuedTask;
use memomap_core::isolated::IsolatedConfig;
use memomap_core::{
    Backend, BackendKind, CacheMode, Error, MapConfig, MapEngine, TaskArgs, WORKER_ARG,
    WorkerCommand,
};
use serde_json::{Value, json};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_memomap");

fn isolated_engine(temp: &TempDir, cache: CacheMode) -> MapEngine {
    MapEngine::new(MapConfig {
        backend: BackendKind::Isolated,
        cache,
        workdir: temp.path().to_path_buf(),
        spawn_timeout: Duration::from_secs(20),
        program_name: "isolated_backend".into(),
        ..MapConfig::default()
    })
    .with_worker_command(WorkerCommand::new(BIN).arg(WORKER_ARG))
    .with_stdout_mirror(false)
}

#[tokio::test]
async fn test_isolated_backend_computes_in_order() {
    let temp = TempDir::new().unwrap();
    let engine = isolated_engine(&temp, CacheMode::On);

    let values = engine
        .map(demo::double(), vec![1.into(), 2.into(), 3.into()])
        .await
        .unwrap();
    assert_eq!(values, vec![json!(2), json!(4), json!(6)]);
    assert_eq!(engine.store().keys().unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_workers_keep_submission_order() {
    let mut config = IsolatedConfig::new(WorkerCommand::new(BIN).arg(WORKER_ARG));
    config.spawn_timeout = Duration::from_secs(20);
    config.max_concurrent = 3;
    let backend = Backend::Isolated(config);

    // Earlier tasks sleep longer, so workers finish in reverse order
    let queue: Vec<QueuedTask> = (0..5u64)
        .map(|i| QueuedTask {
            index: usize::try_from(i).unwrap(),
            args: TaskArgs::positional([json!(i), json!((5 - i) * 100)]),
        })
        .collect();

    let values: Vec<Value> = backend
        .run(demo::sleepy(), queue)
        .map(|result| result.unwrap().value)
        .collect()
        .await;

    let expected: Vec<Value> = (0..5).map(|i| json!(i)).collect();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn test_computation_error_in_child_names_task() {
    let temp = TempDir::new().unwrap();
    let engine = isolated_engine(&temp, CacheMode::On);
    let sqrt = demo::sqrt();

    let err = engine
        .map(sqrt.clone(), vec![4.into(), (-1).into(), 9.into()])
        .await
        .unwrap_err();

    match err {
        Error::WorkerExecution { index, diagnostic } => {
            assert_eq!(index, 1);
            assert!(diagnostic.contains("square root"), "{diagnostic}");
        }
        other => panic!("expected a worker execution error, got {other:?}"),
    }
    let failed = derive_key(&TaskArgs::from(-1), &sqrt.id()).unwrap();
    let succeeded = derive_key(&TaskArgs::from(4), &sqrt.id()).unwrap();
    assert!(!engine.store().exists(&failed));
    assert!(engine.store().exists(&succeeded));
}

#[tokio::test]
async fn test_child_that_dies_is_reported() {
    let temp = TempDir::new().unwrap();
    let err = isolated_engine(&temp, CacheMode::Off)
        .map(demo::abort(), vec![0.into()])
        .await
        .unwrap_err();

    match err {
        Error::WorkerExecution { index, diagnostic } => {
            assert_eq!(index, 0);
            assert!(diagnostic.contains("without a result"), "{diagnostic}");
        }
        other => panic!("expected a worker execution error, got {other:?}"),
    }
}

#[test]
fn test_cli_run_prints_json() {
    let temp = TempDir::new().unwrap();
    let output = Command::new(BIN)
        .args(["run", "double", "1", "2", "3", "--cache", "off", "--workdir"])
        .arg(temp.path())
        .env_remove("MEMOMAP_BACKEND")
        .env_remove("MEMOMAP_CACHE")
        .env_remove("MEMOMAP_WORKDIR")
        .output()
        .unwrap();

    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[2,4,6]");
    assert!(!temp.path().join("map_cache").exists());
}

#[test]
fn test_cli_isolated_run_uses_itself_as_worker() {
    let temp = TempDir::new().unwrap();
    let run = || {
        Command::new(BIN)
            .args(["run", "add", "[1, 2]", "[0.5, 0.5]", "--backend", "isolated", "--workdir"])
            .arg(temp.path())
            .env_remove("MEMOMAP_BACKEND")
            .env_remove("MEMOMAP_CACHE")
            .env_remove("MEMOMAP_WORKDIR")
            .output()
            .unwrap()
    };

    let first = run();
    assert!(first.status.success(), "{first:?}");
    assert_eq!(String::from_utf8_lossy(&first.stdout).trim(), "[3.0,1.0]");

    let second = run();
    assert_eq!(second.stdout, first.stdout);
    let status = std::fs::read_to_string(temp.path().join("status_memomap")).unwrap();
    assert!(status.contains("Loaded    (O): 2"));
}

#[test]
fn test_cli_unknown_backend_exits_with_config_code() {
    let temp = TempDir::new().unwrap();
    let output = Command::new(BIN)
        .args(["run", "double", "1", "--backend", "gpu", "--workdir"])
        .arg(temp.path())
        .env_remove("MEMOMAP_BACKEND")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
}
