//! Content-addressed result caching for memomap
//!
//! This crate provides the persistent half of memoization:
//! - Deterministic cache key derivation from task arguments and a
//!   computation's stable identity
//! - A directory of one-file-per-key entries with crash-safe writes
//!
//! # Cache Key Computation
//!
//! Cache keys are SHA-256 digests of a canonical JSON envelope holding:
//! - The task arguments, with object fields in sorted order
//! - The computation name and version
//!
//! Editing a computation without bumping its version will serve stale entries.

mod error;
pub mod key;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use key::{CacheKey, ComputationId, derive_key};
pub use store::{CACHE_DIR_NAME, CacheEntry, CacheStore};
