//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(memomap::cache::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// The computation has no stable identity, so no key can be derived for it
    #[error("Cannot derive a cache key for computation '{computation}': {reason}")]
    #[diagnostic(
        code(memomap::cache::introspection),
        help("Give the computation a non-empty name and version, or run with caching off")
    )]
    ComputationIntrospection {
        /// Name of the computation (may be empty)
        computation: String,
        /// Why the identity is unusable
        reason: String,
    },

    /// Stored entry exists but cannot be decoded
    #[error("Cache entry {key} is corrupt: {message}")]
    #[diagnostic(
        code(memomap::cache::corrupt),
        help("Delete the entry file or rerun with cache mode 'refresh'")
    )]
    CacheCorrupt {
        /// The key of the unreadable entry
        key: String,
        /// Location of the entry on disk
        path: Box<Path>,
        /// Decoder message
        message: String,
    },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    #[diagnostic(
        code(memomap::cache::not_found),
        help("The cache entry may have been removed or never existed")
    )]
    NotFound {
        /// The cache key that was not found
        key: String,
    },

    /// Malformed key text
    #[error("Invalid cache key: {message}")]
    #[diagnostic(code(memomap::cache::invalid_key))]
    InvalidKey {
        /// What is wrong with the key
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(memomap::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an introspection error for a computation without usable identity
    #[must_use]
    pub fn introspection(computation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ComputationIntrospection {
            computation: computation.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt-entry error
    #[must_use]
    pub fn corrupt(
        key: impl Into<String>,
        path: impl AsRef<Path>,
        message: impl Into<String>,
    ) -> Self {
        Self::CacheCorrupt {
            key: key.into(),
            path: path.as_ref().into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid key error
    #[must_use]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
