//! Deterministic cache key derivation

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Stable identity of a computation.
///
/// Two computations with the same name and version are assumed to produce the
/// same output for the same arguments. Bump the version whenever the logic
/// that determines the output changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationId {
    /// Registered name of the computation
    pub name: String,
    /// Caller-supplied version string
    pub version: String,
}

impl ComputationId {
    /// Create an identity from a name and version
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ComputationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A cache key (SHA-256 hash as lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of the hex representation
    pub const HEX_LEN: usize = 64;

    /// Create from hex string (validation)
    ///
    /// # Errors
    ///
    /// Returns error if the hex string is invalid or wrong length
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != Self::HEX_LEN {
            return Err(Error::invalid_key(format!(
                "cache key must be {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            return Err(Error::invalid_key(
                "cache key must contain only lowercase hex digits",
            ));
        }
        Ok(Self(s))
    }

    /// Get the hex representation
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope hashed to produce a key
#[derive(Serialize)]
struct KeyEnvelope<'a> {
    args: Value,
    computation: &'a ComputationId,
}

/// Derive the cache key for a task's arguments and computation identity.
///
/// Object fields are hashed in sorted order so that argument maps built in
/// different insertion orders produce the same key.
///
/// # Errors
///
/// Returns [`Error::ComputationIntrospection`] when the computation has an
/// empty name or version, and [`Error::Serialization`] when the arguments
/// cannot be encoded.
pub fn derive_key<A: Serialize + ?Sized>(
    args: &A,
    computation: &ComputationId,
) -> Result<CacheKey> {
    if computation.name.trim().is_empty() {
        return Err(Error::introspection(
            &computation.name,
            "computation name is empty",
        ));
    }
    if computation.version.trim().is_empty() {
        return Err(Error::introspection(
            &computation.name,
            "computation version is empty",
        ));
    }

    let args = serde_json::to_value(args)
        .map_err(|e| Error::serialization(format!("Failed to encode task arguments: {e}")))?;
    let envelope = KeyEnvelope {
        args: canonicalize(args),
        computation,
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| Error::serialization(format!("Failed to serialize key envelope: {e}")))?;
    let digest = Sha256::digest(bytes);
    Ok(CacheKey(hex::encode(digest)))
}

/// Rebuild every object with its fields in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in fields {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn double_v1() -> ComputationId {
        ComputationId::new("double", "1")
    }

    #[test]
    fn key_is_stable_across_calls() {
        let k1 = derive_key(&json!([1, 2]), &double_v1()).unwrap();
        let k2 = derive_key(&json!([1, 2]), &double_v1()).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.as_hex().len(), CacheKey::HEX_LEN);
    }

    #[test]
    fn key_ignores_field_insertion_order() {
        let mut a = Map::new();
        a.insert("x".into(), json!(1));
        a.insert("y".into(), json!({"b": 2, "a": 1}));
        let mut b = Map::new();
        b.insert("y".into(), json!({"a": 1, "b": 2}));
        b.insert("x".into(), json!(1));

        let ka = derive_key(&Value::Object(a), &double_v1()).unwrap();
        let kb = derive_key(&Value::Object(b), &double_v1()).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn near_duplicate_inputs_produce_distinct_keys() {
        let variants = [
            (json!(1), ComputationId::new("double", "1")),
            (json!(1.0), ComputationId::new("double", "1")),
            (json!("1"), ComputationId::new("double", "1")),
            (json!([1]), ComputationId::new("double", "1")),
            (json!({"x": 1}), ComputationId::new("double", "1")),
            (json!(1), ComputationId::new("double", "2")),
            (json!(1), ComputationId::new("doubles", "1")),
            (json!(1), ComputationId::new("double ", "1")),
            (json!([1, 2]), ComputationId::new("double", "1")),
            (json!([2, 1]), ComputationId::new("double", "1")),
        ];
        let keys: std::collections::HashSet<_> = variants
            .iter()
            .map(|(args, id)| derive_key(args, id).unwrap())
            .collect();
        assert_eq!(keys.len(), variants.len());
    }

    #[test]
    fn key_changes_when_version_changes() {
        let base = derive_key(&json!(3), &double_v1()).unwrap();
        let bumped = derive_key(&json!(3), &ComputationId::new("double", "2")).unwrap();
        assert_ne!(base, bumped, "editing a computation must invalidate its keys");
    }

    #[test]
    fn empty_identity_is_rejected() {
        let err = derive_key(&json!(1), &ComputationId::new("", "1")).unwrap_err();
        assert!(matches!(err, Error::ComputationIntrospection { .. }));

        let err = derive_key(&json!(1), &ComputationId::new("double", " ")).unwrap_err();
        assert!(matches!(err, Error::ComputationIntrospection { .. }));
    }

    #[test]
    fn from_hex_validates() {
        let key = derive_key(&json!(1), &double_v1()).unwrap();
        assert_eq!(CacheKey::from_hex(key.as_hex()).unwrap(), key);
        assert!(CacheKey::from_hex("abc").is_err());
        assert!(CacheKey::from_hex("Z".repeat(64)).is_err());
        assert!(CacheKey::from_hex("A".repeat(64)).is_err());
    }

    proptest! {
        #[test]
        fn identical_inputs_always_agree(
            args in proptest::collection::vec(any::<i64>(), 0..8),
            version in "[a-z0-9.]{1,6}",
        ) {
            let id = ComputationId::new("prop", version);
            prop_assert_eq!(
                derive_key(&args, &id).unwrap(),
                derive_key(&args.clone(), &id.clone()).unwrap()
            );
        }

        #[test]
        fn different_arguments_disagree(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let id = double_v1();
            prop_assert_ne!(derive_key(&a, &id).unwrap(), derive_key(&b, &id).unwrap());
        }
    }
}
