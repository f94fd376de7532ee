//! Per-task LOAD / COMPUTE decisions.

use crate::computation::{Computation, TaskArgs};
use crate::config::CacheMode;
use crate::{Error, Result};
use memomap_cache::{CacheKey, CacheStore, derive_key};
use std::collections::HashMap;

/// How one input slot gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Read the committed entry from the store
    Load,
    /// Submit to the backend
    Compute,
    /// Same key as an earlier slot in this call; copy that slot's value
    Reuse {
        /// Index of the earlier slot
        first: usize,
    },
}

/// One planned slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Input index
    pub index: usize,
    /// Cache key, absent when caching is off
    pub key: Option<CacheKey>,
    /// What to do with the slot
    pub decision: Decision,
}

/// Ordered decisions for every input task
#[derive(Debug, Clone, Default)]
pub struct Plan {
    slots: Vec<Slot>,
    compute: Vec<usize>,
}

impl Plan {
    /// All slots in input order
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Input indices of COMPUTE slots, in submission order
    #[must_use]
    pub fn compute_indices(&self) -> &[usize] {
        &self.compute
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when there are no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Count of slots with the given decision kind
    #[must_use]
    pub fn count(&self, matches: impl Fn(&Decision) -> bool) -> usize {
        self.slots.iter().filter(|s| matches(&s.decision)).count()
    }
}

/// Decide, in one pass over `tasks`, which slots load and which compute.
///
/// With the cache off no keys are derived and every slot computes. Otherwise
/// each key is derived once; the first slot carrying a key loads (if an entry
/// exists and the mode reads) or computes, and later slots with the same key
/// reuse the first one's value so the key is committed at most once.
///
/// # Errors
///
/// Returns [`Error::ComputationIntrospection`] if a key cannot be derived
/// while caching is on.
pub fn plan(
    tasks: &[TaskArgs],
    computation: &dyn Computation,
    mode: CacheMode,
    store: &CacheStore,
) -> Result<Plan> {
    let mut plan = Plan {
        slots: Vec::with_capacity(tasks.len()),
        compute: Vec::new(),
    };

    if mode == CacheMode::Off {
        for index in 0..tasks.len() {
            plan.slots.push(Slot {
                index,
                key: None,
                decision: Decision::Compute,
            });
            plan.compute.push(index);
        }
        tracing::debug!(tasks = tasks.len(), "Cache off; computing every task");
        return Ok(plan);
    }

    let id = computation.id();
    let mut seen: HashMap<CacheKey, usize> = HashMap::new();
    for (index, args) in tasks.iter().enumerate() {
        let key = derive_key(args, &id).map_err(|e| match e {
            memomap_cache::Error::ComputationIntrospection {
                computation,
                reason,
            } => Error::ComputationIntrospection {
                index,
                computation,
                reason,
            },
            other => Error::Cache(other),
        })?;

        let decision = if let Some(&first) = seen.get(&key) {
            Decision::Reuse { first }
        } else {
            seen.insert(key.clone(), index);
            if mode.reads() && store.exists(&key) {
                Decision::Load
            } else {
                Decision::Compute
            }
        };
        if decision == Decision::Compute {
            plan.compute.push(index);
        }
        tracing::debug!(index, key = %key, ?decision, "Planned task");
        plan.slots.push(Slot {
            index,
            key: Some(key),
            decision,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::computation_fn;
    use memomap_cache::CacheEntry;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn identity() -> impl Computation {
        computation_fn("identity", "1", |args| Ok(args.at(0).cloned().unwrap_or_default()))
    }

    fn tasks(values: &[i64]) -> Vec<TaskArgs> {
        values.iter().copied().map(TaskArgs::from).collect()
    }

    #[test]
    fn test_cache_off_computes_everything_without_keys() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let plan = plan(&tasks(&[1, 1, 2]), &identity(), CacheMode::Off, &store).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.compute_indices(), &[0, 1, 2]);
        assert!(plan.slots().iter().all(|s| s.key.is_none()));
    }

    #[test]
    fn test_existing_entries_load() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let computation = identity();
        let key = derive_key(&TaskArgs::from(2), &computation.id()).unwrap();
        store
            .store(
                &key,
                &CacheEntry::new(json!(2), Duration::ZERO, computation.id()),
            )
            .unwrap();

        let plan = plan(&tasks(&[1, 2, 3]), &computation, CacheMode::On, &store).unwrap();
        let decisions: Vec<_> = plan.slots().iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            vec![Decision::Compute, Decision::Load, Decision::Compute]
        );
        assert_eq!(plan.compute_indices(), &[0, 2]);
    }

    #[test]
    fn test_refresh_ignores_existing_entries() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let computation = identity();
        let key = derive_key(&TaskArgs::from(1), &computation.id()).unwrap();
        store
            .store(
                &key,
                &CacheEntry::new(json!(1), Duration::ZERO, computation.id()),
            )
            .unwrap();

        let plan = plan(&tasks(&[1]), &computation, CacheMode::Refresh, &store).unwrap();
        assert_eq!(plan.slots()[0].decision, Decision::Compute);
        assert!(plan.slots()[0].key.is_some());
    }

    #[test]
    fn test_duplicate_keys_reuse_first_slot() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let plan = plan(&tasks(&[5, 6, 5, 5]), &identity(), CacheMode::On, &store).unwrap();

        let decisions: Vec<_> = plan.slots().iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Compute,
                Decision::Compute,
                Decision::Reuse { first: 0 },
                Decision::Reuse { first: 0 },
            ]
        );
        assert_eq!(plan.compute_indices(), &[0, 1]);
        assert_eq!(plan.count(|d| matches!(d, Decision::Reuse { .. })), 2);
    }

    #[test]
    fn test_introspection_failure_names_task() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let anonymous = computation_fn("anonymous", "", |_| Ok(json!(null)));

        let err = plan(&tasks(&[1]), &anonymous, CacheMode::On, &store).unwrap_err();
        assert!(matches!(err, Error::ComputationIntrospection { index: 0, .. }));

        // Without caching no key is needed
        assert!(plan(&tasks(&[1]), &anonymous, CacheMode::Off, &store).is_ok());
    }

    #[test]
    fn test_empty_input() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::in_workdir(temp.path());
        let plan = plan(&[], &identity(), CacheMode::On, &store).unwrap();
        assert!(plan.is_empty());
        assert!(plan.compute_indices().is_empty());
    }
}
