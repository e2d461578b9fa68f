// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::RwLock;

use hashbrown::{HashMap, HashSet};

use crate::errors::StoreError;
use crate::store::backend::{resolve_range, Backend, Op, Structure, WriteBatch};

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Vec<u8>>,
    lists: HashMap<String, Vec<u64>>,
    sets: HashMap<String, HashSet<String>>,
    counters: HashMap<String, u64>,
}

/// In-process backend. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys holding any kind of data.
    pub fn key_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.values.len() + inner.lists.len() + inner.sets.len() + inner.counters.len()
    }
}

impl Backend for MemoryBackend {
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        for op in batch.into_ops() {
            match op {
                Op::Set { key, value } => {
                    inner.values.insert(key, value);
                }
                Op::Push { key, id } => inner.lists.entry(key).or_default().push(id),
                Op::AddMember { key, member } => {
                    inner.sets.entry(key).or_default().insert(member);
                }
                Op::RemoveMember { key, member } => {
                    if let Some(set) = inner.sets.get_mut(&key) {
                        set.remove(&member);
                        if set.is_empty() {
                            inner.sets.remove(&key);
                        }
                    }
                }
                Op::Delete { key, structure } => match structure {
                    Structure::Value => {
                        inner.values.remove(&key);
                    }
                    Structure::List => {
                        inner.lists.remove(&key);
                    }
                    Structure::Set => {
                        inner.sets.remove(&key);
                    }
                    Structure::Counter => {
                        inner.counters.remove(&key);
                    }
                },
            }
        }
        Ok(())
    }

    fn incr_by(&self, key: &str, by: u64) -> Result<u64, StoreError> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        let counter = inner.counters.entry_ref(key).or_insert(0);
        *counter = counter
            .checked_add(by)
            .ok_or_else(|| StoreError::Consistency(format!("counter {key} overflowed")))?;
        Ok(*counter)
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        Ok(keys.iter().map(|key| inner.values.get(key).cloned()).collect())
    }

    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<u64>, StoreError> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list[from..to].to_vec(),
            None => Vec::new(),
        })
    }

    fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_and_reads() {
        let backend = MemoryBackend::new();
        let mut batch = WriteBatch::default();
        batch
            .set("v", b"hello".to_vec())
            .push("l", 1)
            .push("l", 2)
            .push("l", 3)
            .add_member("s", "a")
            .add_member("s", "a");
        backend.apply(batch).unwrap();

        assert_eq!(
            backend.get_many(&["v".to_string(), "missing".to_string()]).unwrap(),
            vec![Some(b"hello".to_vec()), None]
        );
        assert_eq!(backend.list_range("l", -2, -1).unwrap(), vec![2, 3]);
        assert_eq!(backend.list_len("l").unwrap(), 3);
        assert_eq!(backend.list_len("nope").unwrap(), 0);
        assert_eq!(backend.members("s").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_incr_by_starts_at_zero() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.incr_by("c", 1).unwrap(), 1);
        assert_eq!(backend.incr_by("c", 5).unwrap(), 6);
    }

    #[test]
    fn test_delete_and_remove_member() {
        let backend = MemoryBackend::new();
        let mut batch = WriteBatch::default();
        batch.push("l", 1).add_member("s", "a").set("v", vec![0]);
        backend.apply(batch).unwrap();
        backend.incr_by("c", 1).unwrap();
        assert_eq!(backend.key_count(), 4);

        let mut batch = WriteBatch::default();
        batch
            .delete_list("l")
            .delete_value("v")
            .delete_counter("c")
            .remove_member("s", "a")
            .remove_member("absent", "a");
        backend.apply(batch).unwrap();
        assert_eq!(backend.key_count(), 0);
    }

    #[test]
    fn test_delete_only_touches_its_structure() {
        let backend = MemoryBackend::new();
        let mut batch = WriteBatch::default();
        batch.set("k", vec![1]).push("k", 4).add_member("k", "a");
        backend.apply(batch).unwrap();
        backend.incr_by("k", 2).unwrap();

        let mut batch = WriteBatch::default();
        batch.delete_counter("k");
        backend.apply(batch).unwrap();

        assert_eq!(backend.get_many(&["k".to_string()]).unwrap(), vec![Some(vec![1])]);
        assert_eq!(backend.list_range("k", 0, -1).unwrap(), vec![4]);
        assert_eq!(backend.members("k").unwrap(), vec!["a".to_string()]);
        assert_eq!(backend.incr_by("k", 1).unwrap(), 1);
    }
}
