// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key/value backend abstraction for the log store.
//!
//! The store only needs a handful of data structures: opaque values, ordered
//! lists of sequence ids, string sets and counters. Writes are grouped in a
//! [`WriteBatch`] which a backend must apply atomically.

use crate::errors::StoreError;

/// The kind of data held under a key. Each kind lives in its own namespace,
/// so a value and a list may share a key without touching each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Value,
    List,
    Set,
    Counter,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set { key: String, value: Vec<u8> },
    Push { key: String, id: u64 },
    AddMember { key: String, member: String },
    RemoveMember { key: String, member: String },
    /// Removes the structure of the given kind stored under the key.
    Delete { key: String, structure: Structure },
}

/// Writes that become visible together or not at all.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Set {
            key: key.into(),
            value,
        });
        self
    }

    pub fn push(&mut self, key: impl Into<String>, id: u64) -> &mut Self {
        self.ops.push(Op::Push { key: key.into(), id });
        self
    }

    pub fn add_member(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::AddMember {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn remove_member(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
    ) -> &mut Self {
        self.ops.push(Op::RemoveMember {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>, structure: Structure) -> &mut Self {
        self.ops.push(Op::Delete {
            key: key.into(),
            structure,
        });
        self
    }

    pub fn delete_value(&mut self, key: impl Into<String>) -> &mut Self {
        self.delete(key, Structure::Value)
    }

    pub fn delete_list(&mut self, key: impl Into<String>) -> &mut Self {
        self.delete(key, Structure::List)
    }

    pub fn delete_set(&mut self, key: impl Into<String>) -> &mut Self {
        self.delete(key, Structure::Set)
    }

    pub fn delete_counter(&mut self, key: impl Into<String>) -> &mut Self {
        self.delete(key, Structure::Counter)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// Storage operations the log store is written against.
pub trait Backend: Send + Sync {
    /// Applies every operation of the batch atomically.
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Atomically adds `by` to the counter at `key` (missing counters start at
    /// zero) and returns the new value.
    fn incr_by(&self, key: &str, by: u64) -> Result<u64, StoreError>;

    /// Fetches several values in one call; the result is aligned with `keys`.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Returns list items between `start` and `stop` inclusive. Negative
    /// indexes count from the end, so `(-10, -1)` is the last ten items.
    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<u64>, StoreError>;

    fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Makes previously applied batches durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Resolves inclusive, possibly negative list bounds into a half-open range
/// over a list of `len` items. Returns `None` when the range is empty.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).unwrap_or(isize::MAX);
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    // both bounds are non-negative here
    Some((start as usize, stop as usize + 1))
}
