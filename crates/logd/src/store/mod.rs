// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only log store.
//!
//! Every log line gets a sequence id that increases monotonically within its
//! path. The entry, the path's sequence list and the logger-name and level
//! lists are published in one atomic batch, so any id a reader finds in a list
//! points at an entry that can be read. Sequence lists are in arrival order,
//! which is also recency order: the newest entries are always at the tail.
//!
//! Key layout, with `prefix` defaulting to `logd`:
//!
//! ```text
//! <prefix>:paths                         set of known paths
//! <prefix>:log:<path>                    list of ids (arrival order)
//! <prefix>:log:<path>:<id>               encoded stored entry
//! <prefix>:log:<path>:names              set of logger names
//! <prefix>:log:<path>:name:<name>        list of ids for that logger
//! <prefix>:log:<path>:level:<level>      list of ids for that level
//! <prefix>:log:<path>:next               next sequence id
//! ```
//!
//! `<path>` and `<name>` are escaped (`%` as `%25`, `:` as `%3A`) so a path
//! or logger name can never reach into the keys of another path.

pub mod backend;
pub mod memory;
pub mod sled_backend;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::envelope::{decode_entry, encode_entry, Level, LogMessage, StoredEntry};
use crate::errors::StoreError;

pub use backend::{Backend, Op, Structure, WriteBatch};
pub use memory::MemoryBackend;
pub use sled_backend::SledBackend;

/// Default prefix of every storage key.
pub const DEFAULT_PREFIX: &str = "logd";

// entries read per round trip while purging
const PURGE_CHUNK: usize = 1_000;

/// A log line waiting to be appended, with the address it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingLog {
    pub log: LogMessage,
    pub ip: Option<String>,
}

impl From<LogMessage> for IncomingLog {
    fn from(log: LogMessage) -> Self {
        Self { log, ip: None }
    }
}

/// Builds storage keys under a prefix.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn paths(&self) -> String {
        format!("{}:paths", self.prefix)
    }

    pub fn log(&self, path: &str) -> String {
        format!("{}:log:{}", self.prefix, segment(path))
    }

    pub fn entry(&self, path: &str, id: u64) -> String {
        format!("{}:log:{}:{}", self.prefix, segment(path), id)
    }

    pub fn names(&self, path: &str) -> String {
        format!("{}:log:{}:names", self.prefix, segment(path))
    }

    pub fn name(&self, path: &str, name: &str) -> String {
        format!(
            "{}:log:{}:name:{}",
            self.prefix,
            segment(path),
            segment(name)
        )
    }

    pub fn level(&self, path: &str, level: Level) -> String {
        format!("{}:log:{}:level:{}", self.prefix, segment(path), level)
    }

    pub fn next(&self, path: &str) -> String {
        format!("{}:log:{}:next", self.prefix, segment(path))
    }
}

/// Escapes a key segment so it contains no `:`.
fn segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains(&[':', '%'][..]) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}

/// The log store, generic over where the data lives.
pub struct LogStore<B> {
    backend: B,
    keys: Keys,
    // Serializes id assignment per path; different paths never contend.
    path_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<B: Backend> LogStore<B> {
    pub fn new(backend: B, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            keys: Keys::new(prefix),
            path_locks: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    fn path_lock(&self, path: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.path_locks.get(path) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.path_locks.entry(path.to_string()).or_default().value())
    }

    /// Appends one log line to its path and returns the assigned sequence id.
    pub fn append(&self, incoming: IncomingLog) -> Result<u64, StoreError> {
        let path = incoming.log.path.clone();
        let ids = self.append_batch(&path, vec![incoming])?;
        ids.first().copied().ok_or_else(|| {
            StoreError::Consistency(format!("no sequence id assigned on {path}"))
        })
    }

    /// Appends lines to `path` in order and returns their sequence ids.
    ///
    /// Ids are reserved first, then every entry and index update is published
    /// in one batch. A failure between the two leaves a gap in the sequence,
    /// never an id without an entry.
    pub fn append_batch(&self, path: &str, lines: Vec<IncomingLog>) -> Result<Vec<u64>, StoreError> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.path_lock(path);
        #[allow(clippy::expect_used)]
        let _guard = lock.lock().expect("lock poisoned");

        let count = lines.len() as u64;
        let first = self.backend.incr_by(&self.keys.next(path), count)? - count;

        let log_key = self.keys.log(path);
        let names_key = self.keys.names(path);
        let mut batch = WriteBatch::default();
        batch.add_member(self.keys.paths(), path);

        let mut ids = Vec::with_capacity(lines.len());
        for (id, incoming) in (first..).zip(lines) {
            let entry = StoredEntry {
                id,
                ip: incoming.ip,
                log: incoming.log,
            };
            batch
                .set(self.keys.entry(path, id), encode_entry(&entry)?)
                .push(log_key.as_str(), id)
                .add_member(names_key.as_str(), entry.log.name.as_str())
                .push(self.keys.name(path, &entry.log.name), id)
                .push(self.keys.level(path, entry.log.level), id);
            ids.push(id);
        }

        self.backend.apply(batch)?;
        debug!("Appended {} entries to {}", ids.len(), path);
        Ok(ids)
    }

    /// Removes a path and every entry and index that refers to it.
    ///
    /// Purging a path that does not exist is a no-op.
    pub fn purge(&self, path: &str) -> Result<(), StoreError> {
        let lock = self.path_lock(path);
        #[allow(clippy::expect_used)]
        let guard = lock.lock().expect("lock poisoned");

        let ids = self.backend.list_range(&self.keys.log(path), 0, -1)?;
        let names = self.backend.members(&self.keys.names(path))?;

        let mut levels: BTreeSet<Level> = Level::STANDARD.into_iter().collect();
        let entry_keys: Vec<String> = ids.iter().map(|id| self.keys.entry(path, *id)).collect();
        for chunk in entry_keys.chunks(PURGE_CHUNK) {
            for value in self.backend.get_many(chunk)?.into_iter().flatten() {
                match decode_entry(&value) {
                    Ok(entry) => {
                        levels.insert(entry.log.level);
                    }
                    Err(e) => warn!("Undecodable entry while purging {}: {}", path, e),
                }
            }
        }

        let mut batch = WriteBatch::default();
        batch.remove_member(self.keys.paths(), path);
        for key in entry_keys {
            batch.delete_value(key);
        }
        for name in &names {
            batch.delete_list(self.keys.name(path, name));
        }
        for level in levels {
            batch.delete_list(self.keys.level(path, level));
        }
        batch
            .delete_list(self.keys.log(path))
            .delete_set(self.keys.names(path))
            .delete_counter(self.keys.next(path));

        self.backend.apply(batch)?;
        drop(guard);
        drop(lock);
        self.release_path_lock(path);
        debug!("Purged {} entries from {}", ids.len(), path);
        Ok(())
    }

    /// Forgets the lock of a path nobody else holds or waits on, so the lock
    /// map stays bounded by the number of live paths.
    fn release_path_lock(&self, path: &str) {
        // Only the map's reference may remain. Clones are taken under the
        // shard lock that `remove_if` holds, so none can appear meanwhile.
        self.path_locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Every registered path, sorted.
    pub fn paths(&self) -> Result<Vec<String>, StoreError> {
        let mut paths = self.backend.members(&self.keys.paths())?;
        paths.sort();
        Ok(paths)
    }

    /// Number of entries indexed for `path`.
    pub fn len(&self, path: &str) -> Result<u64, StoreError> {
        self.backend.list_len(&self.keys.log(path))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.backend.flush()
    }
}
