// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read path over the log store.
//!
//! Sequence lists are already in recency order, so the newest `limit` entries
//! of a path are the tail of its list. Their values are fetched with a single
//! `get_many` call and returned newest first.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::envelope::{decode_entry, Level, StoredEntry};
use crate::errors::StoreError;
use crate::store::{Backend, LogStore};

/// Number of entries returned when the caller does not ask for a limit.
pub const DEFAULT_LIMIT: usize = 50;

/// Summary of one log path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFileInfo {
    pub path: String,
    pub length: u64,
}

/// Parameters of a [`QueryEngine::recent`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentQuery {
    pub path: String,
    pub limit: usize,
    pub name: Option<String>,
    pub level: Option<Level>,
}

impl RecentQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            limit: DEFAULT_LIMIT,
            name: None,
            level: None,
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    fn is_filtered(&self) -> bool {
        self.name.is_some() || self.level.is_some()
    }
}

pub struct QueryEngine<B> {
    store: Arc<LogStore<B>>,
}

impl<B> Clone for QueryEngine<B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<B: Backend> QueryEngine<B> {
    pub fn new(store: Arc<LogStore<B>>) -> Self {
        Self { store }
    }

    /// Every known path with its entry count, sorted by path.
    pub fn server_info(&self) -> Result<Vec<LogFileInfo>, StoreError> {
        self.store
            .paths()?
            .into_iter()
            .map(|path| {
                let length = self.store.len(&path)?;
                Ok(LogFileInfo { path, length })
            })
            .collect()
    }

    /// [`Self::server_info`] as a path → count map.
    pub fn server_info_map(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        Ok(self
            .server_info()?
            .into_iter()
            .map(|info| (info.path, info.length))
            .collect())
    }

    /// Logger names seen on a path, sorted.
    pub fn names(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let mut names = self
            .store
            .backend()
            .members(&self.store.keys().names(path))?;
        names.sort();
        Ok(names)
    }

    /// The newest entries of a path, newest first, at most `query.limit` long.
    ///
    /// Unknown paths give an empty result. Ids whose entry cannot be read are
    /// skipped.
    pub fn recent(&self, query: &RecentQuery) -> Result<Vec<StoredEntry>, StoreError> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let ids = if query.is_filtered() {
            self.filtered_ids(query)?
        } else {
            let tail = isize::try_from(query.limit).unwrap_or(isize::MAX);
            self.store
                .backend()
                .list_range(&self.store.keys().log(&query.path), -tail, -1)?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys = self.store.keys();
        let entry_keys: Vec<String> = ids.iter().map(|id| keys.entry(&query.path, *id)).collect();
        let values = self.store.backend().get_many(&entry_keys)?;

        let mut entries = Vec::with_capacity(values.len());
        for (key, value) in entry_keys.iter().zip(values).rev() {
            let Some(value) = value else {
                debug!("Skipping {}: indexed but not stored", key);
                continue;
            };
            match decode_entry(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping {}: {}", key, e),
            }
        }
        Ok(entries)
    }

    /// Ids in the intersection of the path's sequence list and the requested
    /// name/level lists, in arrival order, truncated to the newest `limit`.
    fn filtered_ids(&self, query: &RecentQuery) -> Result<Vec<u64>, StoreError> {
        let backend = self.store.backend();
        let keys = self.store.keys();
        let path = &query.path;

        let mut filters = Vec::with_capacity(2);
        if let Some(name) = &query.name {
            filters.push(keys.name(path, name));
        }
        if let Some(level) = query.level {
            filters.push(keys.level(path, level));
        }

        let mut ids = backend.list_range(&keys.log(path), 0, -1)?;
        for filter in filters {
            if ids.is_empty() {
                break;
            }
            let allowed: HashSet<u64> = backend.list_range(&filter, 0, -1)?.into_iter().collect();
            ids.retain(|id| allowed.contains(id));
        }

        let skip = ids.len().saturating_sub(query.limit);
        Ok(ids.split_off(skip))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::LogMessage;
    use crate::store::{IncomingLog, MemoryBackend, WriteBatch, DEFAULT_PREFIX};

    fn engine() -> (Arc<LogStore<MemoryBackend>>, QueryEngine<MemoryBackend>) {
        let store = Arc::new(LogStore::new(MemoryBackend::new(), DEFAULT_PREFIX));
        (Arc::clone(&store), QueryEngine::new(store))
    }

    fn append(store: &LogStore<MemoryBackend>, path: &str, name: &str, level: Level, msg: &str) {
        store
            .append(IncomingLog::from(LogMessage::new(path, name, level, msg)))
            .unwrap();
    }

    fn messages(entries: &[StoredEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.log.msg.as_str()).collect()
    }

    #[test]
    fn test_recent_newest_first() {
        let (store, engine) = engine();
        append(&store, "x", "a", Level(10), "m1");
        append(&store, "x", "a", Level(20), "m2");

        let entries = engine.recent(&RecentQuery::new("x")).unwrap();
        assert_eq!(messages(&entries), vec!["m2", "m1"]);
        assert_eq!(
            engine.server_info_map().unwrap(),
            BTreeMap::from([("x".to_string(), 2)])
        );
    }

    #[test]
    fn test_recent_respects_limit() {
        let (store, engine) = engine();
        for i in 0..20 {
            append(&store, "x", "a", Level::INFO, &format!("m{i}"));
        }

        let entries = engine.recent(&RecentQuery::new("x").limit(5)).unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![19, 18, 17, 16, 15]);

        assert_eq!(engine.recent(&RecentQuery::new("x").limit(500)).unwrap().len(), 20);
        assert!(engine.recent(&RecentQuery::new("x").limit(0)).unwrap().is_empty());
        assert_eq!(
            engine.recent(&RecentQuery::new("x").limit(usize::MAX)).unwrap().len(),
            20
        );
    }

    #[test]
    fn test_unknown_path_is_empty() {
        let (_store, engine) = engine();
        assert!(engine.recent(&RecentQuery::new("nope")).unwrap().is_empty());
        assert!(engine
            .recent(&RecentQuery::new("nope").name("a").level(Level::INFO))
            .unwrap()
            .is_empty());
        assert!(engine.server_info().unwrap().is_empty());
        assert!(engine.names("nope").unwrap().is_empty());
    }

    #[test]
    fn test_filters_keep_recency_order() {
        let (store, engine) = engine();
        append(&store, "x", "a", Level::INFO, "a1");
        append(&store, "x", "b", Level::ERROR, "b1");
        append(&store, "x", "a", Level::ERROR, "a2");
        append(&store, "x", "a", Level::INFO, "a3");
        append(&store, "x", "b", Level::INFO, "b2");

        let by_name = engine.recent(&RecentQuery::new("x").name("a")).unwrap();
        assert_eq!(messages(&by_name), vec!["a3", "a2", "a1"]);

        let by_level = engine
            .recent(&RecentQuery::new("x").level(Level::ERROR))
            .unwrap();
        assert_eq!(messages(&by_level), vec!["a2", "b1"]);

        let both = engine
            .recent(&RecentQuery::new("x").name("a").level(Level::INFO).limit(1))
            .unwrap();
        assert_eq!(messages(&both), vec!["a3"]);

        assert!(engine
            .recent(&RecentQuery::new("x").name("nobody"))
            .unwrap()
            .is_empty());
        assert_eq!(engine.names("x").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_server_info_sorted() {
        let (store, engine) = engine();
        append(&store, "zeta", "a", Level::INFO, "z");
        append(&store, "alpha", "a", Level::INFO, "a");
        append(&store, "alpha", "a", Level::INFO, "b");

        assert_eq!(
            engine.server_info().unwrap(),
            vec![
                LogFileInfo {
                    path: "alpha".to_string(),
                    length: 2
                },
                LogFileInfo {
                    path: "zeta".to_string(),
                    length: 1
                },
            ]
        );
    }

    #[test]
    fn test_missing_entries_are_skipped() {
        let (store, engine) = engine();
        append(&store, "x", "a", Level::INFO, "m0");

        // an id published without its entry, as a crash mid-write could leave
        let mut batch = WriteBatch::default();
        batch.push(store.keys().log("x"), 41);
        store.backend().apply(batch).unwrap();
        append(&store, "x", "a", Level::INFO, "m1");

        let entries = engine.recent(&RecentQuery::new("x")).unwrap();
        assert_eq!(messages(&entries), vec!["m1", "m0"]);
    }

    #[test]
    fn test_purged_path_disappears() {
        let (store, engine) = engine();
        append(&store, "x", "a", Level::INFO, "m0");
        store.purge("x").unwrap();
        assert!(engine.recent(&RecentQuery::new("x")).unwrap().is_empty());
        assert!(engine.server_info().unwrap().is_empty());
    }

    #[test]
    fn test_paths_with_colons_do_not_leak_into_other_paths() {
        let (store, engine) = engine();
        append(&store, "x", "b", Level::INFO, "x-from-b");
        append(&store, "x:name:a", "c", Level::INFO, "elsewhere");

        assert!(engine
            .recent(&RecentQuery::new("x").name("a"))
            .unwrap()
            .is_empty());
        assert_eq!(engine.names("x").unwrap(), vec!["b"]);
        assert_eq!(
            messages(&engine.recent(&RecentQuery::new("x:name:a")).unwrap()),
            vec!["elsewhere"]
        );
    }

    #[test]
    fn test_purging_colon_path_keeps_sibling_ids() {
        let (store, engine) = engine();
        append(&store, "x", "a", Level::INFO, "m0");
        append(&store, "x", "a", Level::INFO, "m1");
        append(&store, "x:next", "a", Level::INFO, "other");

        store.purge("x:next").unwrap();
        append(&store, "x", "a", Level::INFO, "m2");

        let entries = engine.recent(&RecentQuery::new("x")).unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
        assert_eq!(messages(&entries), vec!["m2", "m1", "m0"]);
        assert_eq!(engine.server_info_map().unwrap().len(), 1);
    }
}
