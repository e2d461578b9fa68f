// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sled-backed storage for the log store.
//!
//! Each data structure lives in its own tree:
//!
//! - `values`: `key` → bytes
//! - `lists`: `key` → item count (u64 BE), and `key\0<index u64 BE>` → id
//! - `sets`: `key\0<member>` → empty
//! - `counters`: `key` → u64 BE
//!
//! Keeping list items under their own keys makes appends and tail reads cheap
//! no matter how long a log gets. Batches are applied in one multi-tree
//! transaction.

use std::fs;
use std::path::{Path, PathBuf};

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Config as SledConfig, Db, IVec, Transactional, Tree};

use crate::errors::StoreError;
use crate::store::backend::{resolve_range, Backend, Op, Structure, WriteBatch};

const TREE_VALUES: &str = "values";
const TREE_LISTS: &str = "lists";
const TREE_SETS: &str = "sets";
const TREE_COUNTERS: &str = "counters";

const SEPARATOR: u8 = 0;

/// Durable backend persisting to a sled database.
#[derive(Debug, Clone)]
pub struct SledBackend {
    db: Db,
    path: PathBuf,
    values: Tree,
    lists: Tree,
    sets: Tree,
    counters: Tree,
}

impl SledBackend {
    /// Opens (or creates) a store at the provided directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories automatically.
                fs::create_dir_all(parent)?;
            }
        }
        let db = sled_config(&path).open()?;
        Self::from_db(db, path)
    }

    /// Opens a store that is removed when dropped.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Self::from_db(db, PathBuf::new())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, StoreError> {
        Ok(Self {
            values: db.open_tree(TREE_VALUES)?,
            lists: db.open_tree(TREE_LISTS)?,
            sets: db.open_tree(TREE_SETS)?,
            counters: db.open_tree(TREE_COUNTERS)?,
            db,
            path,
        })
    }

    /// Returns the filesystem path backing the store, empty for temporary ones.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys of every member of the set at `key`.
    fn member_keys(&self, key: &str) -> Result<Vec<IVec>, StoreError> {
        let mut keys = Vec::new();
        for result in self.sets.scan_prefix(prefixed(key)).keys() {
            keys.push(result?);
        }
        Ok(keys)
    }
}

fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new()
        .path(path)
        .cache_capacity(64 * 1024 * 1024)
}

/// `key` followed by the separator byte.
fn prefixed(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key.as_bytes());
    out.push(SEPARATOR);
    out
}

fn item_key(key: &str, index: u64) -> Vec<u8> {
    let mut out = prefixed(key);
    out.extend_from_slice(&index.to_be_bytes());
    out
}

fn member_key(key: &str, member: &str) -> Vec<u8> {
    let mut out = prefixed(key);
    out.extend_from_slice(member.as_bytes());
    out
}

fn decode_u64(key: &[u8], bytes: &[u8]) -> Result<u64, String> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| {
            format!(
                "value under {} is not a u64",
                String::from_utf8_lossy(key)
            )
        })
}

fn tx_u64(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<u64, String> {
    match tree.get(key)? {
        Some(bytes) => decode_u64(key, &bytes).map_err(ConflictableTransactionError::Abort),
        None => Ok(0),
    }
}

fn map_tx_error(err: TransactionError<String>) -> StoreError {
    match err {
        TransactionError::Abort(msg) => StoreError::Consistency(msg),
        TransactionError::Storage(err) => StoreError::Db(err),
    }
}

impl Backend for SledBackend {
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.into_ops();

        // Transactions cannot scan, so members of deleted sets are gathered first.
        let mut doomed_members = Vec::new();
        for op in &ops {
            if let Op::Delete {
                key,
                structure: Structure::Set,
            } = op
            {
                doomed_members.extend(self.member_keys(key)?);
            }
        }

        (&self.values, &self.lists, &self.sets, &self.counters)
            .transaction(|(values, lists, sets, counters)| -> ConflictableTransactionResult<(), String> {
                for op in &ops {
                    match op {
                        Op::Set { key, value } => {
                            values.insert(key.as_bytes(), value.as_slice())?;
                        }
                        Op::Push { key, id } => {
                            let len = tx_u64(lists, key.as_bytes())?;
                            lists.insert(item_key(key, len), &id.to_be_bytes()[..])?;
                            lists.insert(key.as_bytes(), &(len + 1).to_be_bytes()[..])?;
                        }
                        Op::AddMember { key, member } => {
                            sets.insert(member_key(key, member), IVec::default())?;
                        }
                        Op::RemoveMember { key, member } => {
                            sets.remove(member_key(key, member))?;
                        }
                        Op::Delete { key, structure } => match structure {
                            Structure::Value => {
                                values.remove(key.as_bytes())?;
                            }
                            Structure::Counter => {
                                counters.remove(key.as_bytes())?;
                            }
                            Structure::List => {
                                let len = tx_u64(lists, key.as_bytes())?;
                                for index in 0..len {
                                    lists.remove(item_key(key, index))?;
                                }
                                lists.remove(key.as_bytes())?;
                            }
                            // members were gathered before the transaction
                            Structure::Set => {}
                        },
                    }
                }
                for member in &doomed_members {
                    sets.remove(member.clone())?;
                }
                Ok(())
            })
            .map_err(map_tx_error)
    }

    fn incr_by(&self, key: &str, by: u64) -> Result<u64, StoreError> {
        self.counters
            .transaction(|counters| -> ConflictableTransactionResult<u64, String> {
                let current = tx_u64(counters, key.as_bytes())?;
                let next = current.checked_add(by).ok_or_else(|| {
                    ConflictableTransactionError::Abort(format!("counter {key} overflowed"))
                })?;
                counters.insert(key.as_bytes(), &next.to_be_bytes()[..])?;
                Ok(next)
            })
            .map_err(map_tx_error)
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        keys.iter()
            .map(|key| {
                Ok(self
                    .values
                    .get(key.as_bytes())?
                    .map(|value| value.as_ref().to_vec()))
            })
            .collect()
    }

    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<u64>, StoreError> {
        let len = self.list_len(key)?;
        let Some((from, to)) = resolve_range(len as usize, start, stop) else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::with_capacity(to - from);
        for result in self
            .lists
            .range(item_key(key, from as u64)..item_key(key, to as u64))
        {
            let (item, value) = result?;
            ids.push(decode_u64(&item, &value).map_err(StoreError::Consistency)?);
        }
        Ok(ids)
    }

    fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        match self.lists.get(key.as_bytes())? {
            Some(bytes) => decode_u64(key.as_bytes(), &bytes).map_err(StoreError::Consistency),
            None => Ok(0),
        }
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefixed(key);
        let mut members = Vec::new();
        for result in self.sets.scan_prefix(&prefix).keys() {
            let member_key = result?;
            members.push(String::from_utf8_lossy(&member_key[prefix.len()..]).into_owned());
        }
        Ok(members)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
