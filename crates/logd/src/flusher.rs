// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::{debug, error};

use crate::buffer::{LogBuffer, PendingLogs};
use crate::store::{Backend, LogStore};

/// Moves buffered log lines into the store.
pub struct Flusher<B> {
    buffer: Arc<LogBuffer>,
    store: Arc<LogStore<B>>,
}

impl<B> Clone for Flusher<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            store: Arc::clone(&self.store),
        }
    }
}

pub struct FlusherConfig<B> {
    pub buffer: Arc<LogBuffer>,
    pub store: Arc<LogStore<B>>,
}

impl<B: Backend + 'static> Flusher<B> {
    pub fn new(config: FlusherConfig<B>) -> Self {
        Flusher {
            buffer: config.buffer,
            store: config.store,
        }
    }

    /// Stores everything received since the previous flush and returns how
    /// many lines made it into the store.
    pub async fn flush(&self) -> usize {
        let pending = self.buffer.swap();
        if pending.is_empty() {
            return 0;
        }

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store_pending(&store, pending)).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to flush log lines: {}", e);
                0
            }
        }
    }
}

/// Appends each path's lines as one batch. A path that fails to store is
/// logged and skipped; the other paths are still stored.
fn store_pending<B: Backend>(store: &LogStore<B>, pending: PendingLogs) -> usize {
    let mut stored = 0;
    for (path, lines) in pending {
        let count = lines.len();
        match store.append_batch(&path, lines) {
            Ok(ids) => stored += ids.len(),
            Err(e) => error!("Failed to store {} lines for {}: {}", count, path, e),
        }
    }
    debug!("Flushed {} log lines", stored);
    stored
}
