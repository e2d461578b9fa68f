// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hashbrown::HashMap;

use crate::store::IncomingLog;

/// Log lines grouped by path, in arrival order.
pub type PendingLogs = HashMap<String, Vec<IncomingLog>>;

/// Double buffer between the receive loop and the flusher, so receiving a
/// datagram never waits on storage.
#[derive(Debug, Default)]
pub struct LogBuffer {
    buffers: [Mutex<PendingLogs>; 2],
    active_index: AtomicUsize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, incoming: IncomingLog) {
        loop {
            let index = self.active_index.load(Ordering::Acquire);
            #[allow(clippy::expect_used)]
            let mut pending = self.buffers[index].lock().expect("lock poisoned");
            // A swap may have happened while waiting for the lock; the swapped
            // out buffer is being drained and must not receive new lines.
            if self.active_index.load(Ordering::Acquire) != index {
                continue;
            }
            pending
                .entry_ref(incoming.log.path.as_str())
                .or_default()
                .push(incoming);
            return;
        }
    }

    /// Makes the other buffer active and drains the one that was.
    pub fn swap(&self) -> PendingLogs {
        let old_index = self.active_index.fetch_xor(1, Ordering::AcqRel);
        #[allow(clippy::expect_used)]
        let mut pending = self.buffers[old_index].lock().expect("lock poisoned");
        std::mem::take(&mut *pending)
    }

    /// Number of lines waiting in the active buffer.
    pub fn pending(&self) -> usize {
        let index = self.active_index.load(Ordering::Acquire);
        #[allow(clippy::expect_used)]
        let pending = self.buffers[index].lock().expect("lock poisoned");
        pending.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::{Level, LogMessage};
    use std::sync::Arc;

    fn incoming(path: &str, msg: &str) -> IncomingLog {
        LogMessage::new(path, "test", Level::INFO, msg).into()
    }

    #[test]
    fn test_double_buffer_switching() {
        let buffer = LogBuffer::new();
        buffer.push(incoming("a", "1"));
        buffer.push(incoming("b", "2"));
        buffer.push(incoming("a", "3"));
        assert_eq!(buffer.pending(), 3);

        let drained = buffer.swap();
        assert_eq!(drained.len(), 2);
        let msgs: Vec<&str> = drained["a"].iter().map(|l| l.log.msg.as_str()).collect();
        assert_eq!(msgs, vec!["1", "3"]);
        assert_eq!(buffer.pending(), 0);

        buffer.push(incoming("a", "4"));
        assert_eq!(buffer.pending(), 1);
        assert!(buffer.swap().contains_key("a"));
        assert!(buffer.swap().is_empty());
    }

    #[test]
    fn test_concurrent_operations() {
        use std::thread;
        use std::time::Duration;

        let buffer = Arc::new(LogBuffer::new());

        let buffer_push = Arc::clone(&buffer);
        let push_handle = thread::spawn(move || {
            for i in 0..100 {
                buffer_push.push(incoming("p", &i.to_string()));
                thread::sleep(Duration::from_micros(10));
            }
        });

        let buffer_swap = Arc::clone(&buffer);
        let swap_handle = thread::spawn(move || {
            let mut drained = Vec::new();
            for _ in 0..5 {
                thread::sleep(Duration::from_millis(5));
                drained.extend(buffer_swap.swap().remove("p").unwrap_or_default());
            }
            drained
        });

        push_handle.join().unwrap();
        let mut drained = swap_handle.join().unwrap();
        drained.extend(buffer.swap().remove("p").unwrap_or_default());
        drained.extend(buffer.swap().remove("p").unwrap_or_default());

        // nothing lost and nothing reordered
        let msgs: Vec<String> = drained.into_iter().map(|l| l.log.msg).collect();
        let expected: Vec<String> = (0..100).map(|i: i32| i.to_string()).collect();
        assert_eq!(msgs, expected);
    }
}
