// src/locks.rs
// Per-chat mutexes serializing read-modify-write cycles on chat state

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as MetaMutex;
use tokio::sync::Mutex;

/// Maps each chat id to the mutex serializing its mutations. Entries are
/// materialized lazily under the meta-mutex and live for the process
/// lifetime. Handlers hold at most one chat lock at a time.
#[derive(Default)]
pub struct ChatLocks {
    inner: MetaMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the mutex for a chat. The meta-mutex is held only for
    /// the map lookup, never across an await.
    pub fn chat(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(chat_id).or_default().clone()
    }
}
