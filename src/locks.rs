use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

type Key = (String, String);

/// One async mutex per `(student_id, knowledge_point_id)`.
///
/// Holders of different keys never wait on each other. Entries are dropped
/// once the last holder releases them.
#[derive(Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, student_id: &str, knowledge_point_id: &str) -> KeyGuard<'_> {
        let key = (student_id.to_string(), knowledge_point_id.to_string());
        let mutex = {
            let mut entries = self.entries.lock();
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn active_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.owner.entries.lock();
        if entries.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            entries.remove(&self.key);
        }
    }
}
