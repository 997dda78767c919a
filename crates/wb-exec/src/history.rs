use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::ExecutionRecord;

/// Bounded store of terminal execution records.
///
/// Entries expire `ttl` after insertion and the least recently inserted entry
/// is evicted once `capacity` is reached. Expiry is applied lazily on read
/// and eagerly by [`prune`](Self::prune).
#[derive(Debug)]
pub struct ResultStore {
    ttl: Duration,
    records: Mutex<LruCache<Uuid, (Instant, ExecutionRecord)>>,
}

impl ResultStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, LruCache<Uuid, (Instant, ExecutionRecord)>> {
        self.records.lock().unwrap_or_else(|e| {
            warn!("result store lock was poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn insert(&self, record: ExecutionRecord) {
        if let Some((evicted, _)) = self.records().push(record.id, (Instant::now(), record)) {
            debug!(%evicted, "result store full, evicted oldest record");
        }
    }

    /// Clone of a retained record, `None` if unknown or expired.
    pub fn get(&self, id: &Uuid) -> Option<ExecutionRecord> {
        let mut records = self.records();
        let expired = match records.peek(id) {
            Some((at, _)) => at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            records.pop(id);
            return None;
        }
        records.peek(id).map(|(_, record)| record.clone())
    }

    /// Drop every expired record; returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut records = self.records();
        let expired: Vec<Uuid> = records
            .iter()
            .filter(|(_, (at, _))| at.elapsed() >= self.ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            records.pop(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
