use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::launcher::ProcessHandle;
use crate::types::{ExecutionStatus, ExecutionSummary};

// ---------------------------------------------------------------------------
// ExecutionEntry
// ---------------------------------------------------------------------------

/// A live execution. Exclusively owns its process handle.
#[derive(Debug)]
pub struct ExecutionEntry {
    pub id: Uuid,
    pub working_dir: PathBuf,
    pub command: String,
    pub created_at: DateTime<Utc>,
    handle: ProcessHandle,
    timer: Option<AbortHandle>,
    /// Concurrency slot, released when the entry is dropped.
    slot: Option<OwnedSemaphorePermit>,
}

impl ExecutionEntry {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Status computed from process liveness right now.
    pub fn status(&self) -> ExecutionStatus {
        if self.handle.is_alive() {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Stopped
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            status: self.status(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            created_at: self.created_at,
            pid: self.handle.pid(),
        }
    }

    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    /// Detach the pending timeout task, if any.
    pub fn take_timer(&mut self) -> Option<AbortHandle> {
        self.timer.take()
    }
}

// ---------------------------------------------------------------------------
// ExecutionRegistry
// ---------------------------------------------------------------------------

/// Concurrent map from execution id to live entry.
///
/// Removal is the synchronisation point for teardown: whichever caller gets
/// the entry back from [`remove`](Self::remove) owns the teardown, everyone
/// else sees `None`. Never hold a [`Ref`] across an `.await`.
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    entries: DashMap<Uuid, ExecutionEntry>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly launched process under a new random id.
    pub fn register(&self, working_dir: PathBuf, command: impl Into<String>, handle: ProcessHandle) -> Uuid {
        self.register_with_slot(working_dir, command, handle, None)
    }

    /// Like [`register`](Self::register), holding `slot` for the entry's lifetime.
    pub fn register_with_slot(
        &self,
        working_dir: PathBuf,
        command: impl Into<String>,
        handle: ProcessHandle,
        slot: Option<OwnedSemaphorePermit>,
    ) -> Uuid {
        let mut id = Uuid::new_v4();
        // A v4 collision is not expected; re-rolling keeps ids unique anyway.
        while self.entries.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let entry = ExecutionEntry {
            id,
            working_dir,
            command: command.into(),
            created_at: handle.started_at(),
            handle,
            timer: None,
            slot,
        };
        self.entries.insert(id, entry);
        id
    }

    /// Store the timeout task for `id`. Returns `false` when the entry is
    /// already gone, in which case the caller should abort the task itself.
    pub fn attach_timer(&self, id: &Uuid, timer: AbortHandle) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.timer = Some(timer);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Ref<'_, Uuid, ExecutionEntry>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&self, id: &Uuid) -> Option<ExecutionEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Point-in-time `(id, status)` pairs.
    pub fn list(&self) -> Vec<(Uuid, ExecutionStatus)> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.status()))
            .collect()
    }

    pub fn summaries(&self) -> Vec<ExecutionSummary> {
        let mut out: Vec<ExecutionSummary> = self.entries.iter().map(|e| e.summary()).collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
