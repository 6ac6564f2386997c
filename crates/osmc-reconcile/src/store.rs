//! Storage capability consumed by the engine.
//!
//! The engine never reaches for a global handle: callers pass a
//! `&dyn ChangesetStore`. Writes are compare-and-swap on [`Revision`] so two
//! reconciliations of the same changeset id cannot lose an update.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use osmc_schemas::{ChangesetRecord, HistoryEntry, Revision, StoredChangeset};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another writer created the id first.
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The stored revision moved since it was read.
    Conflict,
}

#[async_trait::async_trait]
pub trait ChangesetStore: Send + Sync {
    async fn find(&self, changeset_id: i64) -> Result<Option<StoredChangeset>>;

    /// Insert a new changeset with empty history.
    async fn create(&self, record: &ChangesetRecord) -> Result<CreateOutcome>;

    /// Replace the authoritative fields with `record` and append `entry` to
    /// history, only if the stored revision still equals `expected`.
    async fn update(
        &self,
        record: &ChangesetRecord,
        entry: &HistoryEntry,
        expected: Revision,
    ) -> Result<UpdateOutcome>;
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<i64, StoredChangeset>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create/update calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, changeset_id: i64) -> Option<StoredChangeset> {
        self.rows
            .lock()
            .ok()
            .and_then(|rows| rows.get(&changeset_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, StoredChangeset>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl ChangesetStore for MemoryStore {
    async fn find(&self, changeset_id: i64) -> Result<Option<StoredChangeset>> {
        Ok(self.lock()?.get(&changeset_id).cloned())
    }

    async fn create(&self, record: &ChangesetRecord) -> Result<CreateOutcome> {
        let mut rows = self.lock()?;
        if rows.contains_key(&record.changeset_id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        rows.insert(record.changeset_id, StoredChangeset::new(record.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn update(
        &self,
        record: &ChangesetRecord,
        entry: &HistoryEntry,
        expected: Revision,
    ) -> Result<UpdateOutcome> {
        let mut rows = self.lock()?;
        let Some(stored) = rows.get_mut(&record.changeset_id) else {
            return Ok(UpdateOutcome::Conflict);
        };
        if stored.revision() != expected {
            return Ok(UpdateOutcome::Conflict);
        }
        stored.record = record.clone();
        stored.history.push(entry.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(UpdateOutcome::Applied)
    }
}
