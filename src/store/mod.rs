//! Event and people stores
//!
//! - `RecordStore`: bounded, persisted queue behind a single mutex
//! - `RecordQueue`: the in-memory FIFO with eviction
//! - `Journal`: the JSON-lines file that makes a queue survive restarts
//! - `IdentityArchive`: atomic `identity.json` for the identity state
//!
//! # Layout on disk
//!
//! ```text
//! <data_dir>/<token>/
//!     events.jsonl     append/remove journal of EventStore
//!     people.jsonl     append/remove journal of PeopleStore
//!     identity.json    distinct id, aliases, super properties, ...
//! ```
//!
//! The in-memory queue is authoritative. A failed journal write is logged
//! and the producer carries on.

mod archive;
mod journal;
mod queue;

use std::path::Path;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{EventRecord, ProfileMutation};
use crate::utils::cleanup_temp_files;

pub use archive::{IdentityArchive, IDENTITY_FILE};
pub use journal::Journal;
pub use queue::{QueuedRecord, RecordQueue};

/// File name of the event journal inside a token's state dir
pub const EVENTS_FILE: &str = "events.jsonl";

/// File name of the people journal inside a token's state dir
pub const PEOPLE_FILE: &str = "people.jsonl";

/// Queue of pending event records
pub type EventStore = RecordStore<EventRecord>;

/// Queue of pending profile mutations
pub type PeopleStore = RecordStore<ProfileMutation>;

struct StoreInner<R> {
    queue: RecordQueue<R>,
    journal: Option<Journal>,
}

/// Bounded, optionally persisted FIFO of records
pub struct RecordStore<R> {
    name: &'static str,
    inner: Mutex<StoreInner<R>>,
}

impl<R> RecordStore<R>
where
    R: Clone + Serialize + DeserializeOwned,
{
    /// A store that lives only in memory
    pub fn in_memory(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: Mutex::new(StoreInner {
                queue: RecordQueue::new(capacity),
                journal: None,
            }),
        }
    }

    /// Open (or create) a store backed by `file_name` in `dir`
    ///
    /// The journal is replayed before the store is returned, so the
    /// backlog left by a previous process is immediately visible.
    pub fn open(
        name: &'static str,
        dir: &Path,
        file_name: &str,
        capacity: usize,
        compact_threshold: usize,
    ) -> TelemetryResult<Self> {
        std::fs::create_dir_all(dir)?;
        let cleaned = cleanup_temp_files(dir)?;
        if cleaned > 0 {
            debug!(store = name, cleaned, "Removed leftover temp files");
        }

        let mut queue = RecordQueue::new(capacity);
        let mut journal = Journal::new(dir.join(file_name), compact_threshold);
        journal.replay(&mut queue)?;

        debug!(store = name, records = queue.len(), "Store opened");

        let store = Self {
            name,
            inner: Mutex::new(StoreInner {
                queue,
                journal: Some(journal),
            }),
        };
        Ok(store)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.lock().journal.is_some()
    }

    /// Append a record, evicting the oldest one when full. Never fails.
    pub fn append(&self, record: R) -> u64 {
        let mut inner = self.inner.lock();
        Self::append_locked(self.name, &mut inner, record)
    }

    /// Append several records under one lock acquisition, in order
    pub fn append_all(&self, records: impl IntoIterator<Item = R>) -> Vec<u64> {
        let mut inner = self.inner.lock();
        records
            .into_iter()
            .map(|record| Self::append_locked(self.name, &mut inner, record))
            .collect()
    }

    fn append_locked(name: &'static str, inner: &mut StoreInner<R>, record: R) -> u64 {
        let capacity = inner.queue.capacity();
        let (id, evicted) = inner.queue.push(record);

        if let Some(evicted_id) = evicted {
            warn!(
                store = name,
                evicted_id,
                "{}",
                TelemetryError::StoreCapacityExceeded { store: name, capacity }
            );
        }

        if let Some(journal) = inner.journal.as_mut() {
            let mut result = match evicted {
                Some(evicted_id) => journal.record_remove(&[evicted_id]),
                None => Ok(()),
            };
            if result.is_ok() {
                // the record just pushed sits at the back
                if let Some(queued) = inner.queue.iter().last() {
                    result = journal.record_append(id, &queued.record);
                }
            }
            if let Err(e) = result {
                warn!(store = name, error = %e, "Failed to journal append");
            }
        }

        Self::maybe_compact(name, inner);
        id
    }

    /// Up to `max` oldest records, without removing them
    pub fn peek_batch(&self, max: usize) -> Vec<QueuedRecord<R>> {
        self.inner.lock().queue.peek(max)
    }

    /// Remove exactly `ids`; ids not present are ignored
    pub fn remove(&self, ids: &[u64]) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.queue.remove(ids);
        if removed == 0 {
            return 0;
        }

        if let Some(journal) = inner.journal.as_mut() {
            if let Err(e) = journal.record_remove(ids) {
                warn!(store = self.name, error = %e, "Failed to journal removal");
            }
        }
        Self::maybe_compact(self.name, &mut inner);
        removed
    }

    fn maybe_compact(name: &'static str, inner: &mut StoreInner<R>) {
        let StoreInner { queue, journal } = inner;
        if let Some(journal) = journal.as_mut().filter(|j| j.should_compact()) {
            if let Err(e) = journal.compact(queue) {
                warn!(store = name, error = %e, "Journal compaction failed");
            }
        }
    }

    /// Drop every queued record
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        let StoreInner { queue, journal } = &mut *inner;
        if let Some(journal) = journal.as_mut() {
            if let Err(e) = journal.compact(queue) {
                warn!(store = self.name, error = %e, "Failed to persist cleared store");
            }
        }
    }

    /// Force the on-disk journal into its compact form
    pub fn snapshot(&self) -> TelemetryResult<()> {
        let mut inner = self.inner.lock();
        let StoreInner { queue, journal } = &mut *inner;
        match journal.as_mut() {
            Some(journal) => journal.compact(queue),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Clone of every queued record, oldest first
    pub fn records(&self) -> Vec<R> {
        self.inner
            .lock()
            .queue
            .iter()
            .map(|queued| queued.record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, capacity: usize) -> RecordStore<String> {
        RecordStore::open("events", dir.path(), EVENTS_FILE, capacity, 1000).unwrap()
    }

    #[test]
    fn test_backlog_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir, 10);
            store.append("a".to_string());
            let b = store.append("b".to_string());
            store.append("c".to_string());
            store.remove(&[b]);
        }

        let reopened = open_store(&dir, 10);
        assert_eq!(reopened.records(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_eviction_is_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir, 2);
            for name in ["a", "b", "c"] {
                store.append(name.to_string());
            }
            assert_eq!(store.len(), 2);
        }

        let reopened = open_store(&dir, 2);
        assert_eq!(reopened.records(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_remove_twice_matches_once() {
        let store: RecordStore<u32> = RecordStore::in_memory("people", 10);
        let ids = store.append_all([1, 2, 3]);

        store.remove(&ids[..2]);
        let once = store.records();
        assert_eq!(store.remove(&ids[..2]), 0);
        assert_eq!(store.records(), once);
        assert_eq!(once, vec![3]);
    }

    #[test]
    fn test_clear_is_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir, 10);
            store.append("x".to_string());
            store.clear();
        }
        assert!(open_store(&dir, 10).is_empty());
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("events.tmp"), "partial").unwrap();
        let _store = open_store(&dir, 10);
        assert!(!dir.path().join("events.tmp").exists());
    }
}
