//! Append-only journal backing a record queue
//!
//! ```text
//! Write Path:
//! ┌──────────┐    ┌─────────────────┐    ┌──────────────────────┐
//! │ append / │───►│ one JSON line + │───►│ compact() once the   │
//! │ remove   │    │ fsync           │    │ threshold is crossed │
//! └──────────┘    └─────────────────┘    └──────────────────────┘
//!
//! Read Path (open):
//! ┌──────────────┐    ┌──────────────────────────┐
//! │ read lines   │───►│ apply append/remove in   │───► live queue
//! │ skip garbage │    │ order to a RecordQueue   │
//! └──────────────┘    └──────────────────────────┘
//! ```
//!
//! Compaction rewrites the file atomically with one `append` line per live
//! record, so the file never grows without bound.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TelemetryResult;
use crate::utils::atomic_write_with;

use super::queue::{QueuedRecord, RecordQueue};

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum EntryRef<'a, R> {
    Append { id: u64, record: &'a R },
    Remove { ids: &'a [u64] },
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Entry<R> {
    Append { id: u64, record: R },
    Remove { ids: Vec<u64> },
}

/// JSON-lines journal of queue mutations
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    compact_threshold: usize,
    entries_since_compaction: usize,
}

impl Journal {
    pub fn new<P: AsRef<Path>>(path: P, compact_threshold: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            compact_threshold: compact_threshold.max(1),
            entries_since_compaction: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries_since_compaction(&self) -> usize {
        self.entries_since_compaction
    }

    pub fn should_compact(&self) -> bool {
        self.entries_since_compaction >= self.compact_threshold
    }

    /// Rebuild a queue from the journal
    ///
    /// Lines that fail to parse are skipped so one damaged write cannot
    /// hide the rest of the backlog.
    pub fn replay<R>(&mut self, queue: &mut RecordQueue<R>) -> TelemetryResult<usize>
    where
        R: Clone + DeserializeOwned,
    {
        if !self.path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut applied = 0;

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Entry<R>>(&line) {
                Ok(Entry::Append { id, record }) => {
                    queue.restore(QueuedRecord { id, record });
                    applied += 1;
                }
                Ok(Entry::Remove { ids }) => {
                    queue.remove(&ids);
                    applied += 1;
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_num + 1,
                        error = %e,
                        "Skipping unreadable journal line"
                    );
                }
            }
        }

        self.entries_since_compaction = applied;
        debug!(path = %self.path.display(), entries = applied, "Journal replayed");
        Ok(applied)
    }

    pub fn record_append<R: Serialize>(&mut self, id: u64, record: &R) -> TelemetryResult<()> {
        self.write_entry(&EntryRef::Append { id, record })
    }

    pub fn record_remove(&mut self, ids: &[u64]) -> TelemetryResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.write_entry::<()>(&EntryRef::Remove { ids })
    }

    fn write_entry<R: Serialize>(&mut self, entry: &EntryRef<'_, R>) -> TelemetryResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;

        self.entries_since_compaction += 1;
        Ok(())
    }

    /// Atomically rewrite the journal to hold only the live records
    pub fn compact<R>(&mut self, queue: &RecordQueue<R>) -> TelemetryResult<()>
    where
        R: Clone + Serialize,
    {
        atomic_write_with(&self.path, |file| {
            for queued in queue.iter() {
                let line = serde_json::to_string(&EntryRef::Append {
                    id: queued.id,
                    record: &queued.record,
                })
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                writeln!(file, "{}", line)?;
            }
            Ok(())
        })?;

        debug!(
            path = %self.path.display(),
            live_records = queue.len(),
            dropped_entries = self.entries_since_compaction,
            "Journal compacted"
        );
        self.entries_since_compaction = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal_in(dir: &TempDir, threshold: usize) -> Journal {
        Journal::new(dir.path().join("events.jsonl"), threshold)
    }

    #[test]
    fn test_replay_applies_appends_and_removes() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir, 100);

        journal.record_append(1, &"a".to_string()).unwrap();
        journal.record_append(2, &"b".to_string()).unwrap();
        journal.record_append(3, &"c".to_string()).unwrap();
        journal.record_remove(&[2]).unwrap();

        let mut queue: RecordQueue<String> = RecordQueue::new(10);
        let mut reopened = journal_in(&dir, 100);
        assert_eq!(reopened.replay(&mut queue).unwrap(), 4);

        let live: Vec<_> = queue.iter().map(|q| (q.id, q.record.clone())).collect();
        assert_eq!(live, vec![(1, "a".to_string()), (3, "c".to_string())]);
        assert_eq!(queue.next_id(), 4);
    }

    #[test]
    fn test_replay_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir, 100);
        journal.record_append(1, &7u32).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        journal.record_append(2, &8u32).unwrap();

        let mut queue: RecordQueue<u32> = RecordQueue::new(10);
        journal_in(&dir, 100).replay(&mut queue).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_compact_keeps_only_live_records() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir, 3);
        let mut queue: RecordQueue<u32> = RecordQueue::new(10);

        for value in [10, 20, 30] {
            let (id, _) = queue.push(value);
            journal.record_append(id, &value).unwrap();
        }
        queue.remove(&[1, 2]);
        journal.record_remove(&[1, 2]).unwrap();
        assert!(journal.should_compact());

        journal.compact(&queue).unwrap();
        assert!(!journal.should_compact());

        let content = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(content.lines().count(), 1);

        let mut reloaded: RecordQueue<u32> = RecordQueue::new(10);
        journal_in(&dir, 3).replay(&mut reloaded).unwrap();
        assert_eq!(reloaded.peek(10)[0].record, 30);
    }
}
