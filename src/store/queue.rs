//! Bounded in-memory FIFO of queued records

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// A record together with its store-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord<R> {
    pub id: u64,
    pub record: R,
}

/// Ring buffer that evicts its oldest record when full
#[derive(Debug, Clone)]
pub struct RecordQueue<R> {
    records: VecDeque<QueuedRecord<R>>,
    capacity: usize,
    next_id: u64,
}

impl<R: Clone> RecordQueue<R> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id the next pushed record will get
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Append a new record; returns its id and the id of the evicted record,
    /// if the queue was full
    pub fn push(&mut self, record: R) -> (u64, Option<u64>) {
        let id = self.next_id;
        self.next_id += 1;
        let evicted = self.make_room();
        self.records.push_back(QueuedRecord { id, record });
        (id, evicted)
    }

    /// Re-insert a record with a known id (journal replay)
    pub fn restore(&mut self, queued: QueuedRecord<R>) -> Option<u64> {
        if queued.id >= self.next_id {
            self.next_id = queued.id + 1;
        }
        let evicted = self.make_room();
        self.records.push_back(queued);
        evicted
    }

    fn make_room(&mut self) -> Option<u64> {
        if self.records.len() >= self.capacity {
            self.records.pop_front().map(|oldest| oldest.id)
        } else {
            None
        }
    }

    /// Up to `max` oldest records, cloned
    pub fn peek(&self, max: usize) -> Vec<QueuedRecord<R>> {
        self.records.iter().take(max).cloned().collect()
    }

    /// Remove exactly the given ids; unknown ids are ignored
    pub fn remove(&mut self, ids: &[u64]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        let before = self.records.len();
        self.records.retain(|queued| !wanted.contains(&queued.id));
        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRecord<R>> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<R: Clone>(queue: &RecordQueue<R>) -> Vec<u64> {
        queue.iter().map(|q| q.id).collect()
    }

    #[test]
    fn test_push_and_peek_in_order() {
        let mut queue = RecordQueue::new(10);
        for name in ["a", "b", "c"] {
            queue.push(name.to_string());
        }

        let batch = queue.peek(queue.len());
        let names: Vec<_> = batch.iter().map(|q| q.record.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 3, "peek must not mutate");
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let mut queue = RecordQueue::new(2);
        queue.push(1);
        queue.push(2);
        let (id, evicted) = queue.push(3);

        assert_eq!(id, 3);
        assert_eq!(evicted, Some(1));
        assert_eq!(ids(&queue), vec![2, 3]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut queue = RecordQueue::new(10);
        for i in 0..5 {
            queue.push(i);
        }

        assert_eq!(queue.remove(&[2, 4]), 2);
        let after_once = ids(&queue);
        assert_eq!(queue.remove(&[2, 4]), 0);
        assert_eq!(ids(&queue), after_once);
        assert_eq!(after_once, vec![1, 3, 5]);
    }

    #[test]
    fn test_restore_advances_next_id() {
        let mut queue = RecordQueue::new(10);
        queue.restore(QueuedRecord { id: 41, record: "x" });
        let (id, _) = queue.push("y");
        assert_eq!(id, 42);
    }
}
