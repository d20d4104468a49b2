//! 🪣 Record buffer — collects shaped records until there are enough to be worth a trip.
//!
//! The buffer never writes anything itself. It answers one question per push:
//! "is it time?" When it is, it hands back everything it held and starts over empty.
//! Whether the write that follows succeeds is none of its business; it's already empty.

use crate::record::Record;

/// 📦 A record waiting for its batch, remembering which source it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<V> {
    pub source_name: String,
    pub record: Record<V>,
}

#[derive(Debug)]
pub struct RecordBuffer<V> {
    capacity: usize,
    pending: Vec<Pending<V>>,
}

impl<V> RecordBuffer<V> {
    /// 🏗️ `capacity` is the batch size N. Zero is treated as one, because a batch of
    /// nothing would never fill.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// ➕ Append a record. Returns the full batch (and leaves the buffer empty) when this
    /// push made the count reach capacity.
    pub fn push(&mut self, source_name: &str, record: Record<V>) -> Option<Vec<Pending<V>>> {
        self.pending.push(Pending {
            source_name: source_name.to_string(),
            record,
        });
        if self.pending.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// 🧺 Take whatever is pending, leaving an empty buffer behind.
    pub fn take(&mut self) -> Vec<Pending<V>> {
        std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity))
    }
}

/// 🗂️ Split a batch into runs per key, in order of first appearance, each run keeping
/// arrival order. One key in, one group out, so the common case stays a single batch.
pub fn group_by_key<V, K, F>(batch: Vec<Pending<V>>, mut key_of: F) -> Vec<(K, Vec<Record<V>>)>
where
    K: PartialEq,
    F: FnMut(&Pending<V>) -> K,
{
    let mut groups: Vec<(K, Vec<Record<V>>)> = Vec::new();
    for pending in batch {
        let key = key_of(&pending);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, records)) => records.push(pending.record),
            None => groups.push((key, vec![pending.record])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(n: i64) -> Record<Value> {
        [("n", json!(n))].into_iter().collect()
    }

    #[test]
    fn the_one_where_the_nth_push_hands_over_the_whole_batch() {
        let mut buffer = RecordBuffer::new(3);
        assert!(buffer.push("s", record(1)).is_none());
        assert!(buffer.push("s", record(2)).is_none());

        let batch = buffer.push("s", record(3)).expect("third push fills the batch");
        assert_eq!(batch.len(), 3);
        assert!(buffer.is_empty(), "buffer starts over after handing off");

        assert!(buffer.push("s", record(4)).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn the_one_where_grouping_keeps_first_appearance_order() {
        let batch = vec![
            Pending { source_name: "b".into(), record: record(1) },
            Pending { source_name: "a".into(), record: record(2) },
            Pending { source_name: "b".into(), record: record(3) },
        ];

        let groups = group_by_key(batch, |pending| pending.source_name.clone());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1, vec![record(1), record(3)]);
        assert_eq!(groups[1].0, "a");
        assert_eq!(groups[1].1, vec![record(2)]);
    }
}
