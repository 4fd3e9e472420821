//! Bounded record of recently dispatched lines

use printkit_core::{MotionModeSnapshot, Position4};
use std::collections::VecDeque;
use std::time::Instant;

/// One dispatched line with the command position around it
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    /// Line text as dispatched
    pub line: String,
    /// Byte offset the line starts at
    pub offset: u64,
    /// When the line was dispatched
    pub timestamp: Instant,
    /// Command position before the line ran
    pub before: Position4,
    /// Command position after the line ran
    pub after: Position4,
    /// Motion modes active before the line ran
    pub mode: MotionModeSnapshot,
}

impl MoveRecord {
    /// Extrusion performed by the line
    pub fn delta_e(&self) -> f64 {
        self.after.e - self.before.e
    }

    /// Z travel performed by the line
    pub fn delta_z(&self) -> f64 {
        self.after.z - self.before.z
    }
}

/// Fixed-capacity ring of move records, oldest evicted first
#[derive(Debug, Clone)]
pub struct History {
    records: VecDeque<MoveRecord>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn push(&mut self, record: MoveRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Change the capacity; shrinking keeps the newest records
    pub fn set_capacity(&mut self, capacity: usize) {
        if self.records.len() > capacity {
            let excess = self.records.len() - capacity;
            self.records.drain(..excess);
        }
        self.capacity = capacity;
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records from newest to oldest
    pub fn newest_first(&self) -> impl Iterator<Item = &MoveRecord> {
        self.records.iter().rev()
    }

    /// Records from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &MoveRecord> {
        self.records.iter()
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: u64) -> MoveRecord {
        MoveRecord {
            line: format!("G1 E{}", offset),
            offset,
            timestamp: Instant::now(),
            before: Position4::zero(),
            after: Position4::zero(),
            mode: MotionModeSnapshot::default(),
        }
    }

    fn offsets(history: &History) -> Vec<u64> {
        history.iter().map(|r| r.offset).collect()
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut history = History::new(3);
        for offset in 0..5 {
            history.push(record(offset));
        }
        assert_eq!(offsets(&history), vec![2, 3, 4]);
    }

    #[test]
    fn test_shrink_keeps_newest() {
        let mut history = History::new(10);
        for offset in 0..6 {
            history.push(record(offset));
        }
        history.set_capacity(2);
        assert_eq!(offsets(&history), vec![4, 5]);
        history.push(record(6));
        assert_eq!(offsets(&history), vec![5, 6]);
    }

    #[test]
    fn test_grow_keeps_everything() {
        let mut history = History::new(2);
        history.push(record(0));
        history.push(record(1));
        history.set_capacity(4);
        history.push(record(2));
        assert_eq!(offsets(&history), vec![0, 1, 2]);
        assert_eq!(history.capacity(), 4);
    }

    #[test]
    fn test_zero_capacity_holds_nothing() {
        let mut history = History::new(0);
        history.push(record(0));
        assert!(history.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn test_shrink_retains_most_recent(
            initial in 1usize..40,
            pushes in 0u64..80,
            shrunk in 0usize..40,
        ) {
            let mut history = History::new(initial);
            for offset in 0..pushes {
                history.push(record(offset));
            }
            let before = offsets(&history);
            history.set_capacity(shrunk);

            let keep = before.len().min(shrunk);
            proptest::prop_assert_eq!(offsets(&history), before[before.len() - keep..].to_vec());
        }
    }
}
