use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use csi::CsiRecord;

/// Hands decoded records from the capture thread to a consumer that only
/// cares about the newest one.
#[derive(Debug, Default)]
pub struct RecordQueue {
    records: Mutex<VecDeque<CsiRecord>>,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CsiRecord>> {
        // a panicking producer leaves the queue itself intact
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: CsiRecord) {
        self.lock().push_back(record);
    }

    /// Takes the most recent record and drops everything older.
    pub fn take_latest(&self) -> Option<CsiRecord> {
        let mut q = self.lock();
        let latest = q.pop_back();
        q.clear();
        latest
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::fixtures::raw_header;

    fn record(timestamp: u8) -> CsiRecord {
        let mut h = raw_header(0x4102, 1, 1, 2);
        h[12] = timestamp;
        CsiRecord::from_parts(&h, &[1, 0, 2, 0, 3, 0, 4, 0]).unwrap()
    }

    #[test]
    fn latest_wins() {
        let q = RecordQueue::new();
        assert!(q.take_latest().is_none());
        for t in 1..=3 {
            q.push(record(t));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.take_latest().unwrap().header().timestamp & 0xff, 3);
        assert!(q.is_empty());
    }

    #[test]
    fn shared_between_threads() {
        let q = Arc::new(RecordQueue::new());
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for t in 0..10 {
                    q.push(record(t));
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(q.take_latest().unwrap().header().timestamp & 0xff, 9);
    }
}
