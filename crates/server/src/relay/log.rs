//! Append-only, gap-free message log for one relay session.
//!
//! Indices start at [`BASE_INDEX`] and equal the record's position in the
//! log. Records are never removed or renumbered, so a replay is a slice.

use serde_json::Value;
use thiserror::Error;

pub const BASE_INDEX: u64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("message log is closed at {final_count} records")]
    Closed { final_count: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub index: u64,
    pub payload: Value,
    /// Unix millis
    pub timestamp: u64,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    records: Vec<MessageRecord>,
    closed: bool,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, payload: Value, timestamp: u64) -> Result<&MessageRecord, LogError> {
        if self.closed {
            return Err(LogError::Closed {
                final_count: self.len(),
            });
        }
        let index = BASE_INDEX + self.records.len() as u64;
        self.records.push(MessageRecord {
            index,
            payload,
            timestamp,
        });
        Ok(&self.records[self.records.len() - 1])
    }

    /// All records with `index >= from_index`, in order.
    pub fn since(&self, from_index: u64) -> &[MessageRecord] {
        let start = from_index.saturating_sub(BASE_INDEX) as usize;
        self.records.get(start..).unwrap_or(&[])
    }

    pub fn last_index(&self) -> Option<u64> {
        self.records.last().map(|r| r.index)
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_with(n: u64) -> MessageLog {
        let mut log = MessageLog::new();
        for i in 0..n {
            log.append(json!({ "n": i }), 1_000 + i).unwrap();
        }
        log
    }

    #[test]
    fn indices_are_contiguous_from_base() {
        let log = log_with(5);
        let indices: Vec<u64> = log.since(0).iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(log.last_index(), Some(4));
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn since_returns_exact_suffix() {
        let log = log_with(6);
        let indices: Vec<u64> = log.since(3).iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        assert!(log.since(6).is_empty());
        assert!(log.since(u64::MAX).is_empty());
    }

    #[test]
    fn empty_log_has_no_last_index() {
        let log = MessageLog::new();
        assert!(log.is_empty());
        assert_eq!(log.last_index(), None);
        assert!(log.since(0).is_empty());
    }

    #[test]
    fn closed_log_rejects_appends() {
        let mut log = log_with(2);
        log.close();
        let err = log.append(json!({}), 0).unwrap_err();
        assert_eq!(err, LogError::Closed { final_count: 2 });
        assert_eq!(log.len(), 2);
    }
}
