//! Query history
//!
//! Bounded in-memory log with one entry per request; the oldest entries fall off
//! once the capacity is reached.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub query_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub session_id: Option<String>,
    pub natural_query: String,
    pub final_sql: Option<String>,
    pub mode: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub rows_returned: Option<usize>,
    pub execution_time_ms: u64,
    pub from_cache: bool,
    pub applied_rules: Vec<String>,
}

impl QueryLogEntry {
    pub fn new(
        query_id: Uuid,
        user_id: impl Into<String>,
        natural_query: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            query_id,
            timestamp: Utc::now(),
            user_id: user_id.into(),
            session_id: None,
            natural_query: natural_query.into(),
            final_sql: None,
            mode: mode.into(),
            success: false,
            error_kind: None,
            rows_returned: None,
            execution_time_ms: 0,
            from_cache: false,
            applied_rules: Vec::new(),
        }
    }
}

pub struct QueryHistory {
    capacity: usize,
    entries: Mutex<VecDeque<QueryLogEntry>>,
}

impl QueryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(&self, entry: QueryLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `n` entries, newest first
    pub fn recent(&self, n: usize) -> Vec<QueryLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query: &str) -> QueryLogEntry {
        QueryLogEntry::new(Uuid::new_v4(), "u", query, "plain")
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let history = QueryHistory::new(3);
        for q in ["a", "b", "c", "d"] {
            history.record(entry(q));
        }
        assert_eq!(history.len(), 3);
        let recent: Vec<String> = history
            .recent(10)
            .into_iter()
            .map(|e| e.natural_query)
            .collect();
        assert_eq!(recent, vec!["d", "c", "b"]);
        assert_eq!(history.recent(1)[0].natural_query, "d");
    }
}
