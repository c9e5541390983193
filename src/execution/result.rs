//! Execution requests, results and stream events

use crate::error::{ErrorKind, QueryError};
use crate::result_shaper::{DataSummary, ShapedResult, VisualizationSuggestion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ExecutionMode {
    Plain,
    #[serde(rename_all = "camelCase")]
    Paginated { page: usize, page_size: usize },
    #[serde(rename_all = "camelCase")]
    Streamed { chunk_size: usize },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Plain
    }
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Plain => "plain",
            ExecutionMode::Paginated { .. } => "paginated",
            ExecutionMode::Streamed { .. } => "streamed",
        }
    }

    /// Only full, plain results may be served from or stored in the cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self, ExecutionMode::Plain)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub sql: String,
    pub mode: ExecutionMode,
}

impl ExecutionRequest {
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            mode: ExecutionMode::Plain,
        }
    }

    pub fn paginated(sql: impl Into<String>, page: usize, page_size: usize) -> Self {
        Self {
            sql: sql.into(),
            mode: ExecutionMode::Paginated { page, page_size },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Size of the full result; set for paginated runs
    pub total_rows: Option<u64>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub truncated: bool,
    pub execution_time_ms: u64,
    pub from_cache: bool,
    #[serde(default)]
    pub applied_rules: Vec<String>,
    pub data_summary: Option<DataSummary>,
    #[serde(default)]
    pub visualization_suggestions: Vec<VisualizationSuggestion>,
}

impl ExecutionResult {
    pub fn new(sql: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            sql: sql.into(),
            columns,
            rows,
            row_count,
            total_rows: None,
            page: None,
            page_size: None,
            truncated: false,
            execution_time_ms: 0,
            from_cache: false,
            applied_rules: Vec::new(),
            data_summary: None,
            visualization_suggestions: Vec::new(),
        }
    }

    /// Replaces rows with their shaped form and attaches summary and suggestions
    pub fn apply_shape(&mut self, shaped: ShapedResult) {
        self.columns = shaped.columns;
        self.rows = shaped.rows;
        self.row_count = self.rows.len();
        self.data_summary = Some(shaped.data_summary);
        self.visualization_suggestions = shaped.visualization_suggestions;
    }
}

/// One event of a streamed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Start { sql: String, chunk_size: usize },
    #[serde(rename_all = "camelCase")]
    Data {
        chunk_index: usize,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        total_rows: u64,
        chunks: usize,
        execution_time_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn from_error(error: &QueryError) -> Self {
        StreamEvent::Error {
            kind: error.kind(),
            message: error.user_message(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_wire_shape() {
        let event = StreamEvent::Data {
            chunk_index: 0,
            columns: vec!["id".to_string()],
            rows: vec![vec![json!(1)]],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "data", "payload": {"chunkIndex": 0, "columns": ["id"], "rows": [[1]]}})
        );
        assert!(!event.is_terminal());

        let error = StreamEvent::from_error(&QueryError::Timeout { timeout_ms: 10 });
        assert!(error.is_terminal());
        assert_eq!(serde_json::to_value(&error).unwrap()["payload"]["kind"], json!("TimeoutError"));
    }

    #[test]
    fn test_only_plain_mode_is_cacheable() {
        assert!(ExecutionMode::Plain.is_cacheable());
        assert!(!ExecutionMode::Paginated { page: 1, page_size: 10 }.is_cacheable());
        assert!(!ExecutionMode::Streamed { chunk_size: 10 }.is_cacheable());
    }
}
