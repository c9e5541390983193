//! Execution Engine
//!
//! Runs gated statements against the database in one of three modes. Every database
//! call is bounded by the configured timeout; on expiry the pending driver call is
//! dropped, which cancels that statement, and the request fails with a timeout error.

use crate::config::ExecutionConfig;
use crate::db::{Database, QueryRows};
use crate::error::{QueryError, Result};
use crate::execution::error_classifier::ErrorClassifier;
use crate::execution::result::{ExecutionMode, ExecutionRequest, ExecutionResult, StreamEvent};
use crate::sql::{has_top_level_limit, strip_top_level_limit, trim_statement};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ExecutionEngine {
    db: Arc<dyn Database>,
    config: ExecutionConfig,
    classifier: ErrorClassifier,
}

impl ExecutionEngine {
    pub fn new(db: Arc<dyn Database>, config: ExecutionConfig) -> Self {
        Self {
            db,
            config,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout().as_millis() as u64
    }

    /// One database round trip under the statement timeout
    async fn run(&self, sql: &str) -> Result<QueryRows> {
        debug!("Executing: {}", sql);
        match tokio::time::timeout(self.config.timeout(), self.db.query(sql)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => {
                let error = self.classifier.classify(&e, self.timeout_ms());
                warn!("Statement failed ({}): {}", error.kind(), e);
                Err(error)
            }
            Err(_) => {
                warn!("Statement exceeded {}ms and was cancelled", self.timeout_ms());
                Err(QueryError::Timeout {
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    /// Plain and paginated execution. Streamed requests go through [`Self::stream`].
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut result = match request.mode {
            ExecutionMode::Plain => self.execute_plain(&request.sql).await?,
            ExecutionMode::Paginated { page, page_size } => {
                self.execute_paginated(&request.sql, page, page_size).await?
            }
            ExecutionMode::Streamed { .. } => {
                return Err(QueryError::InvalidRequest(
                    "streamed execution is delivered as events".to_string(),
                ))
            }
        };
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "{} execution returned {} rows in {}ms",
            request.mode, result.row_count, result.execution_time_ms
        );
        Ok(result)
    }

    async fn execute_plain(&self, sql: &str) -> Result<ExecutionResult> {
        let statement = trim_statement(sql);
        let cap = self.config.max_rows;
        // Fetch one row past the cap to detect truncation
        let bounded = if has_top_level_limit(statement) || !is_query(statement) {
            statement.to_string()
        } else {
            format!("{} LIMIT {}", statement, cap + 1)
        };

        let QueryRows { columns, mut rows } = self.run(&bounded).await?;
        let truncated = rows.len() > cap;
        if truncated {
            rows.truncate(cap);
            info!("Result truncated to {} rows", cap);
        }
        let mut result = ExecutionResult::new(statement, columns, rows);
        result.truncated = truncated;
        Ok(result)
    }

    async fn execute_paginated(
        &self,
        sql: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ExecutionResult> {
        if page < 1 || page_size < 1 {
            return Err(QueryError::InvalidRequest(format!(
                "page and page size must be at least 1 (got page {}, page size {})",
                page, page_size
            )));
        }
        let base = strip_top_level_limit(sql);
        if !is_query(&base) {
            return Err(QueryError::InvalidRequest(
                "only SELECT and WITH statements can be paginated".to_string(),
            ));
        }

        let count_sql = format!("SELECT COUNT(*) AS total FROM ({}) AS counted", base);
        let total = self
            .run(&count_sql)
            .await?
            .scalar_u64()
            .ok_or_else(|| QueryError::Unknown("count query returned no value".to_string()))?;

        let offset = (page - 1) * page_size;
        let page_sql = format!("{} LIMIT {} OFFSET {}", base, page_size, offset);
        let QueryRows { columns, rows } = self.run(&page_sql).await?;

        let mut result = ExecutionResult::new(base, columns, rows);
        result.total_rows = Some(total);
        result.page = Some(page);
        result.page_size = Some(page_size);
        Ok(result)
    }

    /// Streams the result in fixed-size chunks. Dropping the receiver stops the
    /// producer before its next chunk query.
    pub fn stream(&self, sql: &str, chunk_size: usize) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let engine = self.clone();
        let base = strip_top_level_limit(sql);
        tokio::spawn(async move {
            engine.produce_chunks(base, chunk_size, tx).await;
        });
        rx
    }

    async fn produce_chunks(&self, base: String, chunk_size: usize, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        if chunk_size < 1 {
            let error = QueryError::InvalidRequest("chunk size must be at least 1".to_string());
            let _ = tx.send(StreamEvent::from_error(&error)).await;
            return;
        }
        if tx
            .send(StreamEvent::Start {
                sql: base.clone(),
                chunk_size,
            })
            .await
            .is_err()
        {
            return;
        }

        let mut offset = 0usize;
        let mut chunk_index = 0usize;
        loop {
            if tx.is_closed() {
                info!("Stream cancelled by consumer after {} chunks", chunk_index);
                return;
            }
            let chunk_sql = format!("{} LIMIT {} OFFSET {}", base, chunk_size, offset);
            let QueryRows { columns, rows } = match self.run(&chunk_sql).await {
                Ok(rows) => rows,
                Err(error) => {
                    let _ = tx.send(StreamEvent::from_error(&error)).await;
                    return;
                }
            };

            let fetched = rows.len();
            offset += fetched;
            if fetched > 0 || chunk_index == 0 {
                let event = StreamEvent::Data {
                    chunk_index,
                    columns,
                    rows,
                };
                if tx.send(event).await.is_err() {
                    info!("Stream cancelled by consumer after {} chunks", chunk_index);
                    return;
                }
                chunk_index += 1;
            }

            if fetched < chunk_size {
                let _ = tx
                    .send(StreamEvent::Complete {
                        total_rows: offset as u64,
                        chunks: chunk_index,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
                return;
            }
        }
    }
}

/// Whether a row cap or count wrapper can be applied to the statement
fn is_query(sql: &str) -> bool {
    matches!(
        crate::sql::statement_keyword(sql).as_deref(),
        Some("SELECT") | Some("WITH")
    )
}
