//! Query Service
//!
//! Owns the long-lived pieces (schema index, result cache, counters, history) and runs
//! the request pipeline: retrieval, synthesis, validation with one repair pass,
//! optimization, the execution gate, execution and result shaping.

use crate::config::EngineConfig;
use crate::db::{connect, Database};
use crate::error::{QueryError, Result};
use crate::execution::{
    cache_key, ExecutionEngine, ExecutionMode, ExecutionRequest, ExecutionResult, ResultCache,
    StreamEvent,
};
use crate::intent::{QueryIntent, SqlCandidate};
use crate::llm::{LlmClient, OpenAiClient};
use crate::observability::{EngineStats, QueryHistory, QueryLogEntry, StatsSnapshot};
use crate::optimizer::QueryOptimizer;
use crate::result_shaper::ResultShaper;
use crate::schema_rag::{ContextBuilder, Embedder, HashingEmbedder, OpenAiEmbedder, SchemaIndex};
use crate::security::ExecutionGate;
use crate::synthesis::{SqlRepairer, SqlSynthesizer, SqlValidator, ValidationResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Caller identity and execution mode for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub user_id: String,
    pub session_id: Option<String>,
    pub mode: ExecutionMode,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            session_id: None,
            mode: ExecutionMode::Plain,
        }
    }
}

impl ExecuteOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A statement that passed validation, optimization and the gate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedQuery {
    pub intent_id: String,
    pub sql: String,
    pub generation_attempt: u8,
    pub referenced_tables: Vec<String>,
    pub applied_rules: Vec<String>,
    pub hints: Vec<String>,
}

pub struct QueryService {
    config: EngineConfig,
    index: Arc<SchemaIndex>,
    context_builder: ContextBuilder,
    synthesizer: Arc<SqlSynthesizer>,
    validator: SqlValidator,
    repairer: SqlRepairer,
    optimizer: QueryOptimizer,
    gate: ExecutionGate,
    engine: ExecutionEngine,
    cache: ResultCache,
    shaper: ResultShaper,
    stats: Arc<EngineStats>,
    history: Arc<QueryHistory>,
}

impl QueryService {
    pub fn new(
        config: EngineConfig,
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let dialect = db.dialect();
        let index = Arc::new(
            SchemaIndex::new(embedder)
                .with_source(Arc::clone(&db))
                .with_min_similarity(config.retrieval.min_similarity),
        );
        let synthesizer = Arc::new(SqlSynthesizer::new(llm, dialect));

        Self {
            context_builder: ContextBuilder::new(Arc::clone(&index), config.retrieval.top_k),
            index,
            repairer: SqlRepairer::new(Arc::clone(&synthesizer)),
            synthesizer,
            validator: SqlValidator::new(),
            optimizer: QueryOptimizer::new(),
            gate: ExecutionGate::new(&config.security),
            engine: ExecutionEngine::new(db, config.execution.clone()),
            cache: ResultCache::from_config(&config.cache),
            shaper: ResultShaper::new(&config.shaping),
            stats: Arc::new(EngineStats::new()),
            history: Arc::new(QueryHistory::new(config.history_capacity)),
            config,
        }
    }

    /// Connects to the configured database and model backends and loads the schema
    pub async fn from_config(config: EngineConfig, offline_embeddings: bool) -> Result<Self> {
        config.validate()?;
        let db = connect(&config.database).await?;
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_config(&config.llm));
        let embedder: Arc<dyn Embedder> = if offline_embeddings || config.llm.api_key.is_empty() {
            info!("Using local hashing embeddings");
            Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimension))
        } else {
            Arc::new(OpenAiEmbedder::new(
                config.llm.api_key.clone(),
                config.llm.base_url.clone(),
                config.llm.embedding_model.clone(),
            ))
        };

        let service = Self::new(config, db, llm, embedder);
        service.reload_schema().await?;
        Ok(service)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema_index(&self) -> &Arc<SchemaIndex> {
        &self.index
    }

    /// Re-reads table metadata and swaps the index; in-flight requests keep the old one
    pub async fn reload_schema(&self) -> Result<()> {
        self.index.reload().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn history(&self, n: usize) -> Vec<QueryLogEntry> {
        self.history.recent(n)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Generates, validates (with at most one repair), optimizes and gates a statement
    pub async fn prepare(
        &self,
        intent_id: &str,
        intent: &QueryIntent,
        user_id: &str,
    ) -> Result<PreparedQuery> {
        let context = self
            .context_builder
            .build_context(&intent.natural_query, self.config.retrieval.max_context_chars)
            .await?;
        info!(
            "Retrieved {} table(s) for intent {}: {:?}",
            context.tables.len(),
            intent_id,
            context.tables
        );

        let candidate = self
            .synthesizer
            .synthesize(intent_id, intent, &context.text, &[])
            .await?;
        let (candidate, validation) = self
            .validate_with_repair(intent, &context.text, candidate)
            .await?;

        let optimized = self.optimizer.optimize(&candidate.text, candidate.dialect);
        if !optimized.applied_rules.is_empty() {
            info!("Optimizer rules for {}: {:?}", intent_id, optimized.applied_rules);
        }

        self.gate.check(&optimized.sql, user_id).into_result()?;

        Ok(PreparedQuery {
            intent_id: intent_id.to_string(),
            sql: optimized.sql,
            generation_attempt: candidate.generation_attempt,
            referenced_tables: validation.referenced_tables,
            applied_rules: optimized.applied_rules,
            hints: optimized.hints,
        })
    }

    async fn validate_with_repair(
        &self,
        intent: &QueryIntent,
        context: &str,
        candidate: SqlCandidate,
    ) -> Result<(SqlCandidate, ValidationResult)> {
        let validation = self.validator.validate(&candidate, &self.index);
        if validation.is_valid {
            return Ok((candidate, validation));
        }
        warn!(
            "Candidate for {} failed validation: {:?}",
            candidate.source_intent_id,
            validation.error_messages()
        );

        let original_errors = QueryError::Validation(validation.error_messages());
        if !candidate.can_repair() {
            return Err(original_errors);
        }

        let repaired = match self
            .repairer
            .repair(intent, context, &candidate, &validation)
            .await
        {
            Ok(repaired) => repaired,
            Err(e) => {
                warn!("Repair attempt failed: {}", e);
                return Err(original_errors);
            }
        };

        let revalidation = self.validator.validate(&repaired, &self.index);
        if revalidation.is_valid {
            info!("Repaired candidate for {} passed validation", repaired.source_intent_id);
            Ok((repaired, revalidation))
        } else {
            warn!(
                "Repaired candidate still invalid: {:?}",
                revalidation.error_messages()
            );
            Err(original_errors)
        }
    }

    /// Runs the full pipeline for one intent in plain or paginated mode
    pub async fn execute(
        &self,
        intent: &QueryIntent,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let query_id = Uuid::new_v4();
        let mut entry = QueryLogEntry::new(
            query_id,
            options.user_id.clone(),
            intent.natural_query.clone(),
            options.mode.name(),
        );
        entry.session_id = options.session_id.clone();

        let outcome = self.run_pipeline(&query_id.to_string(), intent, options, &mut entry).await;
        entry.execution_time_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => {
                self.stats.record_success();
                entry.success = true;
                entry.rows_returned = Some(result.row_count);
                entry.from_cache = result.from_cache;
            }
            Err(e) => {
                self.stats.record_failure();
                entry.error_kind = Some(e.kind());
                error!("Query {} failed: {}", query_id, e);
            }
        }
        self.history.record(entry);
        outcome
    }

    async fn run_pipeline(
        &self,
        intent_id: &str,
        intent: &QueryIntent,
        options: &ExecuteOptions,
        entry: &mut QueryLogEntry,
    ) -> Result<ExecutionResult> {
        if let ExecutionMode::Streamed { .. } = options.mode {
            return Err(QueryError::InvalidRequest(
                "use execute_stream for streamed execution".to_string(),
            ));
        }

        let prepared = self.prepare(intent_id, intent, &options.user_id).await?;
        entry.final_sql = Some(prepared.sql.clone());
        entry.applied_rules = prepared.applied_rules.clone();

        let use_cache = options.mode.is_cacheable() && self.config.cache.enabled;
        let key = cache_key(&prepared.sql);
        if use_cache {
            if let Some(mut cached) = self.cache.get(key) {
                self.stats.record_cache_hit();
                info!("Cache hit for {}", intent_id);
                cached.from_cache = true;
                return Ok(cached);
            }
            self.stats.record_cache_miss();
        }

        let request = ExecutionRequest {
            sql: prepared.sql.clone(),
            mode: options.mode,
        };
        let mut result = self.engine.execute(&request).await?;
        let shaped = self
            .shaper
            .shape(std::mem::take(&mut result.columns), std::mem::take(&mut result.rows));
        result.apply_shape(shaped);
        result.applied_rules = prepared.applied_rules;

        if use_cache {
            self.cache.put(key, result.clone());
        }
        Ok(result)
    }

    /// Streamed execution. Pipeline failures arrive as a single error event; closing
    /// the receiver cancels the remaining chunk queries.
    pub async fn execute_stream(
        &self,
        intent: &QueryIntent,
        options: &ExecuteOptions,
    ) -> mpsc::Receiver<StreamEvent> {
        let chunk_size = match options.mode {
            ExecutionMode::Streamed { chunk_size } => chunk_size,
            _ => self.config.execution.chunk_size,
        };
        let query_id = Uuid::new_v4();
        let mut entry = QueryLogEntry::new(
            query_id,
            options.user_id.clone(),
            intent.natural_query.clone(),
            ExecutionMode::Streamed { chunk_size }.name(),
        );
        entry.session_id = options.session_id.clone();
        let started = Instant::now();

        let (tx, rx) = mpsc::channel(self.config.execution.stream_buffer.max(1));

        let prepared = match self
            .prepare(&query_id.to_string(), intent, &options.user_id)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Query {} failed: {}", query_id, e);
                self.stats.record_failure();
                entry.error_kind = Some(e.kind());
                entry.execution_time_ms = started.elapsed().as_millis() as u64;
                self.history.record(entry);
                let _ = tx.send(StreamEvent::from_error(&e)).await;
                return rx;
            }
        };
        entry.final_sql = Some(prepared.sql.clone());
        entry.applied_rules = prepared.applied_rules.clone();

        let mut inner = self.engine.stream(&prepared.sql, chunk_size);
        let stats = Arc::clone(&self.stats);
        let history = Arc::clone(&self.history);
        let shaper = self.shaper.clone();
        tokio::spawn(async move {
            let mut rows_sent = 0usize;
            let mut outcome: Option<bool> = None;
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = inner.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let event = match event {
                    StreamEvent::Data {
                        chunk_index,
                        columns,
                        rows,
                    } => {
                        let rows = shaper.mask_rows(&columns, rows);
                        StreamEvent::Data {
                            chunk_index,
                            columns,
                            rows,
                        }
                    }
                    other => other,
                };
                match &event {
                    StreamEvent::Data { rows, .. } => rows_sent += rows.len(),
                    StreamEvent::Complete { .. } => outcome = Some(true),
                    StreamEvent::Error { kind, .. } => {
                        outcome = Some(false);
                        entry.error_kind = Some(*kind);
                    }
                    StreamEvent::Start { .. } => {}
                }
                if tx.send(event).await.is_err() {
                    break;
                }
                if outcome.is_some() {
                    break;
                }
            }

            // A consumer that stops early has still been served successfully
            if outcome.unwrap_or(entry.error_kind.is_none()) {
                stats.record_success();
                entry.success = true;
            } else {
                stats.record_failure();
            }
            entry.rows_returned = Some(rows_sent);
            entry.execution_time_ms = started.elapsed().as_millis() as u64;
            history.record(entry);
        });
        rx
    }
}
