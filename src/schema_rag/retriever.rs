//! Schema Index
//!
//! Holds the table metadata snapshot and one embedding per table, and retrieves the
//! tables most similar to a query. `reload` builds a complete new snapshot and swaps
//! it in one step; searches that already hold the old snapshot finish against it.

use crate::db::Database;
use crate::error::{QueryError, Result};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::schema::TableSchema;
use crate::schema_rag::vector_store::{EmbeddingStore, SchemaEmbedding};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Default similarity floor for retrieval
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Retrieved table with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredTable {
    pub table: Arc<TableSchema>,
    pub similarity: f32,
}

/// Immutable view of the index between two reloads
#[derive(Debug)]
pub struct SchemaSnapshot {
    tables: Vec<Arc<TableSchema>>,
    store: EmbeddingStore,
    by_name: HashMap<String, usize>,
    pub loaded_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    /// Case-insensitive table lookup
    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.by_name
            .get(&name.to_lowercase())
            .and_then(|&i| self.tables.get(i))
    }

    pub fn tables(&self) -> &[Arc<TableSchema>] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn embedding(&self, table_name: &str) -> Option<&SchemaEmbedding> {
        self.by_name
            .get(&table_name.to_lowercase())
            .and_then(|&i| self.store.get(i))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

pub struct SchemaIndex {
    embedder: Arc<dyn Embedder>,
    source: Option<Arc<dyn Database>>,
    min_similarity: f32,
    snapshot: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            source: None,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            snapshot: RwLock::new(None),
        }
    }

    /// Index whose `reload` reads metadata from the given database
    pub fn with_source(mut self, source: Arc<dyn Database>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Current snapshot, `None` until the first successful load
    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Re-reads metadata from the source database and swaps the index
    pub async fn reload(&self) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| QueryError::Config("Schema index has no metadata source".to_string()))?;
        let tables = source
            .load_schema()
            .await
            .map_err(|e| QueryError::Connection(format!("Failed to read schema: {}", e)))?;
        self.load_tables(tables).await
    }

    /// Embeds the given tables and swaps them in as the new snapshot
    pub async fn load_tables(&self, tables: Vec<TableSchema>) -> Result<()> {
        let mut store = EmbeddingStore::new();
        let mut by_name = HashMap::with_capacity(tables.len());
        let mut shared = Vec::with_capacity(tables.len());

        for table in tables {
            let source_text = table.embedding_text();
            let vector = self.embedder.embed(&source_text).await?;
            store.add(SchemaEmbedding {
                table_name: table.name.clone(),
                vector,
                source_text,
            })?;
            by_name.insert(table.name.to_lowercase(), shared.len());
            shared.push(Arc::new(table));
        }

        let snapshot = Arc::new(SchemaSnapshot {
            tables: shared,
            store,
            by_name,
            loaded_at: Utc::now(),
        });
        let count = snapshot.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);

        info!("Schema index loaded with {} tables", count);
        Ok(())
    }

    /// Tables with similarity >= the configured floor, best first, at most `top_k`
    pub async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<ScoredTable>> {
        let snapshot = self.snapshot().ok_or(QueryError::NotInitialized)?;
        if snapshot.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query_text).await?;
        let hits = snapshot
            .store
            .search(&query_embedding, self.min_similarity, top_k)?;

        let results: Vec<ScoredTable> = hits
            .into_iter()
            .filter_map(|hit| {
                snapshot.tables.get(hit.position).map(|table| ScoredTable {
                    table: Arc::clone(table),
                    similarity: hit.score,
                })
            })
            .collect();

        debug!(
            "Schema search '{}' matched {} of {} tables",
            query_text,
            results.len(),
            snapshot.len()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::embedder::HashingEmbedder;
    use crate::schema_rag::schema::ColumnSchema;
    use async_trait::async_trait;

    /// Embeds by looking the text up in a fixed table
    struct FixedEmbedder(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .0
                .iter()
                .find(|(prefix, _)| text.starts_with(prefix))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
        }
    }

    fn shop_tables() -> Vec<TableSchema> {
        vec![
            TableSchema::new(
                "Customer",
                vec![ColumnSchema::new("id", "INTEGER").primary_key(), ColumnSchema::new("name", "TEXT")],
            ),
            TableSchema::new(
                "Invoice",
                vec![
                    ColumnSchema::new("id", "INTEGER").primary_key(),
                    ColumnSchema::new("customerId", "INTEGER"),
                    ColumnSchema::new("total", "REAL"),
                ],
            )
            .with_foreign_key("customerId", "Customer", "id"),
            TableSchema::new("AuditLog", vec![ColumnSchema::new("event", "TEXT")]),
        ]
    }

    #[tokio::test]
    async fn test_search_before_reload_is_not_initialized() {
        let index = SchemaIndex::new(Arc::new(HashingEmbedder::default()));
        let result = index.search("customers", 5).await;
        assert!(matches!(result, Err(QueryError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_search_threshold_and_order() {
        let embedder = FixedEmbedder(vec![
            ("Customer", vec![1.0, 0.0, 0.0]),
            ("Invoice", vec![0.8, 0.6, 0.0]),
            ("AuditLog", vec![0.0, 1.0, 0.0]),
            ("best customers", vec![1.0, 0.0, 0.0]),
        ]);
        let index = SchemaIndex::new(Arc::new(embedder));
        index.load_tables(shop_tables()).await.unwrap();

        let results = index.search("best customers", 5).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.table.name.as_str()).collect();
        // AuditLog has similarity 0.0 and is dropped.
        assert_eq!(names, vec!["Customer", "Invoice"]);
        assert!(results[0].similarity > results[1].similarity);

        let capped = index.search("best customers", 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_every_table_has_one_embedding() {
        let index = SchemaIndex::new(Arc::new(HashingEmbedder::default()));
        index.load_tables(shop_tables()).await.unwrap();
        let snapshot = index.snapshot().unwrap();
        for table in snapshot.tables() {
            let embedding = snapshot.embedding(&table.name).unwrap();
            assert_eq!(embedding.table_name, table.name);
            assert_eq!(embedding.source_text, table.embedding_text());
        }
        assert!(snapshot.table("customer").is_some());
    }

    #[tokio::test]
    async fn test_old_snapshot_survives_reload() {
        let index = SchemaIndex::new(Arc::new(HashingEmbedder::default()));
        index.load_tables(shop_tables()).await.unwrap();
        let before = index.snapshot().unwrap();

        index
            .load_tables(vec![TableSchema::new("Product", vec![ColumnSchema::new("sku", "TEXT")])])
            .await
            .unwrap();

        assert_eq!(before.len(), 3);
        assert!(before.table("Invoice").is_some());
        let after = index.snapshot().unwrap();
        assert_eq!(after.table_names(), vec!["Product"]);
    }
}
