use async_trait::async_trait;
use rusqlite::Connection;
use spyne_query::db::{Database, DriverResult, QueryRows, SqliteDatabase};
use spyne_query::llm::LlmClient;
use spyne_query::schema_rag::{HashingEmbedder, TableSchema};
use spyne_query::{
    Dialect, EngineConfig, ErrorKind, ExecuteOptions, ExecutionMode, QueryError, QueryIntent,
    QueryService, StreamEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies in order; the last reply repeats once the script runs out
struct ScriptedLlm {
    replies: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> spyne_query::Result<String> {
        let mut prompts = self.prompts.lock().unwrap();
        let i = prompts.len().min(self.replies.len() - 1);
        prompts.push(prompt.to_string());
        Ok(self.replies[i].clone())
    }
}

/// Counts statements that reach the target database
struct CountingDb {
    inner: SqliteDatabase,
    queries: AtomicUsize,
}

impl CountingDb {
    fn count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for CountingDb {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str) -> DriverResult<QueryRows> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql).await
    }

    async fn load_schema(&self) -> DriverResult<Vec<TableSchema>> {
        self.inner.load_schema().await
    }
}

fn store(customers: usize) -> Arc<CountingDb> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE Customer (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT, city TEXT);
         CREATE TABLE Invoice (
             id INTEGER PRIMARY KEY,
             customerId INTEGER REFERENCES Customer(id),
             total REAL NOT NULL,
             issued TEXT
         );",
    )
    .unwrap();
    for id in 1..=customers {
        conn.execute(
            "INSERT INTO Customer VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                id as i64,
                format!("Customer {:03}", id),
                format!("customer{}@example.com", id),
                if id % 2 == 0 { "Oslo" } else { "Lima" }
            ],
        )
        .unwrap();
        for n in 0..2 {
            conn.execute(
                "INSERT INTO Invoice (customerId, total, issued) VALUES (?1, ?2, ?3)",
                rusqlite::params![id as i64, (id * 10 + n) as f64, "2024-03-01"],
            )
            .unwrap();
        }
    }
    Arc::new(CountingDb {
        inner: SqliteDatabase::from_connection(conn),
        queries: AtomicUsize::new(0),
    })
}

async fn service_with(
    config: EngineConfig,
    db: Arc<CountingDb>,
    llm: Arc<ScriptedLlm>,
) -> QueryService {
    let service = QueryService::new(config, db, llm, Arc::new(HashingEmbedder::default()));
    service.reload_schema().await.unwrap();
    service
}

const TOP_SPENDERS: &str = "```sql
SELECT c.name, SUM(i.total) AS spend
FROM Customer c JOIN Invoice i ON i.customerId = c.id
GROUP BY c.name
ORDER BY spend DESC
LIMIT 10;
```";

#[tokio::test]
async fn test_top_customers_by_spend() {
    let db = store(30);
    let llm = ScriptedLlm::new(&[TOP_SPENDERS]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let intent = QueryIntent::new("top 10 customers by total spend");
    let result = service
        .execute(&intent, &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert!(llm.prompt(0).contains("Customer"));
    assert_eq!(result.columns, vec!["name", "spend"]);
    assert_eq!(result.row_count, 10);
    assert_eq!(result.rows[0][0], serde_json::json!("Customer 030"));
    assert!(!result.from_cache);

    let summary = result.data_summary.as_ref().unwrap();
    assert_eq!(summary.row_count, 10);
    assert!(result
        .visualization_suggestions
        .iter()
        .any(|s| s.chart_type == spyne_query::result_shaper::ChartType::Bar));
}

#[tokio::test]
async fn test_destructive_statement_never_reaches_database() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["DROP TABLE Customer;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let err = service
        .execute(&QueryIntent::new("remove all customers"), &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    // One repair attempt; its reply is the same DROP, so the first errors come back
    assert_eq!(llm.calls(), 2);
    assert!(llm.prompt(1).contains("statement is not read-only: DROP"));
    match err {
        QueryError::Validation(errors) => {
            assert_eq!(errors, vec!["statement is not read-only: DROP"])
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(db.count(), 0);

    let history = service.history(1);
    assert!(!history[0].success);
    assert_eq!(history[0].final_sql, None);
}

#[tokio::test]
async fn test_destructive_statement_repaired_into_read() {
    let db = store(4);
    let llm = ScriptedLlm::new(&["DELETE FROM Customer;", "SELECT name FROM Customer;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let result = service
        .execute(&QueryIntent::new("customers"), &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    assert_eq!(result.row_count, 4);
    assert_eq!(db.count(), 1);
}

#[tokio::test]
async fn test_misspelled_table_repaired_once_then_reports_original_errors() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["SELECT name FROM Customr;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let err = service
        .execute(&QueryIntent::new("list customer names"), &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert_eq!(llm.calls(), 2);
    let repair_prompt = llm.prompt(1);
    assert!(repair_prompt.contains("unknown table: Customr"));
    assert!(repair_prompt.contains("did you mean table Customer instead of Customr?"));
    match err {
        QueryError::Validation(errors) => assert_eq!(errors, vec!["unknown table: Customr"]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(db.count(), 0);
}

#[tokio::test]
async fn test_misspelled_table_fixed_by_repair() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["SELECT name FROM Customr;", "SELECT name FROM Customer;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let result = service
        .execute(&QueryIntent::new("list customer names"), &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    assert_eq!(result.row_count, 3);
}

#[tokio::test]
async fn test_repeated_plain_query_served_from_cache() {
    let db = store(5);
    let llm = ScriptedLlm::new(&["SELECT name, city FROM Customer ORDER BY id;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;
    let intent = QueryIntent::new("customer cities");

    let first = service.execute(&intent, &ExecuteOptions::default()).await.unwrap();
    let queries_after_first = db.count();
    let second = service.execute(&intent, &ExecuteOptions::default()).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(db.count(), queries_after_first);
    assert_eq!(first.rows, second.rows);

    let stats = service.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.success_count, 2);

    service.clear_cache();
    let third = service.execute(&intent, &ExecuteOptions::default()).await.unwrap();
    assert!(!third.from_cache);
}

#[tokio::test]
async fn test_paginated_results_bypass_cache_and_cover_all_rows() {
    let db = store(23);
    let llm = ScriptedLlm::new(&["SELECT id, name FROM Customer ORDER BY id;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;
    let intent = QueryIntent::new("all customers");

    let mut ids = Vec::new();
    for page in 1..=3 {
        let options = ExecuteOptions::default().with_mode(ExecutionMode::Paginated {
            page,
            page_size: 10,
        });
        let result = service.execute(&intent, &options).await.unwrap();
        assert_eq!(result.total_rows, Some(23));
        assert!(!result.from_cache);
        ids.extend(result.rows.iter().map(|row| row[0].as_i64().unwrap()));
    }

    assert_eq!(ids, (1..=23).collect::<Vec<i64>>());
    assert_eq!(service.stats().cache_hits + service.stats().cache_misses, 0);
}

#[tokio::test]
async fn test_streamed_chunks_are_masked() {
    let db = store(25);
    let llm = ScriptedLlm::new(&["SELECT id, email FROM Customer ORDER BY id;"]);
    let mut config = EngineConfig::default();
    config.shaping.masked_columns.insert("email".to_string());
    let service = service_with(config, db.clone(), llm.clone()).await;

    let options = ExecuteOptions::default().with_mode(ExecutionMode::Streamed { chunk_size: 10 });
    let mut events = service
        .execute_stream(&QueryIntent::new("customer emails"), &options)
        .await;

    let mut sizes = Vec::new();
    let mut first_email = None;
    let mut completed = None;
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Start { chunk_size, .. } => assert_eq!(chunk_size, 10),
            StreamEvent::Data { rows, .. } => {
                if first_email.is_none() {
                    first_email = Some(rows[0][1].clone());
                }
                sizes.push(rows.len());
            }
            StreamEvent::Complete { total_rows, .. } => completed = Some(total_rows),
            StreamEvent::Error { message, .. } => panic!("stream failed: {}", message),
        }
    }

    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(completed, Some(25));
    assert_eq!(first_email, Some(serde_json::json!("cu*****************om")));
}

#[tokio::test]
async fn test_dropping_stream_stops_chunk_queries() {
    let db = store(300);
    let llm = ScriptedLlm::new(&["SELECT id FROM Customer ORDER BY id;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let options = ExecuteOptions::default().with_mode(ExecutionMode::Streamed { chunk_size: 10 });
    let mut events = service
        .execute_stream(&QueryIntent::new("customer ids"), &options)
        .await;
    assert!(matches!(events.recv().await, Some(StreamEvent::Start { .. })));
    assert!(matches!(events.recv().await, Some(StreamEvent::Data { .. })));
    drop(events);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let issued = db.count();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A full run issues 31 chunk queries
    assert!(issued < 16, "issued {} queries after cancellation", issued);
    assert_eq!(db.count(), issued);
}

#[tokio::test]
async fn test_stream_preparation_failure_is_single_error_event() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["DELETE FROM Customer;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let options = ExecuteOptions::default().with_mode(ExecutionMode::Streamed { chunk_size: 10 });
    let mut events = service
        .execute_stream(&QueryIntent::new("delete customers"), &options)
        .await;

    match events.recv().await {
        Some(StreamEvent::Error { kind, .. }) => assert_eq!(kind, ErrorKind::ValidationError),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.recv().await.is_none());
    assert_eq!(db.count(), 0);
}

#[tokio::test]
async fn test_sensitive_table_requires_grant() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["SELECT customerId, total FROM Invoice;"]);
    let mut config = EngineConfig::default();
    config.security.sensitive_tables.insert("Invoice".to_string());
    config
        .security
        .grants
        .entry("alice".to_string())
        .or_default()
        .insert("invoice".to_string());
    let service = service_with(config, db.clone(), llm.clone()).await;
    let intent = QueryIntent::new("invoice totals");

    let denied = service
        .execute(&intent, &ExecuteOptions::for_user("bob"))
        .await
        .unwrap_err();
    assert_eq!(denied.kind(), ErrorKind::PermissionError);
    assert_eq!(db.count(), 0);

    let allowed = service
        .execute(&intent, &ExecuteOptions::for_user("alice"))
        .await
        .unwrap();
    assert_eq!(allowed.row_count, 6);
}

#[tokio::test]
async fn test_stats_and_history_track_outcomes() {
    let db = store(3);
    let llm = ScriptedLlm::new(&["SELECT name FROM Customer;"]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let mut options = ExecuteOptions::for_user("carol");
    options.session_id = Some("s-1".to_string());
    service
        .execute(&QueryIntent::new("customer names"), &options)
        .await
        .unwrap();
    service
        .execute(
            &QueryIntent::new("streamed via plain entry point"),
            &ExecuteOptions::default().with_mode(ExecutionMode::Streamed { chunk_size: 5 }),
        )
        .await
        .unwrap_err();

    let stats = service.stats();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);

    let history = service.history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].error_kind, Some(ErrorKind::InvalidRequest));
    assert_eq!(history[1].user_id, "carol");
    assert_eq!(history[1].session_id.as_deref(), Some("s-1"));
    assert_eq!(history[1].rows_returned, Some(3));
    assert_eq!(history[1].final_sql.as_deref(), Some("SELECT name FROM Customer;"));
}

const COMMENTED_IDS: &str = "SELECT id FROM Customer ORDER BY id -- every id";

#[tokio::test]
async fn test_trailing_comment_reply_streams_to_completion() {
    let db = store(25);
    let llm = ScriptedLlm::new(&[COMMENTED_IDS]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let options = ExecuteOptions::default().with_mode(ExecutionMode::Streamed { chunk_size: 10 });
    let mut events = service
        .execute_stream(&QueryIntent::new("customer ids"), &options)
        .await;

    let mut sizes = Vec::new();
    let mut completed = None;
    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Data { rows, .. } => sizes.push(rows.len()),
                StreamEvent::Complete { total_rows, .. } => completed = Some(total_rows),
                StreamEvent::Error { message, .. } => panic!("stream failed: {}", message),
                StreamEvent::Start { .. } => {}
            }
        }
    })
    .await;

    assert!(wait.is_ok(), "stream never finished");
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(completed, Some(25));
}

#[tokio::test]
async fn test_trailing_comment_reply_paginates() {
    let db = store(25);
    let llm = ScriptedLlm::new(&[COMMENTED_IDS]);
    let service = service_with(EngineConfig::default(), db.clone(), llm.clone()).await;

    let options = ExecuteOptions::default().with_mode(ExecutionMode::Paginated {
        page: 1,
        page_size: 10,
    });
    let result = service
        .execute(&QueryIntent::new("customer ids"), &options)
        .await
        .unwrap();

    assert_eq!(result.total_rows, Some(25));
    assert_eq!(result.row_count, 10);
    assert_eq!(result.rows[9][0], serde_json::json!(10));
}

#[tokio::test]
async fn test_trailing_comment_reply_respects_row_cap() {
    let db = store(25);
    let llm = ScriptedLlm::new(&[COMMENTED_IDS]);
    let mut config = EngineConfig::default();
    config.execution.max_rows = 5;
    let service = service_with(config, db.clone(), llm.clone()).await;

    let result = service
        .execute(&QueryIntent::new("customer ids"), &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.row_count, 5);
    assert!(result.truncated);
    assert_eq!(db.count(), 1);

    let history = service.history(1);
    let final_sql = history[0].final_sql.clone().unwrap();
    assert!(!final_sql.contains("--"), "comment survived: {}", final_sql);
}
