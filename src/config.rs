//! Engine Configuration
//!
//! Every field has a default, so a config file only needs the values it changes.
//! Environment variables (optionally from a `.env` file) override file values.

use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, or file path for SQLite
    pub database: String,
    pub dialect: Dialect,
    pub max_connections: u32,
    /// Namespace searched for tables (PostgreSQL)
    pub schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            dialect: Dialect::PostgreSql,
            max_connections: 10,
            schema: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub min_similarity: f32,
    /// Vector size of the local hashing embedder
    pub embedding_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_chars: 6000,
            min_similarity: 0.3,
            embedding_dimension: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub max_rows: usize,
    pub chunk_size: usize,
    pub default_page_size: usize,
    /// Chunks buffered between the streaming task and its consumer
    pub stream_buffer: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_rows: 10_000,
            chunk_size: 1000,
            default_page_size: 50,
            stream_buffer: 4,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Tables that require an explicit per-user grant
    pub sensitive_tables: HashSet<String>,
    /// user id -> tables the user may read
    pub grants: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingConfig {
    pub masked_columns: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub execution: ExecutionConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub shaping: ShapingConfig,
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            execution: ExecutionConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            shaping: ShapingConfig::default(),
            history_capacity: 500,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| QueryError::Config(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

fn env_list(key: &str) -> Option<HashSet<String>> {
    std::env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl EngineConfig {
    /// Loads a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `.env` and process environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        dotenv::dotenv().ok();

        let db = &mut self.database;
        if let Ok(v) = std::env::var("SPYNE_DB_HOST") {
            db.host = v;
        }
        if let Some(v) = env_parse("SPYNE_DB_PORT")? {
            db.port = v;
        }
        if let Ok(v) = std::env::var("SPYNE_DB_USER") {
            db.user = v;
        }
        if let Ok(v) = std::env::var("SPYNE_DB_PASSWORD") {
            db.password = v;
        }
        if let Ok(v) = std::env::var("SPYNE_DB_NAME") {
            db.database = v;
        }
        if let Some(v) = env_parse::<Dialect>("SPYNE_DB_DIALECT")? {
            db.dialect = v;
        }
        if let Ok(v) = std::env::var("SPYNE_DB_SCHEMA") {
            db.schema = v;
        }

        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("OPENAI_MODEL") {
            self.llm.model = v;
        }

        if let Some(v) = env_parse("SPYNE_TOP_K")? {
            self.retrieval.top_k = v;
        }
        if let Some(v) = env_parse("SPYNE_TIMEOUT_SECS")? {
            self.execution.timeout_secs = v;
        }
        if let Some(v) = env_parse("SPYNE_MAX_ROWS")? {
            self.execution.max_rows = v;
        }
        if let Some(v) = env_parse("SPYNE_CACHE_TTL_SECS")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_list("SPYNE_SENSITIVE_TABLES") {
            self.security.sensitive_tables = v;
        }
        if let Some(v) = env_list("SPYNE_MASKED_COLUMNS") {
            self.shaping.masked_columns = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(QueryError::Config("retrieval.top_k must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(QueryError::Config(
                "retrieval.min_similarity must be within [0, 1]".to_string(),
            ));
        }
        if self.execution.timeout_secs == 0 {
            return Err(QueryError::Config("execution.timeout_secs must be positive".to_string()));
        }
        if self.execution.max_rows == 0 || self.execution.chunk_size == 0 {
            return Err(QueryError::Config(
                "execution.max_rows and execution.chunk_size must be positive".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(QueryError::Config("cache.capacity must be positive".to_string()));
        }
        Ok(())
    }
}
