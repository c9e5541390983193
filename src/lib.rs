//! Text-to-SQL query engine core
//!
//! A question and its structured intent go through schema retrieval, LLM synthesis,
//! validation with a single repair pass, rule-based rewriting and a security gate
//! before the statement runs against the target database. Results are cached,
//! paginated or streamed, then shaped for display.

pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod execution;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod optimizer;
pub mod result_shaper;
pub mod schema_rag;
pub mod security;
pub mod service;
pub mod sql;
pub mod synthesis;

pub use config::EngineConfig;
pub use dialect::Dialect;
pub use error::{ErrorKind, QueryError, Result};
pub use execution::{ExecutionMode, ExecutionResult, StreamEvent};
pub use intent::{QueryIntent, SqlCandidate};
pub use service::{ExecuteOptions, PreparedQuery, QueryService};
