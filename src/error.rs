use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Timeout error: statement exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Schema index has not been initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// Closed classification of [`QueryError`], safe to serialize into responses and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    GenerationError,
    ValidationError,
    SecurityError,
    TimeoutError,
    ConnectionError,
    SyntaxError,
    PermissionError,
    ResourceError,
    UnknownError,
    NotInitialized,
    ConfigError,
    InvalidRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Generation(_) => ErrorKind::GenerationError,
            QueryError::Validation(_) => ErrorKind::ValidationError,
            QueryError::Security(_) => ErrorKind::SecurityError,
            QueryError::Timeout { .. } => ErrorKind::TimeoutError,
            QueryError::Connection(_) => ErrorKind::ConnectionError,
            QueryError::Syntax(_) => ErrorKind::SyntaxError,
            QueryError::Permission(_) => ErrorKind::PermissionError,
            QueryError::Resource(_) => ErrorKind::ResourceError,
            QueryError::NotInitialized => ErrorKind::NotInitialized,
            QueryError::Config(_) => ErrorKind::ConfigError,
            QueryError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            QueryError::Unknown(_) | QueryError::Io(_) | QueryError::Json(_) => {
                ErrorKind::UnknownError
            }
        }
    }

    /// Message that can be shown to an end user.
    ///
    /// Never includes the internal detail carried by the variant: schema names,
    /// gate rules and driver messages stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            QueryError::Generation(_) => {
                "The question could not be translated into SQL. Please rephrase it.".to_string()
            }
            QueryError::Validation(errors) => format!(
                "The generated query did not pass validation ({} issue{}). Please rephrase the question.",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ),
            QueryError::Security(_) => {
                "The query was blocked by the security policy.".to_string()
            }
            QueryError::Timeout { timeout_ms } => format!(
                "The query took longer than {} seconds and was cancelled. Try narrowing it down.",
                timeout_ms / 1000
            ),
            QueryError::Connection(_) => {
                "The database is temporarily unreachable. Please try again.".to_string()
            }
            QueryError::Syntax(_) => {
                "The database rejected the generated query.".to_string()
            }
            QueryError::Permission(_) => {
                "You do not have access to the data this question needs.".to_string()
            }
            QueryError::Resource(_) => {
                "The database is out of resources for this query. Please try again later.".to_string()
            }
            QueryError::NotInitialized => {
                "The schema catalogue is still loading. Please try again shortly.".to_string()
            }
            QueryError::Config(_) => "The query engine is misconfigured.".to_string(),
            QueryError::InvalidRequest(detail) => format!("Invalid request: {}", detail),
            QueryError::Unknown(_) | QueryError::Io(_) | QueryError::Json(_) => {
                "An unexpected error occurred while answering the question.".to_string()
            }
        }
    }

    /// Whether a caller may retry the same request once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Connection(_) | QueryError::Resource(_))
    }
}
