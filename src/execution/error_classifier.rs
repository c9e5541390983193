//! Error Classifier
//!
//! Maps driver error messages onto the engine's error kinds by keyword matching. The
//! kind decides the user-facing message and whether a caller may retry.

use crate::db::DriverError;
use crate::error::{ErrorKind, QueryError};

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "statement timeout",
    "interrupted",
    "canceling statement",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission",
    "denied",
    "not authorized",
    "unauthorized",
    "privilege",
    "readonly database",
    "read-only",
    "attempt to write",
];

const RESOURCE_PATTERNS: &[&str] = &[
    "out of memory",
    "memory",
    "disk full",
    "no space",
    "too many",
    "resource",
    "quota",
    "database is locked",
    "busy",
];

const CONNECTION_PATTERNS: &[&str] = &[
    "connection",
    "connect",
    "network",
    "broken pipe",
    "reset by peer",
    "unreachable",
    "pool timed",
    "host",
    "unable to open database",
    "eof",
];

const SYNTAX_PATTERNS: &[&str] = &[
    "syntax",
    "parse",
    "no such column",
    "no such table",
    "no such function",
    "does not exist",
    "unknown column",
    "ambiguous",
    "invalid input",
    "mismatch",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_message(&self, message: &str) -> ErrorKind {
        let msg = message.to_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| msg.contains(p));

        if matches(TIMEOUT_PATTERNS) {
            ErrorKind::TimeoutError
        } else if matches(PERMISSION_PATTERNS) {
            ErrorKind::PermissionError
        } else if matches(RESOURCE_PATTERNS) {
            ErrorKind::ResourceError
        } else if matches(CONNECTION_PATTERNS) {
            ErrorKind::ConnectionError
        } else if matches(SYNTAX_PATTERNS) {
            ErrorKind::SyntaxError
        } else {
            ErrorKind::UnknownError
        }
    }

    /// Classified error; `timeout_ms` is reported for driver-side timeouts
    pub fn classify(&self, error: &DriverError, timeout_ms: u64) -> QueryError {
        let message = error.0.clone();
        match self.classify_message(&message) {
            ErrorKind::TimeoutError => QueryError::Timeout { timeout_ms },
            ErrorKind::PermissionError => QueryError::Permission(message),
            ErrorKind::ResourceError => QueryError::Resource(message),
            ErrorKind::ConnectionError => QueryError::Connection(message),
            ErrorKind::SyntaxError => QueryError::Syntax(message),
            _ => QueryError::Unknown(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_driver_messages() {
        let classifier = ErrorClassifier::new();
        let cases = [
            ("no such table: Customr", ErrorKind::SyntaxError),
            ("near \"FORM\": syntax error", ErrorKind::SyntaxError),
            ("permission denied for table salary", ErrorKind::PermissionError),
            ("attempt to write a readonly database", ErrorKind::PermissionError),
            ("FATAL: sorry, too many clients already", ErrorKind::ResourceError),
            ("database is locked", ErrorKind::ResourceError),
            ("error communicating with database: Connection refused", ErrorKind::ConnectionError),
            ("canceling statement due to statement timeout", ErrorKind::TimeoutError),
            ("interrupted", ErrorKind::TimeoutError),
            ("something odd happened", ErrorKind::UnknownError),
        ];
        for (message, expected) in cases {
            assert_eq!(classifier.classify_message(message), expected, "{}", message);
        }
    }

    #[test]
    fn test_classify_retryability() {
        let classifier = ErrorClassifier::new();
        let refused = classifier.classify(&DriverError::new("connection refused"), 30_000);
        assert!(refused.is_retryable());
        let syntax = classifier.classify(&DriverError::new("syntax error at or near \"FORM\""), 30_000);
        assert!(!syntax.is_retryable());
        assert!(matches!(
            classifier.classify(&DriverError::new("query timed out"), 5),
            QueryError::Timeout { timeout_ms: 5 }
        ));
    }
}
