//! Execution Gate
//!
//! Last check before a statement reaches the database. It deliberately shares no code
//! with the validator: the read-only test, keyword deny-list, injection patterns and
//! table scan are all regex based and run on the final, optimized text.

use crate::config::SecurityConfig;
use crate::error::{ErrorKind, QueryError, Result};
use crate::security::access_control::AccessControl;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

const ALLOWED_LEADING_KEYWORDS: [&str; 5] = ["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN"];

lazy_static! {
    static ref LEADING_KEYWORD: Regex =
        Regex::new(r"(?s)^(?:\s+|--[^\n]*(?:\n|$)|/\*.*?\*/|\()*([A-Za-z_]+)").unwrap();
    static ref DENY_LIST: Regex = Regex::new(
        r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|CALL)\b"
    )
    .unwrap();
    static ref COMMENT_TERMINATED: Regex = Regex::new(r";\s*(?:--|/\*)").unwrap();
    static ref STACKED_STATEMENT: Regex = Regex::new(r";\s*\S").unwrap();
    static ref UNION_SELECT: Regex = Regex::new(r"(?i)\bUNION\s+(?:ALL\s+)?SELECT\b").unwrap();
    static ref NUMERIC_TAUTOLOGY: Regex =
        Regex::new(r"(?i)\bOR\s+(\d+)\s*=\s*(\d+)\b").unwrap();
    static ref STRING_TAUTOLOGY: Regex =
        Regex::new(r"(?i)\bOR\s+'([^']*)'\s*=\s*'([^']*)'").unwrap();
    static ref TRUE_TAUTOLOGY: Regex = Regex::new(r"(?i)\bOR\s+TRUE\b").unwrap();
    static ref IDENTIFIER: Regex =
        Regex::new(r#"[A-Za-z_][A-Za-z0-9_$]*|"([^"]+)"|`([^`]+)`|\[([^\]]+)\]"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GateDecision {
    Allowed,
    Denied { kind: ErrorKind, reason: String },
}

impl GateDecision {
    fn security(reason: impl Into<String>) -> Self {
        GateDecision::Denied {
            kind: ErrorKind::SecurityError,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }

    /// Empty for allowed statements
    pub fn reason(&self) -> &str {
        match self {
            GateDecision::Allowed => "",
            GateDecision::Denied { reason, .. } => reason,
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            GateDecision::Allowed => Ok(()),
            GateDecision::Denied {
                kind: ErrorKind::PermissionError,
                reason,
            } => Err(QueryError::Permission(reason)),
            GateDecision::Denied { reason, .. } => Err(QueryError::Security(reason)),
        }
    }
}

pub struct ExecutionGate {
    access: AccessControl,
}

impl ExecutionGate {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            access: AccessControl::from_config(config),
        }
    }

    pub fn check(&self, sql: &str, user_id: &str) -> GateDecision {
        let decision = self.evaluate(sql, user_id);
        if let GateDecision::Denied { kind, ref reason } = decision {
            warn!("Execution gate denied statement for user {} ({}): {}", user_id, kind, reason);
        }
        decision
    }

    fn evaluate(&self, sql: &str, user_id: &str) -> GateDecision {
        let leading = LEADING_KEYWORD
            .captures(sql)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase());
        match leading {
            Some(ref keyword) if ALLOWED_LEADING_KEYWORDS.contains(&keyword.as_str()) => {}
            Some(keyword) => {
                return GateDecision::security(format!("statement type {} is not allowed", keyword))
            }
            None => return GateDecision::security("statement has no recognizable type"),
        }

        if let Some(m) = DENY_LIST.find(sql) {
            return GateDecision::security(format!(
                "forbidden keyword {}",
                m.as_str().to_uppercase()
            ));
        }

        if let Some(reason) = injection_pattern(sql) {
            return GateDecision::security(reason);
        }

        if self.access.has_sensitive_tables() {
            let identifiers = scan_identifiers(sql);
            let missing = self
                .access
                .missing_grants(user_id, identifiers.iter().map(String::as_str));
            if !missing.is_empty() {
                return GateDecision::Denied {
                    kind: ErrorKind::PermissionError,
                    reason: format!("no grant for table(s) {}", missing.join(", ")),
                };
            }
        }

        GateDecision::Allowed
    }
}

fn injection_pattern(sql: &str) -> Option<&'static str> {
    if COMMENT_TERMINATED.is_match(sql) {
        return Some("comment-terminated statement");
    }
    if STACKED_STATEMENT.is_match(sql) {
        return Some("stacked statements");
    }
    if UNION_SELECT.is_match(sql) {
        return Some("UNION SELECT stacking");
    }
    let numeric = NUMERIC_TAUTOLOGY
        .captures_iter(sql)
        .any(|c| c[1].parse::<u64>().ok() == c[2].parse::<u64>().ok());
    let string = STRING_TAUTOLOGY.captures_iter(sql).any(|c| c[1] == c[2]);
    if numeric || string || TRUE_TAUTOLOGY.is_match(sql) {
        return Some("boolean tautology");
    }
    None
}

/// Every identifier-shaped word in the text, quotes removed
fn scan_identifiers(sql: &str) -> Vec<String> {
    IDENTIFIER
        .captures_iter(sql)
        .map(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .or_else(|| c.get(3))
                .or_else(|| c.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ExecutionGate {
        let mut config = SecurityConfig::default();
        config.sensitive_tables.insert("Salary".to_string());
        config
            .grants
            .insert("hr".to_string(), ["salary".to_string()].into_iter().collect());
        ExecutionGate::new(&config)
    }

    fn denied_kind(decision: &GateDecision) -> Option<ErrorKind> {
        match decision {
            GateDecision::Denied { kind, .. } => Some(*kind),
            GateDecision::Allowed => None,
        }
    }

    #[test]
    fn test_allows_plain_select() {
        let gate = gate();
        let decision = gate.check(
            "SELECT c.name, SUM(i.total) FROM Customer c JOIN Invoice i ON i.customerId = c.id \
             GROUP BY c.name ORDER BY SUM(i.total) DESC LIMIT 10;",
            "anyone",
        );
        assert!(decision.is_allowed(), "{:?}", decision);
        assert!(gate.check("  -- note\n(SELECT 1)", "u").is_allowed());
        assert!(gate.check("SELECT created_at, last_update FROM t", "u").is_allowed());
    }

    #[test]
    fn test_denies_non_read_only() {
        let decision = gate().check("DROP TABLE customers;", "u");
        assert_eq!(denied_kind(&decision), Some(ErrorKind::SecurityError));
        assert!(decision.reason().contains("DROP"));
        assert!(gate().check("", "u").into_result().is_err());
    }

    #[test]
    fn test_deny_list_anywhere() {
        let decision = gate().check("WITH x AS (DELETE FROM t RETURNING *) SELECT * FROM x", "u");
        assert_eq!(decision.reason(), "forbidden keyword DELETE");
    }

    #[test]
    fn test_injection_patterns() {
        let gate = gate();
        for sql in [
            "SELECT * FROM t; -- trailing",
            "SELECT * FROM t; SELECT 2",
            "SELECT name FROM t UNION ALL SELECT password FROM users",
            "SELECT * FROM t WHERE id = 5 OR 1=1",
            "SELECT * FROM t WHERE name = '' OR 'a'='a'",
            "SELECT * FROM t WHERE a = 1 OR TRUE",
        ] {
            assert_eq!(denied_kind(&gate.check(sql, "u")), Some(ErrorKind::SecurityError), "{}", sql);
        }
        assert!(gate.check("SELECT * FROM t WHERE a = 1 OR b = 2", "u").is_allowed());
        assert!(gate.check("SELECT * FROM t WHERE a = 1 OR 1 = 2", "u").is_allowed());
    }

    #[test]
    fn test_sensitive_table_requires_grant() {
        let gate = gate();
        let sql = "SELECT e.name FROM Employee e JOIN \"Salary\" s ON s.employee_id = e.id";
        let denied = gate.check(sql, "intern");
        assert_eq!(denied_kind(&denied), Some(ErrorKind::PermissionError));
        assert!(matches!(denied.into_result(), Err(QueryError::Permission(_))));
        assert!(gate.check(sql, "hr").is_allowed());
    }
}
