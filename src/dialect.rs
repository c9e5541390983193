//! SQL Dialects
//!
//! Closed set of target database dialects. Each variant carries one rule table that
//! the optimizer, validator and prompt builder read; adding a dialect means adding a
//! variant and its rules.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect as ParserDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    PostgreSql,
    Sqlite,
    Snowflake,
}

/// Per-dialect rewrite rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectRules {
    /// Character used to quote identifiers
    pub identifier_quote: char,
    /// Whether `SELECT TOP n` must become `LIMIT n`
    pub rewrite_top_to_limit: bool,
    /// Whether `[bracketed]` identifiers must be re-quoted
    pub rewrite_bracket_identifiers: bool,
}

const MYSQL_RULES: DialectRules = DialectRules {
    identifier_quote: '`',
    rewrite_top_to_limit: true,
    rewrite_bracket_identifiers: true,
};

const POSTGRES_RULES: DialectRules = DialectRules {
    identifier_quote: '"',
    rewrite_top_to_limit: true,
    rewrite_bracket_identifiers: true,
};

const SQLITE_RULES: DialectRules = DialectRules {
    identifier_quote: '"',
    rewrite_top_to_limit: true,
    rewrite_bracket_identifiers: true,
};

// Snowflake accepts TOP natively.
const SNOWFLAKE_RULES: DialectRules = DialectRules {
    identifier_quote: '"',
    rewrite_top_to_limit: false,
    rewrite_bracket_identifiers: true,
};

impl Dialect {
    pub fn rules(&self) -> &'static DialectRules {
        match self {
            Dialect::MySql => &MYSQL_RULES,
            Dialect::PostgreSql => &POSTGRES_RULES,
            Dialect::Sqlite => &SQLITE_RULES,
            Dialect::Snowflake => &SNOWFLAKE_RULES,
        }
    }

    /// Parser dialect used for the syntax check
    pub fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        match self {
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::PostgreSql => Box::new(PostgreSqlDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
            Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        }
    }

    /// Human-readable name used in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::Sqlite => "SQLite",
            Dialect::Snowflake => "Snowflake",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::PostgreSql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "snowflake" => Ok(Dialect::Snowflake),
            other => Err(QueryError::Config(format!("Unsupported dialect: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialect_aliases() {
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert_eq!("sqlite3".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_rule_table() {
        assert_eq!(Dialect::MySql.rules().identifier_quote, '`');
        assert!(!Dialect::Snowflake.rules().rewrite_top_to_limit);
    }
}
