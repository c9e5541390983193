//! SQL Validator
//!
//! Checks a candidate in three steps, stopping at the first that fails:
//! syntax (dialect parser), statement form (read-only), and table/column references
//! against the current schema snapshot.

use crate::dialect::Dialect;
use crate::intent::SqlCandidate;
use crate::schema_rag::{SchemaIndex, SchemaSnapshot};
use crate::sql::{
    extract_references, is_read_only_keyword, statement_keyword, trim_statement, QualifierTarget,
};
use serde::Serialize;
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValidationIssue {
    Unparsable { message: String },
    MultipleStatements { count: usize },
    NotReadOnly { keyword: String },
    UnknownTable { table: String },
    UnknownColumn { table: String, column: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Unparsable { message } => write!(f, "syntax error: {}", message),
            ValidationIssue::MultipleStatements { count } => {
                write!(f, "expected one statement, found {}", count)
            }
            ValidationIssue::NotReadOnly { keyword } => {
                write!(f, "statement is not read-only: {}", keyword)
            }
            ValidationIssue::UnknownTable { table } => write!(f, "unknown table: {}", table),
            ValidationIssue::UnknownColumn { table, column } => {
                write!(f, "unknown column: {}.{}", table, column)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub referenced_tables: Vec<String>,
    /// `table.column`, canonical schema spelling
    pub referenced_columns: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    fn rejected(issue: ValidationIssue) -> Self {
        Self {
            is_valid: false,
            errors: vec![issue],
            ..Default::default()
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Errors plus suggestions, as fed back to a repair pass
    pub fn feedback(&self) -> Vec<String> {
        self.error_messages()
            .into_iter()
            .chain(self.suggestions.iter().cloned())
            .collect()
    }

    /// Candidates rejected for their statement form are never repaired
    pub fn is_read_only_violation(&self) -> bool {
        self.errors.iter().any(|e| {
            matches!(
                e,
                ValidationIssue::NotReadOnly { .. } | ValidationIssue::MultipleStatements { .. }
            )
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, candidate: &SqlCandidate, index: &SchemaIndex) -> ValidationResult {
        let snapshot = index.snapshot();
        self.validate_sql(&candidate.text, candidate.dialect, snapshot.as_deref())
    }

    /// Validates raw text. With no snapshot every referenced table is unknown.
    pub fn validate_sql(
        &self,
        sql: &str,
        dialect: Dialect,
        snapshot: Option<&SchemaSnapshot>,
    ) -> ValidationResult {
        let statement_text = trim_statement(sql);
        let keyword = statement_keyword(statement_text).unwrap_or_default();

        let parser_dialect = dialect.parser_dialect();
        let statements = match Parser::parse_sql(parser_dialect.as_ref(), statement_text) {
            Ok(statements) => statements,
            Err(e) => {
                debug!("Candidate failed to parse: {}", e);
                // Unparsable DML is still reported as a form violation so it is never repaired
                if !keyword.is_empty() && !is_read_only_keyword(&keyword) {
                    return ValidationResult::rejected(ValidationIssue::NotReadOnly { keyword });
                }
                return ValidationResult::rejected(ValidationIssue::Unparsable {
                    message: e.to_string(),
                });
            }
        };

        match statements.len() {
            0 => {
                return ValidationResult::rejected(ValidationIssue::Unparsable {
                    message: "empty statement".to_string(),
                })
            }
            1 => {}
            count => {
                return ValidationResult::rejected(ValidationIssue::MultipleStatements { count })
            }
        }

        if !is_read_only_keyword(&keyword) || !is_read_only_statement(&statements[0]) {
            let keyword = if keyword.is_empty() { "(none)".to_string() } else { keyword };
            return ValidationResult::rejected(ValidationIssue::NotReadOnly { keyword });
        }

        check_references(statement_text, snapshot)
    }
}

fn is_read_only_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Query(_)
        | Statement::ExplainTable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowVariable { .. } => true,
        Statement::Explain { statement, .. } => is_read_only_statement(statement),
        _ => false,
    }
}

fn check_references(sql: &str, snapshot: Option<&SchemaSnapshot>) -> ValidationResult {
    let refs = extract_references(sql);
    let mut result = ValidationResult {
        is_valid: true,
        ..Default::default()
    };

    let mut seen_tables = HashSet::new();
    for table_ref in refs.base_tables() {
        match snapshot.and_then(|s| s.table(&table_ref.name)) {
            Some(table) => {
                if !result.referenced_tables.contains(&table.name) {
                    result.referenced_tables.push(table.name.clone());
                }
            }
            None => {
                if seen_tables.insert(table_ref.name.to_lowercase()) {
                    if let Some(snapshot) = snapshot {
                        let names = snapshot.table_names();
                        if let Some(best) = closest(&table_ref.name, names.iter().copied()) {
                            result.suggestions.push(format!(
                                "did you mean table {} instead of {}?",
                                best, table_ref.name
                            ));
                        }
                    }
                    result.errors.push(ValidationIssue::UnknownTable {
                        table: table_ref.name.clone(),
                    });
                }
            }
        }
    }

    let mut seen_columns = HashSet::new();
    for column_ref in &refs.columns {
        let table = match refs.resolve_qualifier(&column_ref.qualifier) {
            QualifierTarget::Table(name) => snapshot.and_then(|s| s.table(&name)),
            // Unknown qualifiers may still name a schema table directly
            QualifierTarget::Unresolved => snapshot.and_then(|s| s.table(&column_ref.qualifier)),
            QualifierTarget::Derived => None,
        };
        let Some(table) = table else { continue };

        match table.column(&column_ref.column) {
            Some(column) => {
                let qualified = format!("{}.{}", table.name, column.name);
                if !result.referenced_columns.contains(&qualified) {
                    result.referenced_columns.push(qualified);
                }
            }
            None => {
                let key = format!("{}.{}", table.name, column_ref.column).to_lowercase();
                if !seen_columns.insert(key) {
                    continue;
                }
                if let Some(best) = closest(
                    &column_ref.column,
                    table.columns.iter().map(|c| c.name.as_str()),
                ) {
                    result.suggestions.push(format!(
                        "did you mean column {}.{} instead of {}?",
                        table.name, best, column_ref.column
                    ));
                }
                result.errors.push(ValidationIssue::UnknownColumn {
                    table: table.name.clone(),
                    column: column_ref.column.clone(),
                });
            }
        }
    }

    result.is_valid = result.errors.is_empty();
    result
}

/// Closest candidate by Jaro-Winkler similarity, if above the suggestion threshold
fn closest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let target = name.to_lowercase();
    candidates
        .map(|c| (c, strsim::jaro_winkler(&target, &c.to_lowercase())))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}
