//! Statement Analysis
//!
//! Extracts what the validator, gate and engine need from a statement without a full
//! parser: the leading keyword, FROM/JOIN table references, alias-qualified column
//! references, the trailing LIMIT clause and a whitespace-normalized form.

use crate::sql::tokenizer::{render, significant_indices, tokenize, Token, TokenKind};
use std::collections::{HashMap, HashSet};

/// Statement forms this engine will run
pub const READ_ONLY_KEYWORDS: [&str; 5] = ["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN"];

/// Words that end a table reference instead of aliasing it
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "MINUS", "WINDOW", "FETCH", "FOR", "SELECT", "FROM", "AS", "LATERAL", "QUALIFY",
    "TABLESAMPLE", "WITH", "RETURNING", "VALUES", "SET", "INTO", "AND", "OR", "NOT",
    "STRAIGHT_JOIN", "PIVOT", "UNPIVOT", "SAMPLE", "TOP",
];

fn is_clause_keyword(token: &Token) -> bool {
    token.kind == TokenKind::Word
        && CLAUSE_KEYWORDS
            .iter()
            .any(|k| token.text.eq_ignore_ascii_case(k))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Final segment of the (possibly schema-qualified) name
    pub name: String,
    /// Name as written, segments joined by `.`
    pub qualified_name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: String,
    pub column: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatementReferences {
    pub tables: Vec<TableRef>,
    pub columns: Vec<ColumnRef>,
    /// Lowercased CTE names defined by WITH clauses
    pub cte_names: HashSet<String>,
    /// Lowercased aliases of derived tables (subqueries in FROM)
    pub derived_aliases: HashSet<String>,
}

/// What a column qualifier points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualifierTarget {
    Table(String),
    Derived,
    Unresolved,
}

impl StatementReferences {
    /// Base tables only, CTE references removed
    pub fn base_tables(&self) -> Vec<&TableRef> {
        self.tables
            .iter()
            .filter(|t| !self.cte_names.contains(&t.name.to_lowercase()))
            .collect()
    }

    pub fn resolve_qualifier(&self, qualifier: &str) -> QualifierTarget {
        let key = qualifier.to_lowercase();
        if self.derived_aliases.contains(&key) || self.cte_names.contains(&key) {
            return QualifierTarget::Derived;
        }
        let aliases: HashMap<String, &TableRef> = self
            .tables
            .iter()
            .filter_map(|t| t.alias.as_ref().map(|a| (a.to_lowercase(), t)))
            .collect();
        let table = aliases.get(&key).copied().or_else(|| {
            self.tables
                .iter()
                .find(|t| t.name.to_lowercase() == key || t.qualified_name.to_lowercase() == key)
        });
        match table {
            Some(t) if self.cte_names.contains(&t.name.to_lowercase()) => QualifierTarget::Derived,
            Some(t) => QualifierTarget::Table(t.name.clone()),
            None => QualifierTarget::Unresolved,
        }
    }
}

/// Leading keyword, uppercased
pub fn statement_keyword(sql: &str) -> Option<String> {
    tokenize(sql)
        .into_iter()
        .find(|t| !t.is_trivia() && !t.is_punct("("))
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text.to_uppercase())
}

pub fn is_read_only_keyword(keyword: &str) -> bool {
    READ_ONLY_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(keyword))
}

struct Scanner<'a> {
    sig: Vec<&'a Token>,
}

impl<'a> Scanner<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            sig: tokens.iter().filter(|t| !t.is_trivia()).collect(),
        }
    }

    fn get(&self, i: usize) -> Option<&'a Token> {
        self.sig.get(i).copied()
    }

    fn keyword_at(&self, i: usize, keyword: &str) -> bool {
        self.get(i).map_or(false, |t| t.is_keyword(keyword))
    }

    fn punct_at(&self, i: usize, punct: &str) -> bool {
        self.get(i).map_or(false, |t| t.is_punct(punct))
    }

    /// Index of the `)` matching the `(` at `open`
    fn matching_paren(&self, open: usize) -> usize {
        let mut depth = 0usize;
        for i in open..self.sig.len() {
            if self.sig[i].is_punct("(") {
                depth += 1;
            } else if self.sig[i].is_punct(")") {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i;
                }
            }
        }
        self.sig.len()
    }

    fn identifier_at(&self, i: usize) -> Option<String> {
        self.get(i).and_then(|t| t.identifier())
    }

    fn collect_cte_names(&self, names: &mut HashSet<String>) {
        for i in 0..self.sig.len() {
            if !self.keyword_at(i, "WITH") {
                continue;
            }
            let mut j = i + 1;
            if self.keyword_at(j, "RECURSIVE") {
                j += 1;
            }
            loop {
                let Some(name) = self.identifier_at(j) else { break };
                j += 1;
                if self.punct_at(j, "(") {
                    j = self.matching_paren(j) + 1;
                }
                if !self.keyword_at(j, "AS") {
                    break;
                }
                j += 1;
                if self.keyword_at(j, "NOT") {
                    j += 1;
                }
                if self.keyword_at(j, "MATERIALIZED") {
                    j += 1;
                }
                if !self.punct_at(j, "(") {
                    break;
                }
                names.insert(name.to_lowercase());
                j = self.matching_paren(j) + 1;
                if self.punct_at(j, ",") {
                    j += 1;
                } else {
                    break;
                }
            }
        }
    }

    /// Parses one table reference at `j`; returns the index after it
    fn table_ref_at(
        &self,
        mut j: usize,
        refs: &mut StatementReferences,
        consumed: &mut HashSet<usize>,
    ) -> usize {
        if self.keyword_at(j, "LATERAL") || self.keyword_at(j, "ONLY") {
            j += 1;
        }
        if self.punct_at(j, "(") {
            let close = self.matching_paren(j);
            j = close + 1;
            if let Some(alias) = self.alias_at(&mut j) {
                refs.derived_aliases.insert(alias.to_lowercase());
            }
            return j;
        }
        let Some(first) = self.get(j) else { return j };
        if first.identifier().is_none() || is_clause_keyword(first) {
            return j;
        }

        let mut parts = Vec::new();
        let start = j;
        while let Some(part) = self.identifier_at(j) {
            parts.push(part);
            consumed.insert(j);
            if self.punct_at(j + 1, ".") && self.identifier_at(j + 2).is_some() {
                consumed.insert(j + 1);
                j += 2;
            } else {
                j += 1;
                break;
            }
        }
        // Table-valued function, not a table.
        if self.punct_at(j, "(") {
            for k in start..j {
                consumed.remove(&k);
            }
            return self.matching_paren(j) + 1;
        }
        let alias = self.alias_at(&mut j);
        if let Some(name) = parts.last() {
            refs.tables.push(TableRef {
                name: name.clone(),
                qualified_name: parts.join("."),
                alias,
            });
        }
        j
    }

    fn alias_at(&self, j: &mut usize) -> Option<String> {
        if self.keyword_at(*j, "AS") {
            let alias = self.identifier_at(*j + 1);
            if alias.is_some() {
                *j += 2;
            }
            return alias;
        }
        match self.get(*j) {
            Some(t) if t.identifier().is_some() && !is_clause_keyword(t) => {
                *j += 1;
                t.identifier()
            }
            _ => None,
        }
    }

    fn extract(&self) -> StatementReferences {
        let mut refs = StatementReferences::default();
        self.collect_cte_names(&mut refs.cte_names);

        let mut consumed: HashSet<usize> = HashSet::new();
        // One frame per parenthesis level: has a SELECT been seen at this level?
        let mut frames: Vec<bool> = vec![false];
        let mut i = 0;
        while i < self.sig.len() {
            let token = self.sig[i];
            if token.is_punct("(") {
                frames.push(false);
            } else if token.is_punct(")") {
                if frames.len() > 1 {
                    frames.pop();
                }
            } else if token.is_keyword("SELECT") {
                if let Some(frame) = frames.last_mut() {
                    *frame = true;
                }
            } else if (token.is_keyword("FROM") || token.is_keyword("JOIN"))
                && frames.last().copied().unwrap_or(false)
                && !self.is_distinct_from(i)
            {
                let mut j = self.table_ref_at(i + 1, &mut refs, &mut consumed);
                while token.is_keyword("FROM") && self.punct_at(j, ",") {
                    j = self.table_ref_at(j + 1, &mut refs, &mut consumed);
                }
            }
            i += 1;
        }

        self.collect_columns(&consumed, &mut refs);
        refs
    }

    fn is_distinct_from(&self, i: usize) -> bool {
        i >= 2
            && self.keyword_at(i - 1, "DISTINCT")
            && (self.keyword_at(i - 2, "IS") || self.keyword_at(i - 2, "NOT"))
    }

    fn collect_columns(&self, consumed: &HashSet<usize>, refs: &mut StatementReferences) {
        let mut seen = HashSet::new();
        let mut i = 0;
        while i < self.sig.len() {
            let starts_chain = self.identifier_at(i).is_some()
                && !consumed.contains(&i)
                && (i == 0 || !self.punct_at(i - 1, "."));
            if !starts_chain {
                i += 1;
                continue;
            }
            let mut parts = vec![self.identifier_at(i).unwrap_or_default()];
            let mut j = i + 1;
            while self.punct_at(j, ".") {
                match self.identifier_at(j + 1) {
                    Some(part) => {
                        parts.push(part);
                        j += 2;
                    }
                    None => break,
                }
            }
            let is_call = self.punct_at(j, "(");
            if parts.len() >= 2 && !is_call {
                let column = ColumnRef {
                    qualifier: parts[parts.len() - 2].clone(),
                    column: parts[parts.len() - 1].clone(),
                };
                if seen.insert(column.clone()) {
                    refs.columns.push(column);
                }
            }
            i = j;
        }
    }
}

pub fn extract_references(sql: &str) -> StatementReferences {
    let tokens = tokenize(sql);
    Scanner::new(&tokens).extract()
}

/// Removes a trailing top-level `LIMIT`/`OFFSET`/`FETCH` clause
pub fn strip_top_level_limit(sql: &str) -> String {
    let trimmed = trim_statement(sql);
    let tokens = tokenize(trimmed);
    let sig = significant_indices(&tokens);

    let mut depth = 0i32;
    let mut cut: Option<usize> = None;
    for &idx in &sig {
        let token = &tokens[idx];
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            cut = None;
        } else if depth == 0 {
            let starts_clause = token.is_keyword("LIMIT")
                || token.is_keyword("OFFSET")
                || token.is_keyword("FETCH");
            if starts_clause && cut.is_none() {
                cut = Some(idx);
            } else if cut.is_some() && !is_limit_clause_token(token) {
                cut = None;
            }
        }
    }

    match cut {
        Some(idx) => render(&tokens[..idx]).trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

fn is_limit_clause_token(token: &Token) -> bool {
    const WORDS: [&str; 9] = ["LIMIT", "OFFSET", "FETCH", "FIRST", "NEXT", "ROWS", "ROW", "ONLY", "ALL"];
    match token.kind {
        TokenKind::Number => true,
        TokenKind::Punct => matches!(token.text.as_str(), "," | "?" | "$"),
        TokenKind::Word => WORDS.iter().any(|w| token.text.eq_ignore_ascii_case(w)),
        _ => false,
    }
}

pub fn has_top_level_limit(sql: &str) -> bool {
    strip_top_level_limit(sql) != trim_statement(sql)
}

/// Trims whitespace, plus trailing semicolons and comments, so clauses can be appended
pub fn trim_statement(sql: &str) -> &str {
    let mut offset = 0;
    let mut end = 0;
    for token in tokenize(sql) {
        offset += token.text.len();
        if !token.is_trivia() && !token.is_punct(";") {
            end = offset;
        }
    }
    sql[..end].trim_start()
}

/// Collapses whitespace outside literals; case is preserved
pub fn normalize_whitespace(sql: &str) -> String {
    let tokens = tokenize(trim_statement(sql));
    let mut out = String::with_capacity(sql.len());
    for token in &tokens {
        if token.kind == TokenKind::Whitespace {
            out.push(' ');
        } else {
            out.push_str(&token.text);
        }
    }
    out.trim().to_string()
}
