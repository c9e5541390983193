//! Query Optimizer
//!
//! Ordered, token-level rewrite rules. Every rule is a no-op when it does not apply,
//! and no rule matches its own output, so running the optimizer twice changes nothing.
//! Join-order and column-pruning observations are reported as hints only.

use crate::dialect::{Dialect, DialectRules};
use crate::sql::tokenizer::{render, significant_indices, tokenize, Token, TokenKind};
use crate::sql::{extract_references, has_top_level_limit, trim_statement};
use serde::Serialize;
use tracing::debug;

pub const RULE_TOP_TO_LIMIT: &str = "dialect_top_to_limit";
pub const RULE_QUOTE_NORMALIZATION: &str = "quote_normalization";
pub const RULE_REDUNDANT_SUBQUERY: &str = "redundant_subquery_removal";

/// Upper bound on fixpoint passes of the subquery rule
const MAX_SUBQUERY_PASSES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedQuery {
    pub sql: String,
    pub applied_rules: Vec<String>,
    /// Advisory notes; never reflected in `sql`
    pub hints: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryOptimizer;

impl QueryOptimizer {
    pub fn new() -> Self {
        Self
    }

    pub fn optimize(&self, sql: &str, dialect: Dialect) -> OptimizedQuery {
        let rules = dialect.rules();
        let had_semicolon = sql.trim_end().ends_with(';');
        let mut current = trim_statement(sql).to_string();
        let mut applied_rules = Vec::new();

        if rules.rewrite_top_to_limit {
            if let Some(rewritten) = rewrite_top_to_limit(&current) {
                current = rewritten;
                applied_rules.push(RULE_TOP_TO_LIMIT.to_string());
            }
        }

        if let Some(rewritten) = normalize_quotes(&current, rules) {
            current = rewritten;
            applied_rules.push(RULE_QUOTE_NORMALIZATION.to_string());
        }

        if let Some(rewritten) = remove_redundant_subqueries(&current) {
            current = rewritten;
            applied_rules.push(RULE_REDUNDANT_SUBQUERY.to_string());
        }

        if had_semicolon {
            current.push(';');
        }
        let hints = advisory_hints(&current);

        if !applied_rules.is_empty() {
            debug!("Optimizer applied rules: {:?}", applied_rules);
        }

        OptimizedQuery {
            sql: current,
            applied_rules,
            hints,
        }
    }
}

/// `SELECT [DISTINCT] TOP n ...` becomes `SELECT [DISTINCT] ... LIMIT n`
fn rewrite_top_to_limit(sql: &str) -> Option<String> {
    let tokens = tokenize(sql);
    let sig = significant_indices(&tokens);
    let at = |pos: usize| sig.get(pos).map(|&i| &tokens[i]);

    if !at(0)?.is_keyword("SELECT") {
        return None;
    }
    let mut pos = 1;
    if at(pos).map_or(false, |t| t.is_keyword("DISTINCT") || t.is_keyword("ALL")) {
        pos += 1;
    }
    if !at(pos)?.is_keyword("TOP") {
        return None;
    }
    let top_start = sig[pos];

    let (count, last_pos) = match at(pos + 1) {
        Some(t) if t.kind == TokenKind::Number => (t.text.clone(), pos + 1),
        Some(t) if t.is_punct("(") => {
            let n = at(pos + 2)?;
            if n.kind != TokenKind::Number || !at(pos + 3)?.is_punct(")") {
                return None;
            }
            (n.text.clone(), pos + 3)
        }
        _ => return None,
    };
    if !count.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // TOP n PERCENT and WITH TIES have no LIMIT equivalent
    if at(last_pos + 1).map_or(false, |t| t.is_keyword("PERCENT") || t.is_keyword("WITH")) {
        return None;
    }
    if has_top_level_limit(sql) || has_top_level_set_operator(&tokens, &sig) {
        return None;
    }

    let mut end = sig[last_pos] + 1;
    while end < tokens.len() && tokens[end].kind == TokenKind::Whitespace {
        end += 1;
    }
    let body = format!("{}{}", render(&tokens[..top_start]), render(&tokens[end..]));
    Some(format!("{} LIMIT {}", body.trim_end(), count))
}

/// TOP binds to its own branch, LIMIT to the whole compound query
fn has_top_level_set_operator(tokens: &[Token], sig: &[usize]) -> bool {
    let mut depth = 0i32;
    for &i in sig {
        let token = &tokens[i];
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
        } else if depth == 0
            && (token.is_keyword("UNION") || token.is_keyword("INTERSECT") || token.is_keyword("EXCEPT"))
        {
            return true;
        }
    }
    false
}

/// Re-quotes identifiers with the dialect's quote character. Double quotes are left
/// alone for MySQL, where they usually delimit strings.
fn normalize_quotes(sql: &str, rules: &DialectRules) -> Option<String> {
    let quote = rules.identifier_quote;
    let mut tokens = tokenize(sql);
    let mut changed = false;

    for token in tokens.iter_mut().filter(|t| t.kind == TokenKind::QuotedIdent) {
        let open = token.text.chars().next().unwrap_or(quote);
        let convert = match open {
            '[' => rules.rewrite_bracket_identifiers,
            '"' => false,
            c => c != quote,
        };
        if !convert {
            continue;
        }
        if let Some(name) = token.identifier() {
            let escaped = name.replace(quote, &format!("{}{}", quote, quote));
            token.text = format!("{}{}{}", quote, escaped, quote);
            changed = true;
        }
    }

    changed.then(|| render(&tokens))
}

/// `FROM (SELECT * FROM t) alias` becomes `FROM t alias`, repeated to a fixpoint
fn remove_redundant_subqueries(sql: &str) -> Option<String> {
    let mut current = sql.to_string();
    let mut changed = false;
    for _ in 0..MAX_SUBQUERY_PASSES {
        match remove_one_redundant_subquery(&current) {
            Some(next) => {
                current = next;
                changed = true;
            }
            None => break,
        }
    }
    changed.then_some(current)
}

fn is_name_token(token: &Token) -> bool {
    matches!(token.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

fn remove_one_redundant_subquery(sql: &str) -> Option<String> {
    let tokens = tokenize(sql);
    let sig = significant_indices(&tokens);
    let at = |pos: usize| sig.get(pos).map(|&i| &tokens[i]);

    for pos in 1..sig.len() {
        let prev = &tokens[sig[pos - 1]];
        if !(prev.is_keyword("FROM") || prev.is_keyword("JOIN")) || !tokens[sig[pos]].is_punct("(") {
            continue;
        }
        let matches_head = at(pos + 1).map_or(false, |t| t.is_keyword("SELECT"))
            && at(pos + 2).map_or(false, |t| t.is_punct("*"))
            && at(pos + 3).map_or(false, |t| t.is_keyword("FROM"));
        if !matches_head {
            continue;
        }

        // Dotted table name followed directly by the closing paren
        let name_start = pos + 4;
        let mut name_end = name_start;
        if !at(name_end).map_or(false, is_name_token) {
            continue;
        }
        while at(name_end + 1).map_or(false, |t| t.is_punct("."))
            && at(name_end + 2).map_or(false, is_name_token)
        {
            name_end += 2;
        }
        if !at(name_end + 1).map_or(false, |t| t.is_punct(")")) {
            continue;
        }

        let open = sig[pos];
        let close = sig[name_end + 1];
        let name = render(&tokens[sig[name_start]..=sig[name_end]]);
        return Some(format!(
            "{}{}{}",
            render(&tokens[..open]),
            name,
            render(&tokens[close + 1..])
        ));
    }
    None
}

fn advisory_hints(sql: &str) -> Vec<String> {
    let refs = extract_references(sql);
    let base = refs.base_tables();
    let tables: Vec<&str> = base.iter().map(|t| t.name.as_str()).collect();
    let mut hints = Vec::new();

    if tables.len() >= 2 {
        hints.push(format!(
            "join order: {} tables joined ({}); filter the most selective table first",
            tables.len(),
            tables.join(", ")
        ));
    }

    let tokens = tokenize(sql);
    let sig = significant_indices(&tokens);
    let star_projection = sig.len() >= 2
        && tokens[sig[0]].is_keyword("SELECT")
        && tokens[sig[1]].is_punct("*");
    if star_projection && tables.len() >= 2 {
        hints.push("column pruning: SELECT * over a join returns every column of every table".to_string());
    }
    hints
}
