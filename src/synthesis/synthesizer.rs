//! SQL Synthesizer
//!
//! Builds one prompt from the dialect, schema context and intent, calls the language
//! model once and extracts a single normalized statement from the reply.

use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::intent::{QueryIntent, SqlCandidate};
use crate::llm::LlmClient;
use crate::sql::{tokenize, trim_statement};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SqlSynthesizer {
    llm: Arc<dyn LlmClient>,
    dialect: Dialect,
}

impl SqlSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, dialect: Dialect) -> Self {
        Self { llm, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Generates a candidate. A non-empty `prior_errors` marks a repair pass
    /// (generation attempt 2) and is quoted verbatim in the prompt.
    pub async fn synthesize(
        &self,
        intent_id: &str,
        intent: &QueryIntent,
        context: &str,
        prior_errors: &[String],
    ) -> Result<SqlCandidate> {
        let prompt = build_prompt(self.dialect, intent, context, prior_errors);
        let attempt = if prior_errors.is_empty() { 1 } else { 2 };
        debug!("Synthesis attempt {} for intent {}", attempt, intent_id);

        let response = self.llm.complete(&prompt).await.map_err(|e| match e {
            QueryError::Generation(_) => e,
            other => QueryError::Generation(other.to_string()),
        })?;

        let text = extract_sql(&response).ok_or_else(|| {
            warn!("Language model returned no SQL for intent {}", intent_id);
            QueryError::Generation("Language model returned no SQL".to_string())
        })?;

        Ok(SqlCandidate {
            text,
            dialect: self.dialect,
            source_intent_id: intent_id.to_string(),
            generation_attempt: attempt,
        })
    }
}

fn push_hints(prompt: &mut String, label: &str, hints: &[String]) {
    if !hints.is_empty() {
        prompt.push_str(&format!("{}: {}\n", label, hints.join("; ")));
    }
}

pub fn build_prompt(
    dialect: Dialect,
    intent: &QueryIntent,
    context: &str,
    prior_errors: &[String],
) -> String {
    let mut prompt = format!(
        "Write one read-only {} SQL query that answers the question below.\n\
         Use only the tables and columns listed in the schema. Qualify columns with their \
         table name or alias. Return only the SQL, without explanation.\n\n\
         Schema:\n{}\n\n",
        dialect.display_name(),
        if context.is_empty() { "(no matching tables)" } else { context }
    );

    prompt.push_str(&format!("Question: {}\n", intent.natural_query));
    push_hints(&mut prompt, "Entities", &intent.entities);
    push_hints(&mut prompt, "Aggregations", &intent.aggregation_hints);
    push_hints(&mut prompt, "Filters", &intent.filter_hints);
    push_hints(&mut prompt, "Sorting", &intent.sort_hints);
    if let Some(ref conversation) = intent.conversation_context {
        prompt.push_str(&format!("Conversation so far: {}\n", conversation));
    }

    if !prior_errors.is_empty() {
        prompt.push_str("\nThe previous query was rejected with these errors:\n");
        for error in prior_errors {
            prompt.push_str(&format!("- {}\n", error));
        }
        prompt.push_str("Fix every error above and return the corrected query.\n");
    }

    prompt
}

/// Pulls the statement out of a model reply: code fences and comments are removed,
/// whitespace collapsed, and the result always ends with exactly one `;`.
pub fn extract_sql(response: &str) -> Option<String> {
    let body = match response.find("```") {
        Some(open) => {
            let after = &response[open + 3..];
            // Skip a language tag such as ```sql
            let after = match after.find('\n') {
                Some(nl) if after[..nl].trim().chars().all(|c| c.is_alphanumeric()) => &after[nl + 1..],
                _ => after,
            };
            match after.find("```") {
                Some(close) => &after[..close],
                None => after,
            }
        }
        None => response,
    };

    // Comments go before whitespace is collapsed; a `--` comment would otherwise
    // swallow the rest of the statement
    let mut collapsed = String::with_capacity(body.len());
    for token in tokenize(body) {
        if token.is_trivia() {
            if !collapsed.is_empty() && !collapsed.ends_with(' ') {
                collapsed.push(' ');
            }
        } else {
            collapsed.push_str(&token.text);
        }
    }
    let statement = trim_statement(&collapsed);
    if statement.is_empty() {
        return None;
    }
    Some(format!("{};", statement))
}
