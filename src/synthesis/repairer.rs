//! SQL Repairer
//!
//! One corrective pass: the validation errors of a first-attempt candidate are fed
//! back to the synthesizer together with the original intent and context.

use crate::error::{QueryError, Result};
use crate::intent::{QueryIntent, SqlCandidate};
use crate::synthesis::synthesizer::SqlSynthesizer;
use crate::synthesis::validator::ValidationResult;
use std::sync::Arc;
use tracing::info;

pub struct SqlRepairer {
    synthesizer: Arc<SqlSynthesizer>,
}

impl SqlRepairer {
    pub fn new(synthesizer: Arc<SqlSynthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Produces the attempt-2 candidate. Candidates that already used their repair
    /// fail with the original errors.
    pub async fn repair(
        &self,
        intent: &QueryIntent,
        context: &str,
        candidate: &SqlCandidate,
        validation: &ValidationResult,
    ) -> Result<SqlCandidate> {
        if !candidate.can_repair() {
            return Err(QueryError::Validation(validation.error_messages()));
        }

        info!(
            "Repairing candidate for intent {} ({} errors)",
            candidate.source_intent_id,
            validation.errors.len()
        );
        self.synthesizer
            .synthesize(
                &candidate.source_intent_id,
                intent,
                context,
                &validation.feedback(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::llm::LlmClient;
    use crate::synthesis::validator::ValidationIssue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLlm(AtomicUsize);

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("SELECT name FROM Customer".to_string())
        }
    }

    fn setup() -> (Arc<CountingLlm>, SqlRepairer) {
        let llm = Arc::new(CountingLlm(AtomicUsize::new(0)));
        let synthesizer = Arc::new(SqlSynthesizer::new(llm.clone(), Dialect::Sqlite));
        (llm, SqlRepairer::new(synthesizer))
    }

    fn candidate(attempt: u8) -> SqlCandidate {
        SqlCandidate {
            text: "SELECT * FROM Customr;".to_string(),
            dialect: Dialect::Sqlite,
            source_intent_id: "req".to_string(),
            generation_attempt: attempt,
        }
    }

    fn failed(issue: ValidationIssue) -> ValidationResult {
        ValidationResult {
            is_valid: false,
            errors: vec![issue],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_repair_produces_second_attempt() {
        let (llm, repairer) = setup();
        let validation = failed(ValidationIssue::UnknownTable {
            table: "Customr".to_string(),
        });
        let repaired = repairer
            .repair(&QueryIntent::new("customers"), "", &candidate(1), &validation)
            .await
            .unwrap();
        assert_eq!(repaired.generation_attempt, 2);
        assert_eq!(repaired.source_intent_id, "req");
        assert_eq!(llm.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_attempt_is_not_repaired() {
        let (llm, repairer) = setup();
        let validation = failed(ValidationIssue::UnknownTable {
            table: "Customr".to_string(),
        });
        let err = repairer
            .repair(&QueryIntent::new("customers"), "", &candidate(2), &validation)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(ref e) if e == &vec!["unknown table: Customr".to_string()]));
        assert_eq!(llm.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_only_violation_gets_one_repair() {
        let (llm, repairer) = setup();
        let validation = failed(ValidationIssue::NotReadOnly {
            keyword: "DROP".to_string(),
        });
        let repaired = repairer
            .repair(&QueryIntent::new("drop it"), "", &candidate(1), &validation)
            .await
            .unwrap();
        assert_eq!(repaired.generation_attempt, 2);
        assert_eq!(llm.0.load(Ordering::SeqCst), 1);
    }
}
