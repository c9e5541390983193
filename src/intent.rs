//! Query Intent and SQL Candidate
//!
//! `QueryIntent` is produced upstream by the query analyzer and is read-only here.
//! `SqlCandidate` is an unvalidated statement produced by the synthesizer.

use crate::dialect::Dialect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    pub natural_query: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub aggregation_hints: Vec<String>,
    #[serde(default)]
    pub filter_hints: Vec<String>,
    #[serde(default)]
    pub sort_hints: Vec<String>,
    #[serde(default)]
    pub conversation_context: Option<String>,
}

impl QueryIntent {
    pub fn new(natural_query: impl Into<String>) -> Self {
        Self {
            natural_query: natural_query.into(),
            ..Default::default()
        }
    }
}

/// Maximum number of synthesis attempts per request (initial + one repair)
pub const MAX_GENERATION_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlCandidate {
    pub text: String,
    pub dialect: Dialect,
    pub source_intent_id: String,
    pub generation_attempt: u8,
}

impl SqlCandidate {
    pub fn can_repair(&self) -> bool {
        self.generation_attempt < MAX_GENERATION_ATTEMPTS
    }
}
