//! Schema Embedder
//!
//! Embeds table descriptions and query text. `OpenAiEmbedder` calls the embeddings
//! API; `HashingEmbedder` is a deterministic local fallback used offline and in tests.

use crate::error::{QueryError, Result};
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using OpenAI API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String, // e.g., "text-embedding-3-small"
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Connection(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(QueryError::Unknown(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            QueryError::Unknown(format!("Failed to parse embedding response: {}", e))
        })?;

        let embedding: Vec<f32> = response_json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|data| data.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| QueryError::Unknown("No embedding vector in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "by", "for", "in", "on", "to", "and", "or", "with", "per", "from",
    "show", "me", "list", "top", "all", "what", "which", "who", "how", "many", "much", "is",
    "are", "was", "were", "columns", "column", "table", "tables", "each", "their", "its",
];

/// Feature-hashing embedder over identifier-aware word tokens.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for term in terms(text) {
            let mut hasher = DefaultHasher::new();
            term.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }
}

/// Lowercased terms: splits on punctuation, snake_case and camelCase, drops
/// stopwords and numbers, and folds simple plurals.
pub fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        for piece in split_camel_case(word) {
            let lower = piece.to_lowercase();
            if lower.is_empty()
                || lower.chars().all(|c| c.is_ascii_digit())
                || STOPWORDS.contains(&lower.as_str())
            {
                continue;
            }
            out.push(singularize(&lower));
        }
    }
    out
}

fn split_camel_case(word: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = word.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let boundary = c.is_uppercase()
            && i > 0
            && (chars[i - 1].is_lowercase()
                || chars.get(i + 1).map_or(false, |n| n.is_lowercase()) && chars[i - 1].is_uppercase());
        if boundary && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn singularize(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
