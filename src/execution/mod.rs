//! Execution layer: result cache, driver error classification, the execution engine
//! and its result types

pub mod cache;
pub mod engine;
pub mod error_classifier;
pub mod result;

pub use cache::{cache_key, CacheKey, ResultCache};
pub use engine::ExecutionEngine;
pub use error_classifier::ErrorClassifier;
pub use result::{ExecutionMode, ExecutionRequest, ExecutionResult, StreamEvent};
