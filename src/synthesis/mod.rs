//! Generation, validation and single-pass repair of SQL candidates

pub mod repairer;
pub mod synthesizer;
pub mod validator;

pub use repairer::SqlRepairer;
pub use synthesizer::{extract_sql, SqlSynthesizer};
pub use validator::{SqlValidator, ValidationIssue, ValidationResult};
