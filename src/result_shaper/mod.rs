//! Result Shaper
//!
//! Post-processes raw rows: value normalization, masking of sensitive columns, a data
//! summary and ranked visualization suggestions.

pub mod normalize;
pub mod summary;
pub mod visualization;

pub use normalize::{canonical_date, mask_text, mask_value, normalize_value};
pub use summary::{summarize, ColumnStats, ColumnSummary, ColumnType, DataSummary};
pub use visualization::{suggest, ChartType, VisualizationSuggestion};

use crate::config::ShapingConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub data_summary: DataSummary,
    pub visualization_suggestions: Vec<VisualizationSuggestion>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultShaper {
    masked_columns: HashSet<String>,
}

impl ResultShaper {
    pub fn new(config: &ShapingConfig) -> Self {
        Self {
            masked_columns: config
                .masked_columns
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
        }
    }

    fn is_masked(&self, column: &str) -> bool {
        self.masked_columns.contains(&column.to_lowercase())
    }

    /// Normalizes values and masks configured columns without summarizing
    pub fn mask_rows(&self, columns: &[String], rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
        let mask: Vec<bool> = columns.iter().map(|c| self.is_masked(c)).collect();
        let masked_count = mask.iter().filter(|m| **m).count();

        let rows: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let value = normalize_value(value);
                        if mask.get(i).copied().unwrap_or(false) {
                            mask_value(&value)
                        } else {
                            value
                        }
                    })
                    .collect()
            })
            .collect();

        if masked_count > 0 {
            debug!("Masked {} column(s) over {} rows", masked_count, rows.len());
        }
        rows
    }

    pub fn shape(&self, columns: Vec<String>, rows: Vec<Vec<Value>>) -> ShapedResult {
        let rows = self.mask_rows(&columns, rows);
        let data_summary = summarize(&columns, &rows);
        let visualization_suggestions = suggest(&data_summary);
        ShapedResult {
            columns,
            rows,
            data_summary,
            visualization_suggestions,
        }
    }
}
