//! Data Summary
//!
//! Per-column type inference and statistics over normalized rows.

use crate::result_shaper::normalize::canonical_date;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Boolean,
    Date,
    Text,
    /// Every value is null
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnStats {
    #[serde(rename_all = "camelCase")]
    Numeric { min: f64, max: f64, avg: f64 },
    #[serde(rename_all = "camelCase")]
    Boolean { true_count: usize, false_count: usize },
    #[serde(rename_all = "camelCase")]
    Text { unique_count: usize, avg_length: f64 },
    #[serde(rename_all = "camelCase")]
    Date { min: String, max: String, unique_count: usize },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSummary {
    pub name: String,
    pub inferred_type: ColumnType,
    pub null_count: usize,
    pub stats: ColumnStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnSummary>,
}

impl DataSummary {
    pub fn columns_of(&self, column_type: ColumnType) -> impl Iterator<Item = &ColumnSummary> {
        self.columns
            .iter()
            .filter(move |c| c.inferred_type == column_type)
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnType {
    let mut present = values.filter(|v| !v.is_null()).peekable();
    if present.peek().is_none() {
        return ColumnType::Null;
    }
    let present: Vec<&Value> = present.collect();
    if present.iter().all(|v| v.is_number()) {
        ColumnType::Numeric
    } else if present.iter().all(|v| v.is_boolean()) {
        ColumnType::Boolean
    } else if present
        .iter()
        .all(|v| v.as_str().map_or(false, |s| canonical_date(s).is_some()))
    {
        ColumnType::Date
    } else {
        ColumnType::Text
    }
}

fn column_stats(column_type: ColumnType, values: &[&Value]) -> ColumnStats {
    match column_type {
        ColumnType::Numeric => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                return ColumnStats::Empty;
            }
            let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
            ColumnStats::Numeric { min, max, avg }
        }
        ColumnType::Boolean => {
            let true_count = values.iter().filter(|v| v.as_bool() == Some(true)).count();
            ColumnStats::Boolean {
                true_count,
                false_count: values.len() - true_count,
            }
        }
        ColumnType::Date => {
            let dates: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
            let unique: HashSet<&str> = dates.iter().copied().collect();
            match (dates.iter().min(), dates.iter().max()) {
                (Some(min), Some(max)) => ColumnStats::Date {
                    min: min.to_string(),
                    max: max.to_string(),
                    unique_count: unique.len(),
                },
                _ => ColumnStats::Empty,
            }
        }
        ColumnType::Text => {
            let texts: Vec<String> = values.iter().map(|v| text_of(v)).collect();
            let unique: HashSet<&String> = texts.iter().collect();
            let total_chars: usize = texts.iter().map(|t| t.chars().count()).sum();
            ColumnStats::Text {
                unique_count: unique.len(),
                avg_length: if texts.is_empty() {
                    0.0
                } else {
                    total_chars as f64 / texts.len() as f64
                },
            }
        }
        ColumnType::Null => ColumnStats::Empty,
    }
}

pub fn summarize(columns: &[String], rows: &[Vec<Value>]) -> DataSummary {
    let summaries = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let cells = rows.iter().filter_map(|row| row.get(i));
            let inferred_type = infer_type(cells.clone());
            let present: Vec<&Value> = cells.clone().filter(|v| !v.is_null()).collect();
            ColumnSummary {
                name: name.clone(),
                inferred_type,
                null_count: rows.len() - present.len(),
                stats: column_stats(inferred_type, &present),
            }
        })
        .collect();

    DataSummary {
        row_count: rows.len(),
        column_count: columns.len(),
        columns: summaries,
    }
}
