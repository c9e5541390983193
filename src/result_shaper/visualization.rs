//! Chart suggestions from a data summary, ranked by fixed confidence scores

use crate::result_shaper::summary::{ColumnStats, ColumnType, DataSummary};
use serde::{Deserialize, Serialize};

/// Text columns with at most this many distinct values can be shown as a pie
const PIE_MAX_CATEGORIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Table,
    Bar,
    Line,
    Scatter,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSuggestion {
    pub chart_type: ChartType,
    pub confidence: f64,
    pub x_column: Option<String>,
    pub y_column: Option<String>,
    pub reason: String,
}

impl VisualizationSuggestion {
    fn new(chart_type: ChartType, confidence: f64, reason: &str) -> Self {
        Self {
            chart_type,
            confidence,
            x_column: None,
            y_column: None,
            reason: reason.to_string(),
        }
    }

    fn axes(mut self, x: Option<&str>, y: Option<&str>) -> Self {
        self.x_column = x.map(String::from);
        self.y_column = y.map(String::from);
        self
    }
}

fn column_names(summary: &DataSummary, column_type: ColumnType) -> Vec<&str> {
    summary
        .columns_of(column_type)
        .map(|c| c.name.as_str())
        .collect()
}

pub fn suggest(summary: &DataSummary) -> Vec<VisualizationSuggestion> {
    let numeric = column_names(summary, ColumnType::Numeric);
    let text = column_names(summary, ColumnType::Text);
    let dates = column_names(summary, ColumnType::Date);

    let mut suggestions = vec![VisualizationSuggestion::new(
        ChartType::Table,
        1.0,
        "tabular view is always available",
    )];

    if !numeric.is_empty() && !text.is_empty() {
        suggestions.push(
            VisualizationSuggestion::new(ChartType::Bar, 0.9, "numeric values by category")
                .axes(text.first().copied(), numeric.first().copied()),
        );
    }
    if !dates.is_empty() && !numeric.is_empty() {
        suggestions.push(
            VisualizationSuggestion::new(ChartType::Line, 0.85, "numeric values over time")
                .axes(dates.first().copied(), numeric.first().copied()),
        );
    }
    if numeric.len() >= 2 {
        suggestions.push(
            VisualizationSuggestion::new(ChartType::Scatter, 0.8, "two numeric measures")
                .axes(Some(numeric[0]), Some(numeric[1])),
        );
    }

    let pie_column = summary.columns_of(ColumnType::Text).find(|c| {
        matches!(c.stats, ColumnStats::Text { unique_count, .. } if unique_count > 0 && unique_count <= PIE_MAX_CATEGORIES)
    });
    if let Some(column) = pie_column {
        suggestions.push(
            VisualizationSuggestion::new(ChartType::Pie, 0.7, "few distinct categories")
                .axes(Some(column.name.as_str()), numeric.first().copied()),
        );
    }

    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    suggestions
}
