//! Context Builder
//!
//! Renders retrieved tables into the schema section of the synthesis prompt.

use crate::error::Result;
use crate::schema_rag::retriever::{SchemaIndex, ScoredTable};
use crate::schema_rag::schema::{ColumnSchema, TableSchema};
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

const TABLE_SEPARATOR: &str = "\n\n";

pub struct ContextBuilder {
    index: Arc<SchemaIndex>,
    top_k: usize,
}

/// Built context plus the tables it contains
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    pub text: String,
    pub tables: Vec<String>,
}

impl ContextBuilder {
    pub fn new(index: Arc<SchemaIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }

    pub async fn build(&self, query_text: &str, max_chars: usize) -> Result<String> {
        Ok(self.build_context(query_text, max_chars).await?.text)
    }

    pub async fn build_context(&self, query_text: &str, max_chars: usize) -> Result<SchemaContext> {
        let scored = self.index.search(query_text, self.top_k).await?;
        let context = assemble(&scored, max_chars);
        debug!(
            "Schema context: {} of {} retrieved tables, {} chars",
            context.tables.len(),
            scored.len(),
            context.text.len()
        );
        Ok(context)
    }
}

/// Appends whole table descriptions in order until the next one would not fit
pub fn assemble(scored: &[ScoredTable], max_chars: usize) -> SchemaContext {
    let mut context = SchemaContext::default();
    for entry in scored {
        let description = describe_table(&entry.table);
        let separator = if context.text.is_empty() { 0 } else { TABLE_SEPARATOR.len() };
        if context.text.len() + separator + description.len() > max_chars {
            break;
        }
        if separator > 0 {
            context.text.push_str(TABLE_SEPARATOR);
        }
        context.text.push_str(&description);
        context.tables.push(entry.table.name.clone());
    }
    context
}

fn describe_column(column: &ColumnSchema) -> String {
    let mut line = format!("  - {} {}", column.name, column.data_type);
    if column.is_primary_key {
        line.push_str(" PRIMARY KEY");
    }
    if column.is_unique && !column.is_primary_key {
        line.push_str(" UNIQUE");
    }
    if !column.nullable && !column.is_primary_key {
        line.push_str(" NOT NULL");
    }
    if let Some(ref comment) = column.comment {
        line.push_str(&format!(" -- {}", comment));
    }
    line
}

pub fn describe_table(table: &TableSchema) -> String {
    let mut out = format!("Table: {}", table.name);
    if let Some(ref comment) = table.comment {
        out.push_str(&format!(" -- {}", comment));
    }
    out.push_str("\nColumns:\n");
    out.push_str(&table.columns.iter().map(describe_column).join("\n"));
    if !table.foreign_keys.is_empty() {
        out.push_str("\nForeign keys:\n");
        out.push_str(
            &table
                .foreign_keys
                .iter()
                .map(|fk| {
                    format!(
                        "  - {}.{} -> {}.{}",
                        table.name, fk.column, fk.referenced_table, fk.referenced_column
                    )
                })
                .join("\n"),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::schema::ColumnSchema;

    fn scored(table: TableSchema, similarity: f32) -> ScoredTable {
        ScoredTable {
            table: Arc::new(table),
            similarity,
        }
    }

    fn invoice() -> TableSchema {
        TableSchema::new(
            "Invoice",
            vec![
                ColumnSchema::new("id", "INTEGER").primary_key(),
                ColumnSchema::new("customerId", "INTEGER").not_null(),
                ColumnSchema::new("total", "REAL").with_comment("gross amount"),
            ],
        )
        .with_comment("Issued invoices")
        .with_foreign_key("customerId", "Customer", "id")
    }

    #[test]
    fn test_describe_table() {
        let text = describe_table(&invoice());
        assert_eq!(
            text,
            "Table: Invoice -- Issued invoices\nColumns:\n  - id INTEGER PRIMARY KEY\n  \
             - customerId INTEGER NOT NULL\n  - total REAL -- gross amount\nForeign keys:\n  \
             - Invoice.customerId -> Customer.id"
        );
    }

    #[test]
    fn test_assemble_never_splits_a_table() {
        let customer = TableSchema::new("Customer", vec![ColumnSchema::new("id", "INTEGER")]);
        let first_len = describe_table(&invoice()).len();
        let entries = vec![scored(invoice(), 0.9), scored(customer, 0.5)];

        let context = assemble(&entries, first_len + 5);
        assert_eq!(context.tables, vec!["Invoice"]);
        assert_eq!(context.text.len(), first_len);

        let none = assemble(&entries, first_len - 1);
        assert!(none.text.is_empty());

        let both = assemble(&entries, 10_000);
        assert_eq!(both.tables, vec!["Invoice", "Customer"]);
        assert_eq!(assemble(&entries, 10_000).text, both.text);
    }
}
