//! PostgreSQL driver using sqlx

use crate::db::{Database, DriverError, DriverResult, QueryRows};
use crate::dialect::Dialect;
use crate::schema_rag::schema::{ColumnSchema, ForeignKeyRef, TableSchema};
use crate::sql::analysis::{statement_keyword, trim_statement};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub struct PostgresDatabase {
    pool: PgPool,
    schema: String,
}

fn driver_error(e: sqlx::Error) -> DriverError {
    DriverError::new(e.to_string())
}

const TABLES_SQL: &str = r#"
    SELECT c.relname::text AS table_name,
           obj_description(c.oid, 'pg_class') AS table_comment
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relkind IN ('r', 'v', 'm', 'p')
    ORDER BY c.relname
"#;

const COLUMNS_SQL: &str = r#"
    SELECT col.table_name::text,
           col.column_name::text,
           col.data_type::text,
           col.is_nullable::text,
           col_description(format('%I.%I', col.table_schema, col.table_name)::regclass::oid,
                           col.ordinal_position::int) AS column_comment
    FROM information_schema.columns col
    WHERE col.table_schema = $1
    ORDER BY col.table_name, col.ordinal_position
"#;

const KEYS_SQL: &str = r#"
    SELECT tc.table_name::text,
           kcu.column_name::text,
           tc.constraint_type::text,
           (SELECT COUNT(*) FROM information_schema.key_column_usage k2
             WHERE k2.constraint_name = tc.constraint_name
               AND k2.table_schema = tc.table_schema)::bigint AS key_width
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
    WHERE tc.table_schema = $1 AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
"#;

const FOREIGN_KEYS_SQL: &str = r#"
    SELECT kcu.table_name::text,
           kcu.column_name::text,
           ccu.table_name::text AS referenced_table,
           ccu.column_name::text AS referenced_column
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
    WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY'
"#;

impl PostgresDatabase {
    pub async fn connect(
        options: PgConnectOptions,
        schema: impl Into<String>,
        max_connections: u32,
    ) -> DriverResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(driver_error)?;

        // Test the connection
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(driver_error)?;

        Ok(Self::from_pool(pool, schema))
    }

    pub fn from_pool(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    async fn fetch(&self, sql: &str) -> DriverResult<Vec<PgRow>> {
        sqlx::query(sql)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await
            .map_err(driver_error)
    }
}

/// Decodes a column whose type is not known ahead of time
fn decode_any(row: &PgRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    Value::Null
}

#[async_trait]
impl Database for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn query(&self, sql: &str) -> DriverResult<QueryRows> {
        let statement = trim_statement(sql);
        let is_query = matches!(
            statement_keyword(statement).as_deref(),
            Some("SELECT") | Some("WITH") | Some("VALUES")
        );

        if !is_query {
            // SHOW / EXPLAIN return text columns
            let rows = sqlx::query(statement)
                .fetch_all(&self.pool)
                .await
                .map_err(driver_error)?;
            let columns: Vec<String> = rows
                .first()
                .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let values = rows
                .iter()
                .map(|r| (0..columns.len()).map(|i| decode_any(r, i)).collect::<Vec<Value>>())
                .collect();
            return Ok(QueryRows {
                columns,
                rows: values,
            });
        }

        // row_to_json keeps column order and handles every type the server can render
        let wrapped = format!(
            "SELECT row_to_json(_r)::text AS _row FROM ({}) AS _r",
            statement
        );
        let rows = sqlx::query(&wrapped)
            .fetch_all(&self.pool)
            .await
            .map_err(driver_error)?;

        let mut columns: Vec<String> = Vec::new();
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let text: String = row.try_get(0).map_err(driver_error)?;
            let object: serde_json::Map<String, Value> = serde_json::from_str(&text)
                .map_err(|e| DriverError::new(format!("Failed to decode row: {}", e)))?;
            if columns.is_empty() {
                columns = object.keys().cloned().collect();
            }
            values.push(object.into_iter().map(|(_, v)| v).collect::<Vec<Value>>());
        }

        Ok(QueryRows {
            columns,
            rows: values,
        })
    }

    async fn load_schema(&self) -> DriverResult<Vec<TableSchema>> {
        let mut tables: Vec<TableSchema> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in self.fetch(TABLES_SQL).await? {
            let name: String = row.try_get(0).map_err(driver_error)?;
            let comment: Option<String> = row.try_get(1).map_err(driver_error)?;
            positions.insert(name.clone(), tables.len());
            tables.push(TableSchema {
                name,
                comment,
                columns: Vec::new(),
                foreign_keys: Vec::new(),
            });
        }

        for row in self.fetch(COLUMNS_SQL).await? {
            let table: String = row.try_get(0).map_err(driver_error)?;
            let Some(&position) = positions.get(&table) else { continue };
            let is_nullable: String = row.try_get(3).map_err(driver_error)?;
            tables[position].columns.push(ColumnSchema {
                name: row.try_get(1).map_err(driver_error)?,
                data_type: row.try_get(2).map_err(driver_error)?,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                comment: row.try_get(4).map_err(driver_error)?,
                is_primary_key: false,
                is_unique: false,
            });
        }

        for row in self.fetch(KEYS_SQL).await? {
            let table: String = row.try_get(0).map_err(driver_error)?;
            let column: String = row.try_get(1).map_err(driver_error)?;
            let constraint: String = row.try_get(2).map_err(driver_error)?;
            let width: i64 = row.try_get(3).map_err(driver_error)?;
            let Some(&position) = positions.get(&table) else { continue };
            if let Some(col) = tables[position].columns.iter_mut().find(|c| c.name == column) {
                if constraint == "PRIMARY KEY" {
                    col.is_primary_key = true;
                }
                if width == 1 {
                    col.is_unique = true;
                }
            }
        }

        for row in self.fetch(FOREIGN_KEYS_SQL).await? {
            let table: String = row.try_get(0).map_err(driver_error)?;
            let Some(&position) = positions.get(&table) else { continue };
            tables[position].foreign_keys.push(ForeignKeyRef {
                column: row.try_get(1).map_err(driver_error)?,
                referenced_table: row.try_get(2).map_err(driver_error)?,
                referenced_column: row.try_get(3).map_err(driver_error)?,
            });
        }

        debug!("Loaded {} tables from schema {}", tables.len(), self.schema);
        Ok(tables)
    }
}
