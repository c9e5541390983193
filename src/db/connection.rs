//! Database connection management

use crate::config::DatabaseConfig;
use crate::db::{Database, PostgresDatabase, SqliteDatabase};
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use sqlx::postgres::PgConnectOptions;
use std::sync::Arc;
use tracing::info;

/// Opens the driver matching the configured dialect
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
    match config.dialect {
        Dialect::PostgreSql => {
            let options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database);
            let db = PostgresDatabase::connect(options, config.schema.clone(), config.max_connections)
                .await
                .map_err(|e| QueryError::Connection(e.0))?;
            info!(
                "Connected to PostgreSQL {}:{}/{}",
                config.host, config.port, config.database
            );
            Ok(Arc::new(db))
        }
        Dialect::Sqlite => {
            let db = if config.database == ":memory:" {
                SqliteDatabase::open_in_memory()
            } else {
                SqliteDatabase::open_read_only(&config.database)
            }
            .map_err(|e| QueryError::Connection(e.0))?;
            info!("Opened SQLite database {}", config.database);
            Ok(Arc::new(db))
        }
        other => Err(QueryError::Config(format!(
            "no driver available for {} targets",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_driver_is_config_error() {
        let config = DatabaseConfig {
            dialect: Dialect::Snowflake,
            ..Default::default()
        };
        assert!(matches!(connect(&config).await, Err(QueryError::Config(_))));
    }

    #[tokio::test]
    async fn test_sqlite_in_memory() {
        let config = DatabaseConfig {
            dialect: Dialect::Sqlite,
            database: ":memory:".to_string(),
            ..Default::default()
        };
        let db = connect(&config).await.unwrap();
        assert_eq!(db.dialect(), Dialect::Sqlite);
    }
}
