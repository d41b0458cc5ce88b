//! MySQL-protocol reader (swsql, mysql, mysql320).
//!
//! Uses SQLx for connection pooling and async query execution.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{SourceReader, SourceRow, SqlValue, ROW_CHANNEL_CAPACITY};
use crate::config::DbConfig;
use crate::error::{ImportError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL-protocol source reader.
pub struct MysqlReader {
    pool: MySqlPool,
    driver: String,
}

impl MysqlReader {
    /// Create a new reader and test the connection.
    pub async fn new(config: &DbConfig, max_conns: usize) -> Result<Self> {
        let ssl_mode = if config.encrypt {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        };

        let options = MySqlConnectOptions::new()
            .host(&config.server)
            .port(config.effective_port())
            .database(&config.database)
            .username(&config.user_name)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| ImportError::pool(e, format!("connecting to {}", config.database)))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| ImportError::pool(e, "testing MySQL source connection"))?;

        info!(
            "Connected to {} source: {}:{}/{}",
            config.driver,
            config.server,
            config.effective_port(),
            config.database
        );

        Ok(Self {
            pool,
            driver: config.driver.to_lowercase(),
        })
    }
}

#[async_trait]
impl SourceReader for MysqlReader {
    fn stream_rows(&self, sql: String) -> mpsc::Receiver<Result<SourceRow>> {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        if tx.send(Ok(convert_row(&row))).await.is_err() {
                            break; // Consumer gone
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(ImportError::from(e))).await;
                        break;
                    }
                }
            }
            debug!("Finished streaming query");
        });

        rx
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        &self.driver
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Flatten a MySQL row into a [`SourceRow`] keyed by column name.
fn convert_row(row: &MySqlRow) -> SourceRow {
    let mut out = SourceRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_uppercase();
        out.insert(column.name(), convert_value(row, idx, &type_name));
    }
    out
}

fn convert_value(row: &MySqlRow, idx: usize, type_name: &str) -> SqlValue {
    let is_null = row.try_get_raw(idx).map(|r| r.is_null()).unwrap_or(true);
    if is_null {
        return SqlValue::Null;
    }

    match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => row
            .try_get::<i64, _>(idx)
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        t if t.ends_with("UNSIGNED") => row
            .try_get::<u64, _>(idx)
            .map(|v| SqlValue::Int(v as i64))
            .unwrap_or(SqlValue::Null),
        "FLOAT" | "DOUBLE" | "REAL" => row
            .try_get::<f64, _>(idx)
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            // Old Supportworks schemas report text columns as binary.
            match row.try_get::<Vec<u8>, _>(idx) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => SqlValue::Text(text),
                    Err(e) => SqlValue::Bytes(e.into_bytes()),
                },
                Err(_) => SqlValue::Null,
            }
        }
        _ => row
            .try_get::<String, _>(idx)
            .map(SqlValue::Text)
            .or_else(|_| {
                row.try_get::<Vec<u8>, _>(idx)
                    .map(|b| SqlValue::Text(String::from_utf8_lossy(&b).into_owned()))
            })
            // DECIMAL and friends arrive as text on the wire
            .or_else(|_| row.try_get_unchecked::<String, _>(idx).map(SqlValue::Text))
            .unwrap_or(SqlValue::Null),
    }
}
