//! MSSQL reader for Supportworks application databases hosted on SQL Server.
//!
//! Uses Tiberius with bb8 connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, QueryItem, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::{SourceReader, SourceRow, SqlValue, ROW_CHANNEL_CAPACITY};
use crate::config::DbConfig;
use crate::error::{ImportError, Result};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type MssqlClient = Client<Compat<TcpStream>>;

/// bb8 manager handing out Tiberius clients for one Supportworks database.
#[derive(Clone)]
struct SwConnectionManager {
    db: DbConfig,
}

impl SwConnectionManager {
    fn tiberius_config(&self) -> Config {
        let db = &self.db;
        let mut config = Config::new();
        config.host(&db.server);
        config.port(db.effective_port());
        config.database(&db.database);
        config.authentication(AuthMethod::sql_server(&db.user_name, &db.password));
        if db.encrypt {
            config.trust_cert();
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }
}

async fn ping(conn: &mut MssqlClient) -> std::result::Result<(), tiberius::error::Error> {
    conn.simple_query("SELECT 1").await?.into_row().await.map(|_| ())
}

#[async_trait]
impl bb8::ManageConnection for SwConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<MssqlClient, Self::Error> {
        let config = self.tiberius_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut MssqlClient) -> std::result::Result<(), Self::Error> {
        ping(conn).await
    }

    fn has_broken(&self, _: &mut MssqlClient) -> bool {
        false
    }
}

/// MSSQL source reader.
pub struct MssqlReader {
    pool: Pool<SwConnectionManager>,
}

impl MssqlReader {
    /// Open a pool of up to `max_size` connections and check one out.
    pub async fn with_pool_size(config: DbConfig, max_size: u32) -> Result<Self> {
        let manager = SwConnectionManager { db: config.clone() };
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(CHECKOUT_TIMEOUT)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| ImportError::pool(e, "creating MSSQL connection pool"))?;
        let reader = Self { pool };
        reader.test_connection().await?;

        info!(
            "Connected to MSSQL source: {}:{}/{} (pool_size={})",
            config.server,
            config.effective_port(),
            config.database,
            max_size
        );

        Ok(reader)
    }
}

#[async_trait]
impl SourceReader for MssqlReader {
    fn stream_rows(&self, sql: String) -> mpsc::Receiver<Result<SourceRow>> {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_rows(pool, &sql, &tx).await {
                tx.send(Err(e)).await.ok();
            }
        });

        rx
    }

    async fn test_connection(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ImportError::pool(e, "testing MSSQL connection"))?;
        Ok(ping(&mut conn).await?)
    }

    fn db_type(&self) -> &str {
        "mssql"
    }

    async fn close(&self) {}
}

async fn forward_rows(
    pool: Pool<SwConnectionManager>,
    sql: &str,
    tx: &mpsc::Sender<Result<SourceRow>>,
) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| ImportError::pool(e, "getting connection for query"))?;

    let mut stream = client.simple_query(sql).await?;
    while let Some(item) = stream.try_next().await? {
        if let QueryItem::Row(row) = item {
            if tx.send(Ok(convert_row(row))).await.is_err() {
                break;
            }
        }
    }
    debug!("MSSQL query drained");
    Ok(())
}

/// Flatten a tiberius row into a [`SourceRow`] keyed by column name.
fn convert_row(row: Row) -> SourceRow {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut out = SourceRow::new();
    for (name, data) in names.into_iter().zip(row) {
        out.insert(name, convert_value(data));
    }
    out
}

fn convert_value(data: ColumnData<'static>) -> SqlValue {
    match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(v as f64)),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::String(v) => v.map(|s| SqlValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Text(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| SqlValue::Text(n.to_string())),
        ColumnData::Binary(v) => v.map(|b| match String::from_utf8(b.into_owned()) {
            Ok(text) => SqlValue::Text(text),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        }),
        ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_) => NaiveDateTime::from_sql(&data)
            .ok()
            .flatten()
            .map(SqlValue::DateTime),
        _ => None,
    }
    .unwrap_or(SqlValue::Null)
}
