//! Supportworks source database access.
//!
//! Two connections are held for a run: the application database
//! (`swdata`: calls, diary, associations) and the system database
//! (`sw_systemdb`: file attachment metadata). Both are read through the
//! [`SourceReader`] trait so the MySQL-protocol and MSSQL drivers are
//! interchangeable.

mod mssql;
mod mysql;
mod records;
mod value;

pub use mssql::MssqlReader;
pub use mysql::MysqlReader;
pub use records::{AssociationPair, DiaryUpdate, FileAttachmentRecord};
pub use value::{SourceRow, SqlValue};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::DbConfig;
use crate::error::{ImportError, Result};

/// Rows buffered between the driver task and the consumer.
pub const ROW_CHANNEL_CAPACITY: usize = 64;

/// Read-only access to a source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Run a query and stream its rows. The producer blocks when the
    /// consumer falls behind; a query failure arrives as the last item.
    fn stream_rows(&self, sql: String) -> mpsc::Receiver<Result<SourceRow>>;

    /// Run a query and collect all rows.
    async fn query_rows(&self, sql: &str) -> Result<Vec<SourceRow>> {
        let mut rx = self.stream_rows(sql.to_string());
        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Round-trip a trivial query.
    async fn test_connection(&self) -> Result<()>;

    /// Driver name for logs.
    fn db_type(&self) -> &str;

    /// Release pooled connections.
    async fn close(&self);
}

/// Open a reader for the configured driver.
pub async fn connect(config: &DbConfig, max_conns: usize) -> Result<Arc<dyn SourceReader>> {
    if config.is_mysql_family() {
        Ok(Arc::new(MysqlReader::new(config, max_conns).await?))
    } else if config.driver.eq_ignore_ascii_case("mssql") {
        Ok(Arc::new(
            MssqlReader::with_pool_size(config.clone(), max_conns as u32).await?,
        ))
    } else {
        Err(ImportError::Config(format!(
            "unsupported source driver '{}'",
            config.driver
        )))
    }
}

/// Supportworks-specific queries over the two source databases.
#[derive(Clone)]
pub struct SupportworksSource {
    app: Arc<dyn SourceReader>,
    system: Arc<dyn SourceReader>,
}

impl SupportworksSource {
    pub fn new(app: Arc<dyn SourceReader>, system: Arc<dyn SourceReader>) -> Self {
        Self { app, system }
    }

    /// Stream the calls selected by a request type's `SQLStatement`.
    pub fn stream_calls(&self, sql: &str) -> mpsc::Receiver<Result<SourceRow>> {
        debug!("Call query: {}", sql);
        self.app.stream_rows(sql.to_string())
    }

    /// Stored files for a call, in data id order.
    pub async fn file_attachments(&self, callref: i64) -> Result<Vec<FileAttachmentRecord>> {
        let sql = format!(
            "SELECT fileid, callref, dataid, updateid, compressed, sizeu, sizec, filename, \
             addedby, timeadded, filetime FROM system_cfastore WHERE callref = {} ORDER BY dataid",
            callref
        );
        let rows = self.system.query_rows(&sql).await?;
        Ok(rows.iter().map(FileAttachmentRecord::from_row).collect())
    }

    /// Diary entries for a call, sorted by update index ascending.
    ///
    /// `[sourceref]` in the configured query is replaced with the numeric
    /// call reference.
    pub async fn diary_updates(&self, query: &str, callref: i64) -> Result<Vec<DiaryUpdate>> {
        let sql = query.replace("[sourceref]", &callref.to_string());
        let rows = self.app.query_rows(&sql).await?;
        let mut updates: Vec<DiaryUpdate> = rows.iter().map(DiaryUpdate::from_row).collect();
        updates.sort_by_key(|u| u.update_index);
        Ok(updates)
    }

    /// Parent/child call pairs from the configured association query.
    pub fn stream_associations(&self, query: &str) -> mpsc::Receiver<Result<SourceRow>> {
        self.app.stream_rows(query.to_string())
    }

    /// Check both connections.
    pub async fn test_connections(&self) -> Result<()> {
        self.app.test_connection().await?;
        self.system.test_connection().await
    }

    pub async fn close(&self) {
        self.app.close().await;
        self.system.close().await;
    }
}
