//! Request import: jobs, shared run state and the per-worker importer.
//!
//! One [`RequestImporter`] runs per pool worker. Everything shared between
//! workers lives in a [`MigrationContext`] built once per run: the entity
//! caches, the counters and the logged map consulted later by the
//! association phase.

mod effects;
mod payload;
mod worker;

pub use effects::{CreatedRequest, SideEffect};
pub use payload::{RequestBuilder, RequestPlan};
pub use worker::RequestImporter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::attachments::AttachmentMigrator;
use crate::cache::EntityResolver;
use crate::config::Config;
use crate::history::HistoricalUpdateReplicator;
use crate::joblog::LogSink;
use crate::source::{SourceRow, SupportworksSource};

/// One call to import.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub call_class: String,
    pub row: SourceRow,
    /// Numeric Supportworks call reference.
    pub source_ref: String,
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub source_ref: String,
    /// Empty unless `success`.
    pub target_ref: String,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl ImportResult {
    pub fn created(source_ref: impl Into<String>, target_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            target_ref: target_ref.into(),
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(source_ref: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            target_ref: String::new(),
            success: false,
            error_detail: Some(detail.into()),
        }
    }
}

/// Run totals, updated by every worker.
#[derive(Debug, Default)]
pub struct Counters {
    created: AtomicU64,
    skipped: AtomicU64,
    existing: AtomicU64,
    files_attached: AtomicU64,
    associations_linked: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub created: u64,
    pub skipped: u64,
    pub existing: u64,
    pub files_attached: u64,
    pub associations_linked: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_existing(&self) {
        self.existing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_files(&self, count: u64) {
        self.files_attached.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_association(&self) {
        self.associations_linked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            created: self.created.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            existing: self.existing.load(Ordering::Relaxed),
            files_attached: self.files_attached.load(Ordering::Relaxed),
            associations_linked: self.associations_linked.load(Ordering::Relaxed),
        }
    }
}

/// Source reference → target reference for every call imported or mapped
/// this run.
#[derive(Debug, Default)]
pub struct LoggedMap {
    entries: Mutex<HashMap<String, String>>,
}

impl LoggedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_ref: impl Into<String>, target_ref: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_ref.into(), target_ref.into());
    }

    /// Record a successful result; failures leave no entry.
    pub fn record(&self, result: &ImportResult) {
        if result.success && !result.target_ref.is_empty() {
            self.insert(result.source_ref.as_str(), result.target_ref.as_str());
        }
    }

    pub fn get(&self, source_ref: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_ref)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by every worker of a run.
pub struct MigrationContext {
    pub config: Arc<Config>,
    pub resolver: EntityResolver,
    pub counters: Counters,
    pub logged: LoggedMap,
    pub source: SupportworksSource,
    pub sink: LogSink,
    pub history: HistoricalUpdateReplicator,
    /// `None` when attachment processing is switched off.
    pub attachments: Option<AttachmentMigrator>,
    pub dry_run: bool,
}

impl MigrationContext {
    pub fn new(config: Arc<Config>, source: SupportworksSource, dry_run: bool) -> Self {
        let history = HistoricalUpdateReplicator::new(source.clone(), config.call_diary_query.clone());
        let attachments = config
            .process_attachments
            .then(|| AttachmentMigrator::new(config.attachment_root.clone()));
        Self {
            config,
            resolver: EntityResolver::new(),
            counters: Counters::new(),
            logged: LoggedMap::new(),
            source,
            sink: LogSink::new(),
            history,
            attachments,
            dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_map_records_only_successes() {
        let logged = LoggedMap::new();
        logged.record(&ImportResult::created("123", "IN00001"));
        logged.record(&ImportResult::failed("124", "rejected"));
        assert_eq!(logged.get("123").as_deref(), Some("IN00001"));
        assert_eq!(logged.get("124"), None);
        assert_eq!(logged.len(), 1);
    }

    #[test]
    fn test_failed_result_has_no_target() {
        let result = ImportResult::failed("124", "rejected");
        assert!(!result.success);
        assert!(result.target_ref.is_empty());
        assert_eq!(result.error_detail.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::new();
        counters.add_created();
        counters.add_created();
        counters.add_skipped();
        counters.add_files(3);
        let snap = counters.snapshot();
        assert_eq!(snap.created, 2);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.files_attached, 3);
        assert_eq!(snap.existing, 0);
    }
}
