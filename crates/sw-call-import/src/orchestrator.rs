//! Import orchestrator - runs the whole import.
//!
//! Phases: log on, import each enabled call class through its own worker
//! pool, link associations between imported calls, log off.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::associations::link_associations;
use crate::cache::request_prefix;
use crate::config::{validate_concurrency, Config, RequestTypeConfig};
use crate::error::{ImportError, Result};
use crate::import::{ImportJob, ImportResult, MigrationContext, RequestImporter};
use crate::pool::WorkerPool;
use crate::source::{self, SupportworksSource};
use crate::xmlmc::{TargetApi, XmlmcClient};

/// Import orchestrator.
pub struct Orchestrator {
    ctx: Arc<MigrationContext>,
    client: Arc<XmlmcClient>,
    workers: usize,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub dry_run: bool,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Requests created on the target.
    pub created: u64,

    /// Calls not created (rejected, failed or dry run).
    pub skipped: u64,

    /// Calls matched through `ExistingRequestMappings`.
    pub existing: u64,

    pub files_attached: u64,

    pub associations_linked: u64,
}

impl ImportSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Outcome of one call class batch, tallied from the importers' results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallClassReport {
    /// Rows submitted to the pool.
    pub queued: usize,
    /// Requests created or matched to an existing request.
    pub succeeded: usize,
    /// Rejected, failed or dry-run calls.
    pub failed: usize,
}

impl CallClassReport {
    fn tally(&mut self, result: &ImportResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl Orchestrator {
    /// Connect to both Supportworks databases and prepare the API client.
    pub async fn new(config: Config, workers: usize, dry_run: bool) -> Result<Self> {
        validate_concurrency(workers)?;
        let app = source::connect(&config.sw_app_db_conf, workers).await?;
        let system = source::connect(&config.sw_system_db_conf, workers).await?;
        let client = XmlmcClient::new(config.hb_conf.endpoint())?;
        Ok(Self::from_parts(
            config,
            SupportworksSource::new(app, system),
            client,
            workers,
            dry_run,
        ))
    }

    /// Build from already opened sources and client.
    pub fn from_parts(
        config: Config,
        source: SupportworksSource,
        client: XmlmcClient,
        workers: usize,
        dry_run: bool,
    ) -> Self {
        let ctx = MigrationContext::new(Arc::new(config), source, dry_run);
        Self {
            ctx: Arc::new(ctx),
            client: Arc::new(client),
            workers,
        }
    }

    /// Run the import.
    pub async fn run(self) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let config = self.ctx.config.clone();
        info!(
            "Starting import run {} (config {}, {} workers, dry run: {})",
            run_id,
            config.hash(),
            self.workers,
            self.ctx.dry_run
        );

        info!("Phase 1: Logging on to {}", config.hb_conf.endpoint());
        let hb = &config.hb_conf;
        if let Err(e) = self.client.logon(&hb.user_name, &hb.password).await {
            self.ctx.source.close().await;
            return Err(e);
        }
        self.client
            .log_message(&format!("Supportworks call import {} started", run_id))
            .await;

        let outcome = self.import(&*self.client).await;

        self.client
            .log_message(&format!("Supportworks call import {} finished", run_id))
            .await;
        self.client.logoff().await;
        self.ctx.source.close().await;
        outcome?;

        let completed_at = Utc::now();
        let counts = self.ctx.counters.snapshot();
        let summary = ImportSummary {
            run_id,
            dry_run: self.ctx.dry_run,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            created: counts.created,
            skipped: counts.skipped,
            existing: counts.existing,
            files_attached: counts.files_attached,
            associations_linked: counts.associations_linked,
        };
        info!(
            "Import complete: {} created, {} skipped, {} existing, {} files in {:.1}s",
            summary.created,
            summary.skipped,
            summary.existing,
            summary.files_attached,
            summary.duration_seconds
        );
        Ok(summary)
    }

    async fn import(&self, api: &dyn TargetApi) -> Result<()> {
        let ctx = &self.ctx;
        if ctx.config.customer_organisation {
            info!("Phase 2: Caching organisations");
            match ctx.resolver.preload_organisations(api).await {
                Ok(count) => info!("Cached {} organisations", count),
                Err(e) => warn!("Unable to preload organisations: {}", e),
            }
        }

        info!("Phase 3: Importing calls");
        for request_type in ctx.config.enabled_request_types() {
            import_call_class(ctx, api, request_type, self.workers).await?;
        }

        if ctx.logged.is_empty() {
            info!("No requests logged, skipping associations");
            return Ok(());
        }
        info!("Phase 4: Linking request associations");
        link_associations(ctx, api, self.workers).await
    }

    /// Check both source connections and the instance logon.
    pub async fn health_check(&self) -> Result<()> {
        self.ctx.source.test_connections().await?;
        info!("Supportworks databases: OK");
        let hb = &self.ctx.config.hb_conf;
        self.client.logon(&hb.user_name, &hb.password).await?;
        info!("Instance {}: OK", hb.endpoint());
        self.client.logoff().await;
        self.ctx.source.close().await;
        Ok(())
    }
}

/// Import every call selected by one request type, `workers` at a time.
pub async fn import_call_class(
    ctx: &Arc<MigrationContext>,
    api: &dyn TargetApi,
    request_type: &RequestTypeConfig,
    workers: usize,
) -> Result<CallClassReport> {
    let call_class = request_type.call_class.clone();
    let prefix: Arc<str> = request_prefix(&call_class, api).await.into();
    info!("Importing {} calls, request prefix [{}]", call_class, prefix);

    let (results_tx, results_rx) = async_channel::bounded::<ImportResult>(workers.max(1));
    let collector = tokio::spawn(async move {
        let mut report = CallClassReport::default();
        while let Ok(result) = results_rx.recv().await {
            report.tally(&result);
        }
        report
    });

    let request_type = Arc::new(request_type.clone());
    let importers: Vec<RequestImporter> = (0..workers.max(1))
        .map(|_| {
            RequestImporter::new(ctx.clone(), api.fork(), request_type.clone(), prefix.clone())
                .with_results(results_tx.clone())
        })
        .collect();
    drop(results_tx);
    let pool: WorkerPool<ImportJob> = WorkerPool::spawn(importers, workers.max(1));

    let mut rows = ctx.source.stream_calls(&request_type.sql_statement);
    let mut queued = 0usize;
    while let Some(row) = rows.recv().await {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                error!("Call query failed for {}: {}", call_class, e);
                break;
            }
        };
        let Some(source_ref) = row.get_string("callref") else {
            warn!("{} row without callref skipped", call_class);
            continue;
        };
        let job = ImportJob {
            call_class: call_class.clone(),
            row,
            source_ref,
        };
        if let Err(e) = pool.submit(job).await {
            error!("{} batch stopped: {}", call_class, e);
            break;
        }
        queued += 1;
    }
    pool.drain().await?;

    let mut report = collector
        .await
        .map_err(|e| ImportError::pool(e, "collecting import results"))?;
    report.queued = queued;
    info!(
        "{} Call Import Complete: {} calls processed, {} succeeded, {} failed",
        call_class, report.queued, report.succeeded, report.failed
    );
    Ok(report)
}
