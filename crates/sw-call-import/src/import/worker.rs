//! Per-worker request importer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RequestTypeConfig;
use crate::joblog::JobLog;
use crate::mapping::call_ref_number;
use crate::pool::Worker;
use crate::xmlmc::TargetApi;

use super::{ImportJob, ImportResult, MigrationContext, RequestBuilder, SideEffect};

/// Imports calls of one class. Each instance owns its API handle.
pub struct RequestImporter {
    ctx: Arc<MigrationContext>,
    api: Arc<dyn TargetApi>,
    request_type: Arc<RequestTypeConfig>,
    prefix: Arc<str>,
    results: Option<async_channel::Sender<ImportResult>>,
}

impl RequestImporter {
    pub fn new(
        ctx: Arc<MigrationContext>,
        api: Arc<dyn TargetApi>,
        request_type: Arc<RequestTypeConfig>,
        prefix: Arc<str>,
    ) -> Self {
        Self {
            ctx,
            api,
            request_type,
            prefix,
            results: None,
        }
    }

    /// Report every job's [`ImportResult`] on `results`.
    pub fn with_results(mut self, results: async_channel::Sender<ImportResult>) -> Self {
        self.results = Some(results);
        self
    }

    /// Import one call, including its history and files.
    pub async fn import(&self, job: &ImportJob, log: &mut JobLog) -> ImportResult {
        let ctx = &*self.ctx;
        let api = &*self.api;
        let source_ref = job.source_ref.as_str();

        if let Some(existing) = ctx.config.existing_request_mappings.get(source_ref) {
            log.info(format!("Already imported as [{}], replaying history only", existing));
            ctx.logged.insert(source_ref, existing.as_str());
            ctx.counters.add_existing();
            if ctx.dry_run {
                log.info("Dry run: historic updates not replicated");
            } else {
                ctx.history.replicate(api, source_ref, existing, log).await;
            }
            return ImportResult::created(source_ref, existing.as_str());
        }

        let builder = RequestBuilder::new(&ctx.config, &self.request_type, &self.prefix, &ctx.resolver);
        let plan = builder.build(&job.row, api, log).await;

        if ctx.dry_run {
            let xml = plan.call.to_xml().unwrap_or_default();
            log.info(format!("Dry run, request not logged: {}", xml));
            ctx.counters.add_skipped();
            return ImportResult::failed(source_ref, "dry run");
        }

        log.debug(format!(
            "{}::Requests: {}",
            plan.call.name(),
            plan.call.to_xml().unwrap_or_default()
        ));
        let reference = match api.invoke_ok(&plan.call).await {
            Ok(response) => response
                .get("primaryEntityData/record/h_pk_reference")
                .map(str::to_string)
                .filter(|r| !r.is_empty()),
            Err(e) => {
                log.error(format!("Log Request Failed [{}]", e));
                ctx.counters.add_skipped();
                return ImportResult::failed(source_ref, e.to_string());
            }
        };
        let Some(reference) = reference else {
            log.error("Log Request Failed [no request reference returned]");
            ctx.counters.add_skipped();
            return ImportResult::failed(source_ref, "no request reference returned");
        };

        log.info(format!("Log Request Successful [{}]", reference));
        let result = ImportResult::created(source_ref, reference.as_str());
        ctx.logged.record(&result);
        ctx.counters.add_created();

        SideEffect::run_all(api, &plan.created(reference.as_str()), log).await;
        ctx.history.replicate(api, source_ref, &reference, log).await;
        self.attach_files(source_ref, &reference, log).await;
        result
    }

    async fn attach_files(&self, source_ref: &str, target_ref: &str, log: &mut JobLog) {
        let Some(migrator) = &self.ctx.attachments else {
            return;
        };
        let Some(callref) = call_ref_number(source_ref) else {
            log.error(format!("Invalid call reference for attachments: [{}]", source_ref));
            return;
        };
        let files = match self.ctx.source.file_attachments(callref).await {
            Ok(files) => files,
            Err(e) => {
                log.error(format!("Unable to read file attachments for {}: {}", source_ref, e));
                return;
            }
        };
        if files.is_empty() {
            return;
        }
        log.info(format!(
            "Processing {} File Attachments for {}[{}]",
            files.len(),
            source_ref,
            target_ref
        ));
        for file in &files {
            match migrator.migrate(&*self.api, file, target_ref, log).await {
                Ok(attached) => self.ctx.counters.add_files(attached as u64),
                Err(e) => log.error(e.to_string()),
            }
        }
    }
}

#[async_trait]
impl Worker<ImportJob> for RequestImporter {
    async fn handle(&mut self, job: ImportJob) {
        let mut log = JobLog::new(format!("{} {}", job.call_class, job.source_ref));
        let result = self.import(&job, &mut log).await;
        log.flush(&self.ctx.sink);
        if let Some(results) = &self.results {
            results.send(result).await.ok();
        }
    }
}
