//! Request association linking.
//!
//! Runs after every call class has been imported. Each parent/child pair
//! from the association query is translated through the logged map; only
//! pairs where both calls made it to the target are linked.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::import::{LoggedMap, MigrationContext};
use crate::joblog::JobLog;
use crate::pool::{Worker, WorkerPool};
use crate::source::AssociationPair;
use crate::xmlmc::{MethodCall, TargetApi, APP_SERVICE_MANAGER};

/// A pair of target references to link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkJob {
    pub master: String,
    pub slave: String,
}

impl LinkJob {
    /// Target references for a source pair, when both sides were logged.
    pub fn resolve(pair: &AssociationPair, logged: &LoggedMap) -> Option<Self> {
        let master = logged.get(&pair.master).filter(|r| !r.is_empty())?;
        let slave = logged.get(&pair.slave).filter(|r| !r.is_empty())?;
        Some(Self { master, slave })
    }

    fn call(&self) -> MethodCall {
        MethodCall::new(format!("apps/{}/RelationshipEntities", APP_SERVICE_MANAGER), "add")
            .param("entityId", self.master.as_str())
            .param("entityName", "Requests")
            .param("linkedEntityId", self.slave.as_str())
            .param("linkedEntityName", "Requests")
            .param("updateTimeline", "true")
            .param("visibility", "trustedGuest")
    }
}

/// Pool worker creating one association per job.
pub struct AssociationLinker {
    ctx: Arc<MigrationContext>,
    api: Arc<dyn TargetApi>,
}

impl AssociationLinker {
    pub fn new(ctx: Arc<MigrationContext>, api: Arc<dyn TargetApi>) -> Self {
        Self { ctx, api }
    }

    pub async fn link(&self, job: &LinkJob, log: &mut JobLog) -> bool {
        if self.ctx.dry_run {
            log.info(format!("Dry run, association [{}] -> [{}] not added", job.master, job.slave));
            return false;
        }
        match self.api.invoke_ok(&job.call()).await {
            Ok(_) => {
                log.info(format!(
                    "Request Association Success between [{}] and [{}]",
                    job.master, job.slave
                ));
                self.ctx.counters.add_association();
                true
            }
            Err(e) => {
                log.error(format!(
                    "Unable to add Request Association between [{}] and [{}]: {}",
                    job.master, job.slave, e
                ));
                false
            }
        }
    }
}

#[async_trait]
impl Worker<LinkJob> for AssociationLinker {
    async fn handle(&mut self, job: LinkJob) {
        let mut log = JobLog::new(format!("{}->{}", job.master, job.slave));
        self.link(&job, &mut log).await;
        log.flush(&self.ctx.sink);
    }
}

/// Stream the association query and link every fully migrated pair using
/// `workers` concurrent linkers.
pub async fn link_associations(
    ctx: &Arc<MigrationContext>,
    api: &dyn TargetApi,
    workers: usize,
) -> Result<()> {
    let query = ctx.config.related_request_query.trim();
    if query.is_empty() {
        debug!("No association query configured");
        return Ok(());
    }
    info!("Processing Request Associations");

    let linkers: Vec<AssociationLinker> = (0..workers.max(1))
        .map(|_| AssociationLinker::new(ctx.clone(), api.fork()))
        .collect();
    let pool: WorkerPool<LinkJob> = WorkerPool::spawn(linkers, workers.max(1));

    let mut rows = ctx.source.stream_associations(query);
    let (mut seen, mut queued) = (0usize, 0usize);
    while let Some(row) = rows.recv().await {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Association query failed: {}", e);
                break;
            }
        };
        seen += 1;
        if let Some(job) = LinkJob::resolve(&AssociationPair::from_row(&row), &ctx.logged) {
            pool.submit(job).await?;
            queued += 1;
        }
    }
    pool.drain().await?;

    info!(
        "Request Association Processing Complete: {} of {} pairs eligible",
        queued, seen
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceRow, SqlValue, SupportworksSource};
    use crate::testing::{fail, ok, sample_config, MockApi, MockSource};

    fn pair(master: &str, slave: &str) -> SourceRow {
        SourceRow::new()
            .with("parentRequest", SqlValue::Text(master.into()))
            .with("childRequest", SqlValue::Text(slave.into()))
    }

    fn context(rows: Vec<SourceRow>, dry_run: bool) -> Arc<MigrationContext> {
        let config = sample_config();
        let app = MockSource::new().with_rows(&config.related_request_query, rows);
        let source = SupportworksSource::new(Arc::new(app), Arc::new(MockSource::new()));
        let ctx = MigrationContext::new(Arc::new(config), source, dry_run);
        ctx.logged.insert("100", "IN00100");
        ctx.logged.insert("101", "IN00101");
        ctx.logged.insert("102", "");
        Arc::new(ctx)
    }

    #[test]
    fn test_resolve_requires_both_sides() {
        let logged = LoggedMap::new();
        logged.insert("1", "IN1");
        logged.insert("2", "IN2");
        logged.insert("3", "");
        let both = AssociationPair { master: "1".into(), slave: "2".into() };
        assert_eq!(
            LinkJob::resolve(&both, &logged),
            Some(LinkJob { master: "IN1".into(), slave: "IN2".into() })
        );
        let missing = AssociationPair { master: "1".into(), slave: "9".into() };
        assert_eq!(LinkJob::resolve(&missing, &logged), None);
        let empty = AssociationPair { master: "3".into(), slave: "2".into() };
        assert_eq!(LinkJob::resolve(&empty, &logged), None);
    }

    #[tokio::test]
    async fn test_only_migrated_pairs_are_linked() {
        let ctx = context(
            vec![pair("100", "101"), pair("100", "999"), pair("102", "101")],
            false,
        );
        let api = MockApi::accept_all();
        link_associations(&ctx, &api, 2).await.unwrap();

        let links = api.calls_to("apps/com.hornbill.servicemanager/RelationshipEntities::add");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].get("entityId"), Some("IN00100"));
        assert_eq!(links[0].get("linkedEntityId"), Some("IN00101"));
        assert_eq!(links[0].get("visibility"), Some("trustedGuest"));
        assert_eq!(ctx.counters.snapshot().associations_linked, 1);
    }

    #[tokio::test]
    async fn test_rejected_link_not_counted() {
        let ctx = context(vec![pair("100", "101")], false);
        let api = MockApi::new(|_| fail("Relationship exists"));
        link_associations(&ctx, &api, 1).await.unwrap();
        assert_eq!(api.calls().len(), 1);
        assert_eq!(ctx.counters.snapshot().associations_linked, 0);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let ctx = context(vec![pair("100", "101")], true);
        let api = MockApi::new(|_| ok(""));
        link_associations(&ctx, &api, 1).await.unwrap();
        assert!(api.calls().is_empty());
    }
}
