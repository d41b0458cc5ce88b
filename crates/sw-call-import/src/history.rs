//! Historical diary update replication.

use crate::joblog::JobLog;
use crate::mapping::{call_ref_number, epoch_to_datetime};
use crate::source::{DiaryUpdate, SupportworksSource};
use crate::xmlmc::{MethodCall, TargetApi, APP_SERVICE_MANAGER};

/// Outcome of replicating one call's diary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryTally {
    pub succeeded: usize,
    pub total: usize,
}

/// Copies a call's diary onto a target request as historic updates.
#[derive(Clone)]
pub struct HistoricalUpdateReplicator {
    source: SupportworksSource,
    query: String,
}

impl HistoricalUpdateReplicator {
    /// `query` is the configured diary query containing `[sourceref]`.
    pub fn new(source: SupportworksSource, query: impl Into<String>) -> Self {
        Self {
            source,
            query: query.into(),
        }
    }

    /// Replay every diary entry of `source_ref` in update index order.
    /// Per-row failures are logged and counted; replication carries on.
    pub async fn replicate(
        &self,
        api: &dyn TargetApi,
        source_ref: &str,
        target_ref: &str,
        log: &mut JobLog,
    ) -> HistoryTally {
        if self.query.trim().is_empty() {
            return HistoryTally::default();
        }
        let callref = match call_ref_number(source_ref) {
            Some(callref) => callref,
            None => {
                log.error(format!("Invalid call reference for diary query: [{}]", source_ref));
                return HistoryTally::default();
            }
        };
        let updates = match self.source.diary_updates(&self.query, callref).await {
            Ok(updates) => updates,
            Err(e) => {
                log.error(format!("Diary query failed for {}: {}", source_ref, e));
                return HistoryTally::default();
            }
        };

        let mut tally = HistoryTally {
            succeeded: 0,
            total: updates.len(),
        };
        for update in &updates {
            let call = historic_update_call(target_ref, update);
            log.debug(format!("entityAddRecord::RequestHistoricUpdates index {}", update.update_index));
            match api.invoke_ok(&call).await {
                Ok(_) => tally.succeeded += 1,
                Err(e) => log.warn(format!(
                    "Unable to add historic update {} to {}: {}",
                    update.update_index, target_ref, e
                )),
            }
        }
        log.info(format!(
            "{} of {} Historic Update records created",
            tally.succeeded, tally.total
        ));
        tally
    }
}

fn historic_update_call(target_ref: &str, update: &DiaryUpdate) -> MethodCall {
    let update_date = update
        .update_time
        .and_then(|t| epoch_to_datetime(&t.to_string()))
        .unwrap_or_default();
    let time_spent = update
        .time_spent
        .filter(|t| *t != 0)
        .map(|t| t.to_string())
        .unwrap_or_default();
    let update_type = update.update_type.map(|t| t.to_string()).unwrap_or_default();

    MethodCall::new("data", "entityAddRecord")
        .param("application", APP_SERVICE_MANAGER)
        .param("entity", "RequestHistoricUpdates")
        .element("primaryEntityData", |p| {
            p.element("record", |r| {
                r.param("h_fk_reference", target_ref)
                    .param("h_updatedate", update_date)
                    .param_if("h_timespent", time_spent)
                    .param_if("h_updatetype", update_type)
                    .param("h_updatebytype", "1")
                    .param("h_updateindex", update.update_index.to_string())
                    .param_if("h_updateby", update.analyst_id.as_str())
                    .param_if("h_updatebyname", update.analyst_id.as_str())
                    .param_if("h_updatebygroup", update.group_id.as_str())
                    .param_if("h_actiontype", update.code.as_str())
                    .param_if("h_actionsource", update.source.as_str())
                    .param_if("h_description", sanitize_text(&update.text))
            })
        })
}

/// Drop characters XML 1.0 cannot carry; tab, CR and LF survive.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
