//! Steps run against a request once it exists.
//!
//! Each step decides for itself whether it applies and fails on its own:
//! a failed step is logged and the next one still runs.

use std::fmt;

use crate::error::{ImportError, Result};
use crate::joblog::JobLog;
use crate::mapping::RequestStatus;
use crate::xmlmc::{MethodCall, TargetApi, APP_SERVICE_MANAGER};

const ACTIVITY_CONTENT: &str = "Request imported from Supportworks";
const HOLD_REASON: &str = "Request imported from Supportworks in an On Hold status. \
See Historical Request Updates for further information.";

/// What the steps know about a freshly created request.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRequest {
    pub reference: String,
    pub status: Option<RequestStatus>,
    pub hold: bool,
    pub logged_date: Option<String>,
    pub hold_until: Option<String>,
    pub bpm: Option<String>,
}

impl CreatedRequest {
    fn urn(&self) -> String {
        format!("urn:sys:entity:{}:Requests:{}", APP_SERVICE_MANAGER, self.reference)
    }
}

/// Post-creation steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    ActivityStream,
    BackdateLogDate,
    StatusHistory,
    SpawnWorkflow,
    PlaceOnHold,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ActivityStream => "activity stream entry",
            Self::BackdateLogDate => "log date",
            Self::StatusHistory => "status history",
            Self::SpawnWorkflow => "workflow",
            Self::PlaceOnHold => "on hold",
        };
        f.write_str(name)
    }
}

impl SideEffect {
    pub const PIPELINE: [SideEffect; 5] = [
        Self::ActivityStream,
        Self::BackdateLogDate,
        Self::StatusHistory,
        Self::SpawnWorkflow,
        Self::PlaceOnHold,
    ];

    /// Whether this step has anything to do for `request`.
    pub fn applies(&self, request: &CreatedRequest) -> bool {
        match self {
            Self::ActivityStream | Self::StatusHistory => true,
            Self::BackdateLogDate => request.logged_date.is_some(),
            Self::SpawnWorkflow => {
                !request.status.map(|s| s.is_terminal()).unwrap_or(false)
                    && request.bpm.as_deref().map(|b| !b.is_empty()).unwrap_or(false)
            }
            Self::PlaceOnHold => request.hold,
        }
    }

    /// Run every applicable step in order.
    pub async fn run_all(api: &dyn TargetApi, request: &CreatedRequest, log: &mut JobLog) {
        for step in Self::PIPELINE {
            if !step.applies(request) {
                continue;
            }
            match step.apply(api, request).await {
                Ok(()) => log.debug(format!("Request [{}] {} done", request.reference, step)),
                Err(e) => log.error(format!(
                    "Unable to add {} to request [{}]: {}",
                    step, request.reference, e
                )),
            }
        }
    }

    async fn apply(&self, api: &dyn TargetApi, request: &CreatedRequest) -> Result<()> {
        let reference = request.reference.as_str();
        match self {
            Self::ActivityStream => {
                let call = MethodCall::new("activity", "postMessage")
                    .param("socialObjectRef", request.urn())
                    .param("content", ACTIVITY_CONTENT)
                    .param("visibility", "public")
                    .param("type", "Logged");
                api.invoke_ok(&call).await?;
            }
            Self::BackdateLogDate => {
                let logged = request.logged_date.as_deref().unwrap_or_default();
                api.invoke_ok(&update_request(reference, "h_datelogged", logged)).await?;
            }
            Self::StatusHistory => {
                let status = request.status.map(|s| s.as_str()).unwrap_or_default();
                let call = MethodCall::new("data", "entityAddRecord")
                    .param("application", APP_SERVICE_MANAGER)
                    .param("entity", "RequestStatusHistory")
                    .element("primaryEntityData", |p| {
                        p.element("record", |r| {
                            r.param("h_request_id", reference)
                                .param("h_status", status)
                                .param("h_timestamp", request.logged_date.as_deref().unwrap_or_default())
                        })
                    });
                api.invoke_ok(&call).await?;
            }
            Self::SpawnWorkflow => {
                let bpm = request.bpm.as_deref().unwrap_or_default();
                let call = MethodCall::new("bpm", "processSpawn2")
                    .param("application", APP_SERVICE_MANAGER)
                    .param("name", bpm)
                    .param("reference", reference)
                    .element("inputParam", |p| p.param("name", "objectRefUrn").param("value", request.urn()))
                    .element("inputParam", |p| p.param("name", "requestId").param("value", reference));
                let response = api.invoke_ok(&call).await?;
                let identifier = response
                    .get("identifier")
                    .ok_or_else(|| ImportError::api("bpm", "processSpawn2", "no identifier returned"))?;
                api.invoke_ok(&update_request(reference, "h_bpm_id", identifier)).await?;
            }
            Self::PlaceOnHold => {
                let call = MethodCall::new(format!("apps/{}/Requests", APP_SERVICE_MANAGER), "holdRequest")
                    .param("requestId", reference)
                    .param("onHoldUntil", request.hold_until.as_deref().unwrap_or_default())
                    .param("strReason", HOLD_REASON);
                api.invoke_ok(&call).await?;
            }
        }
        Ok(())
    }
}

fn update_request(reference: &str, field: &str, value: &str) -> MethodCall {
    MethodCall::new("data", "entityUpdateRecord")
        .param("application", APP_SERVICE_MANAGER)
        .param("entity", "Requests")
        .element("primaryEntityData", |p| {
            p.element("record", |r| r.param("h_pk_reference", reference).param(field, value))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fail, ok, MockApi};

    fn created() -> CreatedRequest {
        CreatedRequest {
            reference: "IN00001".into(),
            status: Some(RequestStatus::Open),
            hold: false,
            logged_date: Some("2017-07-14 02:40:00".into()),
            hold_until: None,
            bpm: Some("incident-default".into()),
        }
    }

    fn api() -> MockApi {
        MockApi::new(|call| match call.method() {
            "processSpawn2" => ok("<identifier>IN-BPM-1</identifier>"),
            _ => ok(""),
        })
    }

    #[tokio::test]
    async fn test_pipeline_order() {
        let api = api();
        let mut log = JobLog::new("123");
        let mut request = created();
        request.hold = true;
        request.hold_until = Some("2020-09-13 12:26:40".into());
        SideEffect::run_all(&api, &request, &mut log).await;

        let names: Vec<String> = api.calls().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "activity::postMessage",
                "data::entityUpdateRecord",
                "data::entityAddRecord",
                "bpm::processSpawn2",
                "data::entityUpdateRecord",
                "apps/com.hornbill.servicemanager/Requests::holdRequest",
            ]
        );
        let calls = api.calls();
        assert_eq!(
            calls[0].get("socialObjectRef"),
            Some("urn:sys:entity:com.hornbill.servicemanager:Requests:IN00001")
        );
        assert_eq!(calls[1].get("primaryEntityData/record/h_datelogged"), Some("2017-07-14 02:40:00"));
        assert_eq!(calls[4].get("primaryEntityData/record/h_bpm_id"), Some("IN-BPM-1"));
        assert_eq!(calls[5].get("onHoldUntil"), Some("2020-09-13 12:26:40"));
    }

    #[tokio::test]
    async fn test_terminal_status_skips_workflow() {
        let api = api();
        let mut log = JobLog::new("123");
        let mut request = created();
        request.status = Some(RequestStatus::Closed);
        request.logged_date = None;
        SideEffect::run_all(&api, &request, &mut log).await;

        assert!(api.calls_to("bpm::processSpawn2").is_empty());
        assert!(api.calls_to("data::entityUpdateRecord").is_empty());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_pipeline() {
        let api = MockApi::new(|call| match call.method() {
            "postMessage" => fail("Stream unavailable"),
            "processSpawn2" => fail("Unknown process"),
            _ => ok(""),
        });
        let mut log = JobLog::new("123");
        SideEffect::run_all(&api, &created(), &mut log).await;

        assert!(log.contains("Stream unavailable"));
        assert!(log.contains("Unknown process"));
        // no bpm id written after a failed spawn
        let updates = api.calls_to("data::entityUpdateRecord");
        assert_eq!(updates.len(), 1);
        assert!(updates[0].get("primaryEntityData/record/h_bpm_id").is_none());
        assert_eq!(api.calls_for_entity("data::entityAddRecord", "RequestStatusHistory").len(), 1);
    }
}
