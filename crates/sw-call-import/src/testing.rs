//! Test doubles for the target API and the source databases.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::Result;
use crate::source::{SourceReader, SourceRow};
use crate::xmlmc::{MethodCall, MethodResponse, TargetApi};

type Responder = dyn Fn(&MethodCall) -> MethodResponse + Send + Sync;

/// OK response with the given `<params>` body.
pub fn ok(params: &str) -> MethodResponse {
    MethodResponse::parse(&format!(
        r#"<methodCallResult status="ok"><params>{}</params></methodCallResult>"#,
        params
    ))
    .unwrap()
}

/// Failed response with the given error text.
pub fn fail(error: &str) -> MethodResponse {
    MethodResponse::parse(&format!(
        r#"<methodCallResult status="fail"><state><code>0200</code><error>{}</error></state></methodCallResult>"#,
        error
    ))
    .unwrap()
}

/// Incident import configuration used across the importer tests.
pub fn sample_config() -> Config {
    Config::from_json(
        r#"{
        "HBConf": {"UserName": "import", "Password": "secret", "InstanceID": "acme"},
        "AttachmentRoot": "/sw/data/fs",
        "CustomerType": "1",
        "SMProfileCodeSeperator": ":",
        "CallDiaryQuery": "SELECT * FROM updatedb WHERE callref = [sourceref]",
        "RelatedRequestQuery": "SELECT parentRequest, childRequest FROM cmn_rel_opencall_oc",
        "SWSystemDBConf": {"Driver": "swsql", "Server": "sw01", "Database": "sw_systemdb"},
        "SWAppDBConf": {"Driver": "mysql", "Server": "sw01", "Database": "swdata"},
        "RequestTypesToImport": [{
            "Import": true,
            "CallClass": "Incident",
            "SupportworksCallClass": "Incident",
            "DefaultTeam": "Service Desk",
            "DefaultPriority": "P3",
            "SQLStatement": "SELECT * FROM opencall WHERE callclass = 'Incident'",
            "CoreFieldMapping": {
                "h_summary": "[itsm_title]",
                "h_status": "[status]",
                "h_fk_priorityid": "[priority]",
                "h_ownerid": "[owner]",
                "h_fk_user_id": "[cust_id]",
                "h_category_id": "[probcode]",
                "h_site": "",
                "h_site_id": "[site]",
                "h_datelogged": "[logdatex]",
                "h_dateclosed": "[closedatex]",
                "h_dateresolved": "[resolvedatex]"
            },
            "AdditionalFieldMapping": {"h_custom_a": "[custom_a]", "h_flags": "[flags]"}
        }],
        "PriorityMapping": {"1": "High"},
        "StatusMapping": {"1": "status.open", "4": "status.onHold", "6": "status.closed", "18": "status.cancelled"}
    }"#,
    )
    .unwrap()
}

/// Scripted [`TargetApi`] recording every call. Forks share the log.
#[derive(Clone)]
pub struct MockApi {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<MethodCall>>>,
}

impl MockApi {
    pub fn new(responder: impl Fn(&MethodCall) -> MethodResponse + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answers every call with an empty OK.
    pub fn accept_all() -> Self {
        Self::new(|_| ok(""))
    }

    pub fn calls(&self) -> Vec<MethodCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls to `service::method`.
    pub fn calls_to(&self, name: &str) -> Vec<MethodCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.name() == name)
            .collect()
    }

    /// Calls to `service::method` whose `entity` parameter matches.
    pub fn calls_for_entity(&self, name: &str, entity: &str) -> Vec<MethodCall> {
        self.calls_to(name)
            .into_iter()
            .filter(|c| c.get("entity") == Some(entity))
            .collect()
    }
}

#[async_trait]
impl TargetApi for MockApi {
    async fn invoke(&self, call: &MethodCall) -> Result<MethodResponse> {
        self.calls.lock().unwrap().push(call.clone());
        Ok((self.responder)(call))
    }

    fn fork(&self) -> Arc<dyn TargetApi> {
        Arc::new(self.clone())
    }
}

/// Canned [`SourceReader`].
#[derive(Default)]
pub struct MockSource {
    exact: Vec<(String, Vec<SourceRow>)>,
    prefix: Vec<(String, Vec<SourceRow>)>,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows for a query matched exactly.
    pub fn with_rows(mut self, sql: &str, rows: Vec<SourceRow>) -> Self {
        self.exact.push((sql.to_string(), rows));
        self
    }

    /// Rows for any query starting with `prefix`.
    pub fn with_prefix_rows(mut self, prefix: &str, rows: Vec<SourceRow>) -> Self {
        self.prefix.push((prefix.to_string(), rows));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn rows_for(&self, sql: &str) -> Vec<SourceRow> {
        self.exact
            .iter()
            .find(|(q, _)| q == sql)
            .or_else(|| self.prefix.iter().find(|(p, _)| sql.starts_with(p.as_str())))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SourceReader for MockSource {
    fn stream_rows(&self, sql: String) -> mpsc::Receiver<Result<SourceRow>> {
        self.queries.lock().unwrap().push(sql.clone());
        let rows = self.rows_for(&sql);
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for row in rows {
            let _ = tx.try_send(Ok(row));
        }
        rx
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mock"
    }

    async fn close(&self) {}
}
