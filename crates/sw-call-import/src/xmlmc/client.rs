//! HTTP transport and session handling for the XMLMC API.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};

use super::{MethodCall, MethodResponse};
use crate::error::{ImportError, Result};

/// Request timeout for a single API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Name the run is logged under on the instance.
const LOG_FILE_NAME: &str = "SW_Call_Import";

/// The remote procedure interface every component talks to.
#[async_trait]
pub trait TargetApi: Send + Sync {
    /// Invoke a method. Transport and parse failures are errors; a non-OK
    /// status is returned as a response for the caller to inspect.
    async fn invoke(&self, call: &MethodCall) -> Result<MethodResponse>;

    /// Invoke a method and turn a non-OK status into an error.
    async fn invoke_ok(&self, call: &MethodCall) -> Result<MethodResponse> {
        self.invoke(call)
            .await?
            .check(call.service(), call.method())
    }

    /// A handle for one worker, sharing this handle's session.
    fn fork(&self) -> Arc<dyn TargetApi>;
}

/// reqwest-backed XMLMC client.
pub struct XmlmcClient {
    http: reqwest::Client,
    endpoint: String,
    session_id: RwLock<Option<String>>,
}

impl XmlmcClient {
    /// Create a client for an endpoint such as
    /// `https://eurapi.hornbill.com/acme/xmlmc/`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            http,
            endpoint,
            session_id: RwLock::new(None),
        })
    }

    /// Current session id.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session_id(&self, id: Option<String>) {
        *self
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// `session::userLogon`; the password is sent base64 encoded.
    pub async fn logon(&self, user_id: &str, password: &str) -> Result<()> {
        info!("Logging into {} as {}", self.endpoint, user_id);
        let call = MethodCall::new("session", "userLogon")
            .param("userId", user_id)
            .param("password", STANDARD.encode(password.as_bytes()));
        let response = self.invoke_ok(&call).await?;
        let session = response
            .get("sessionId")
            .ok_or_else(|| ImportError::api("session", "userLogon", "no sessionId returned"))?;
        self.set_session_id(Some(session.to_string()));
        Ok(())
    }

    /// `session::userLogoff`; failures are logged only.
    pub async fn logoff(&self) {
        let call = MethodCall::new("session", "userLogoff");
        if let Err(e) = self.invoke_ok(&call).await {
            warn!("Logoff failed: {}", e);
        }
        self.set_session_id(None);
    }

    /// Write a line to the instance's log via `system::logMessage`.
    pub async fn log_message(&self, message: &str) {
        let call = MethodCall::new("system", "logMessage")
            .param("fileName", LOG_FILE_NAME)
            .param("group", "general")
            .param("severity", "debug")
            .param("message", message);
        if let Err(e) = self.invoke_ok(&call).await {
            debug!("Instance log write failed: {}", e);
        }
    }

    fn url_for(&self, call: &MethodCall) -> String {
        format!("{}{}/?method={}", self.endpoint, call.service(), call.method())
    }
}

#[async_trait]
impl TargetApi for XmlmcClient {
    async fn invoke(&self, call: &MethodCall) -> Result<MethodResponse> {
        let body = call.to_xml()?;
        let mut request = self
            .http
            .post(self.url_for(call))
            .header("Content-Type", "text/xmlmc")
            .header("Accept", "text/xml")
            .body(body);
        if let Some(session) = self.session_id() {
            request = request.header("Cookie", format!("ESPSessionState={}", session));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        match MethodResponse::parse(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ImportError::api(
                call.service(),
                call.method(),
                format!("HTTP {}", status),
            )),
            Err(e) => Err(e),
        }
    }

    fn fork(&self) -> Arc<dyn TargetApi> {
        Arc::new(XmlmcClient {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            session_id: RwLock::new(self.session_id()),
        })
    }
}
