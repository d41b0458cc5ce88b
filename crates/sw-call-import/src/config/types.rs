//! Configuration type definitions.
//!
//! Field names follow the PascalCase keys of the importer's `conf.json`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Drivers accepted for the Supportworks application database.
pub const APP_DRIVERS: &[&str] = &["swsql", "mysql", "mysql320", "mssql"];

/// Drivers accepted for the Supportworks system (cache) database.
pub const SYSTEM_DRIVERS: &[&str] = &["swsql", "mysql", "mysql320"];

/// Root configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Target instance connection and credentials.
    #[serde(rename = "HBConf")]
    pub hb_conf: InstanceConfig,

    /// Supportworks server address (informational, used in run logs).
    #[serde(rename = "SWServerAddress", default)]
    pub sw_server_address: String,

    /// Root folder of the Supportworks file store (`fs/<shard>/<file>`).
    #[serde(default)]
    pub attachment_root: String,

    /// "0" when customers are user accounts, "1" when they are contacts.
    #[serde(default = "default_customer_type")]
    pub customer_type: String,

    /// Take the request organisation/company from the customer record.
    #[serde(default)]
    pub customer_organisation: bool,

    /// Separator used in target profile codes, replacing `-`.
    #[serde(rename = "SMProfileCodeSeperator", default = "default_profile_separator")]
    pub sm_profile_code_separator: String,

    /// Query returning `parentRequest`/`childRequest` source references.
    #[serde(default)]
    pub related_request_query: String,

    /// Diary query; `[sourceref]` is replaced with the numeric call reference.
    #[serde(default)]
    pub call_diary_query: String,

    /// Migrate file attachments after each request (default: true).
    #[serde(default = "default_true")]
    pub process_attachments: bool,

    /// Supportworks system database (attachment metadata).
    #[serde(rename = "SWSystemDBConf")]
    pub sw_system_db_conf: DbConfig,

    /// Supportworks application database (calls, diary, associations).
    #[serde(rename = "SWAppDBConf")]
    pub sw_app_db_conf: DbConfig,

    /// Per call class import definitions.
    #[serde(default)]
    pub request_types_to_import: Vec<RequestTypeConfig>,

    /// Source priority → target priority name.
    #[serde(default)]
    pub priority_mapping: BTreeMap<String, String>,

    /// Source team → target team name.
    #[serde(default)]
    pub team_mapping: BTreeMap<String, String>,

    /// Source profile code → target request profile code.
    #[serde(default)]
    pub category_mapping: BTreeMap<String, String>,

    /// Source resolution code → target closure profile code.
    #[serde(default)]
    pub resolution_category_mapping: BTreeMap<String, String>,

    /// Source service → target service name.
    #[serde(default)]
    pub service_mapping: BTreeMap<String, String>,

    /// Source status code → target status (`status.open`, `onHold`, ...).
    #[serde(default)]
    pub status_mapping: BTreeMap<String, String>,

    /// Already migrated calls: source reference → target reference.
    #[serde(default)]
    pub existing_request_mappings: BTreeMap<String, String>,
}

/// Target instance configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance id, e.g. "acme".
    #[serde(rename = "InstanceID")]
    pub instance_id: String,

    /// API zone prefix (default: "eur").
    #[serde(rename = "Zone", default = "default_zone")]
    pub zone: String,

    /// Full XMLMC endpoint, overriding the zone/instance derived URL.
    #[serde(rename = "URL", default)]
    pub url: Option<String>,

    /// Logon user id.
    #[serde(rename = "UserName")]
    pub user_name: String,

    /// Logon password.
    #[serde(rename = "Password")]
    pub password: String,
}

impl InstanceConfig {
    /// XMLMC endpoint for this instance.
    pub fn endpoint(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string() + "/",
            _ => format!(
                "https://{}api.hornbill.com/{}/xmlmc/",
                self.zone, self.instance_id
            ),
        }
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("instance_id", &self.instance_id)
            .field("zone", &self.zone)
            .field("url", &self.url)
            .field("user_name", &self.user_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Source database connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DbConfig {
    /// swsql, mysql, mysql320 or mssql.
    pub driver: String,

    /// Database host.
    pub server: String,

    /// Username.
    #[serde(default)]
    pub user_name: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Port (default: driver specific).
    #[serde(default)]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Encrypt connection.
    #[serde(default)]
    pub encrypt: bool,
}

impl DbConfig {
    /// Whether the driver speaks the MySQL protocol.
    pub fn is_mysql_family(&self) -> bool {
        matches!(
            self.driver.to_lowercase().as_str(),
            "swsql" | "mysql" | "mysql320"
        )
    }

    /// Port, falling back to the driver default.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match self.driver.to_lowercase().as_str() {
            "mssql" => 1433,
            "swsql" => 5002,
            _ => 3306,
        }
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("user_name", &self.user_name)
            .field("password", &"[REDACTED]")
            .field("port", &self.port)
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("hb_conf", &self.hb_conf)
            .field("sw_server_address", &self.sw_server_address)
            .field("attachment_root", &self.attachment_root)
            .field("sw_system_db_conf", &self.sw_system_db_conf)
            .field("sw_app_db_conf", &self.sw_app_db_conf)
            .field("request_types", &self.request_types_to_import.len())
            .finish_non_exhaustive()
    }
}

/// One call class to import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestTypeConfig {
    /// Skip this class when false.
    #[serde(default)]
    pub import: bool,

    /// Target request class, e.g. "Incident".
    pub call_class: String,

    /// Supportworks call class, e.g. "Incident".
    #[serde(default)]
    pub supportworks_call_class: String,

    /// Team name used when the mapped team cannot be resolved.
    #[serde(default)]
    pub default_team: String,

    /// Priority name used when the mapped priority cannot be resolved.
    #[serde(default)]
    pub default_priority: String,

    /// Service name used when the mapped service cannot be resolved.
    #[serde(default)]
    pub default_service: String,

    /// Query listing the calls of this class.
    #[serde(rename = "SQLStatement", default)]
    pub sql_statement: String,

    /// Target column → mapping expression.
    #[serde(default)]
    pub core_field_mapping: BTreeMap<String, String>,

    /// Extended (additional) column → mapping expression.
    #[serde(default)]
    pub additional_field_mapping: BTreeMap<String, String>,
}

impl RequestTypeConfig {
    /// Request type code used by the application options (`IN`, `SR`, ...).
    pub fn type_code(&self) -> Option<&'static str> {
        match self.call_class.as_str() {
            "Incident" => Some("IN"),
            "Service Request" => Some("SR"),
            "Change Request" => Some("CH"),
            "Problem" => Some("PM"),
            "Known Error" => Some("KE"),
            "Release" => Some("RM"),
            _ => None,
        }
    }

    /// Mapping expression for a core field, if configured and non-empty.
    pub fn core_mapping(&self, field: &str) -> Option<&str> {
        self.core_field_mapping
            .get(field)
            .map(String::as_str)
            .filter(|m| !m.is_empty())
    }
}

fn default_customer_type() -> String {
    "0".to_string()
}

fn default_profile_separator() -> String {
    ":".to_string()
}

fn default_zone() -> String {
    "eur".to_string()
}

fn default_true() -> bool {
    true
}
