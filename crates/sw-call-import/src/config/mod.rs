//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_concurrency;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a JSON (`.json`) or YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 fingerprint of the configuration for the run log.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Request types flagged for import, in configuration order.
    pub fn enabled_request_types(&self) -> impl Iterator<Item = &RequestTypeConfig> {
        self.request_types_to_import.iter().filter(|t| t.import)
    }
}

impl DbConfig {
    /// Build an ADO-style connection string for tiberius.
    pub fn connection_string(&self) -> String {
        format!(
            "Server=tcp:{},{};Database={};User Id={};Password={};Encrypt={};TrustServerCertificate=true",
            self.server,
            self.effective_port(),
            self.database,
            self.user_name,
            self.password,
            self.encrypt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "HBConf": {"UserName": "import", "Password": "secret", "InstanceID": "acme"},
        "SWServerAddress": "sw01",
        "AttachmentRoot": "/sw/data/fs",
        "CustomerType": "1",
        "SMProfileCodeSeperator": ":",
        "CallDiaryQuery": "SELECT * FROM updatedb WHERE callref = [sourceref]",
        "SWSystemDBConf": {"Driver": "swsql", "Server": "sw01", "Database": "sw_systemdb", "UserName": "root", "Password": "", "Port": 5002, "Encrypt": false},
        "SWAppDBConf": {"Driver": "mysql", "Server": "sw01", "Database": "swdata", "UserName": "root", "Password": "pw", "Port": 3306, "Encrypt": false},
        "RequestTypesToImport": [{
            "Import": true,
            "CallClass": "Incident",
            "SupportworksCallClass": "Incident",
            "DefaultTeam": "Service Desk",
            "DefaultPriority": "P3",
            "DefaultService": "",
            "SQLStatement": "SELECT * FROM opencall WHERE callclass = 'Incident'",
            "CoreFieldMapping": {"h_summary": "[itsm_title]", "h_status": "[status]"},
            "AdditionalFieldMapping": {"h_custom_a": "[custom_a]"}
        }],
        "StatusMapping": {"1": "status.open", "4": "status.onHold"}
    }"#;

    #[test]
    fn test_from_json() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.hb_conf.instance_id, "acme");
        assert_eq!(config.hb_conf.zone, "eur");
        assert_eq!(config.customer_type, "1");
        assert!(config.process_attachments);
        assert_eq!(config.enabled_request_types().count(), 1);
        assert_eq!(
            config.request_types_to_import[0].core_mapping("h_summary"),
            Some("[itsm_title]")
        );
        assert_eq!(config.sw_system_db_conf.effective_port(), 5002);
    }

    #[test]
    fn test_load_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sw_app_db_conf.database, "swdata");
    }

    #[test]
    fn test_yaml_accepts_json_document() {
        // JSON is valid YAML flow syntax.
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.hb_conf.user_name, "import");
    }

    #[test]
    fn test_endpoint() {
        let mut config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(
            config.hb_conf.endpoint(),
            "https://eurapi.hornbill.com/acme/xmlmc/"
        );
        config.hb_conf.url = Some("http://127.0.0.1:1234/xmlmc".into());
        assert_eq!(config.hb_conf.endpoint(), "http://127.0.0.1:1234/xmlmc/");
    }

    #[test]
    fn test_hash_is_stable() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.hash(), config.hash());
        assert_eq!(config.hash().len(), 64);
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = Config::from_json(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("\"pw\""));
    }
}
