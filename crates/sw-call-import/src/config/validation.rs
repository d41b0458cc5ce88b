//! Configuration validation.

use super::{Config, DbConfig, APP_DRIVERS, SYSTEM_DRIVERS};
use crate::error::{ImportError, Result};
use crate::mapping::RequestStatus;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Instance validation
    if config.hb_conf.instance_id.is_empty() && config.hb_conf.url.is_none() {
        return Err(ImportError::Config("HBConf.InstanceID is required".into()));
    }
    if config.hb_conf.user_name.is_empty() {
        return Err(ImportError::Config("HBConf.UserName is required".into()));
    }
    if config.hb_conf.password.is_empty() {
        return Err(ImportError::Config("HBConf.Password is required".into()));
    }

    validate_db("SWAppDBConf", &config.sw_app_db_conf, APP_DRIVERS)?;
    validate_db("SWSystemDBConf", &config.sw_system_db_conf, SYSTEM_DRIVERS)?;

    let enabled: Vec<_> = config.enabled_request_types().collect();
    if enabled.is_empty() {
        return Err(ImportError::Config(
            "RequestTypesToImport must enable at least one call class".into(),
        ));
    }
    for request_type in enabled {
        if request_type.call_class.is_empty() {
            return Err(ImportError::Config(
                "RequestTypesToImport.CallClass is required".into(),
            ));
        }
        if request_type.sql_statement.trim().is_empty() {
            return Err(ImportError::Config(format!(
                "RequestTypesToImport[{}].SQLStatement is required",
                request_type.call_class
            )));
        }
    }

    // Every status code must land on exactly one target state
    for (code, target) in &config.status_mapping {
        if RequestStatus::parse(target).is_none() {
            return Err(ImportError::Config(format!(
                "StatusMapping[{}] has unknown target status '{}'",
                code, target
            )));
        }
    }

    if config.customer_type != "0" && config.customer_type != "1" {
        return Err(ImportError::Config(format!(
            "CustomerType must be '0' (user) or '1' (contact), got '{}'",
            config.customer_type
        )));
    }

    Ok(())
}

/// Validate a requested worker count (1-10).
pub fn validate_concurrency(workers: usize) -> Result<()> {
    if !(1..=10).contains(&workers) {
        return Err(ImportError::Config(format!(
            "concurrent must be between 1 and 10, got {}",
            workers
        )));
    }
    Ok(())
}

fn validate_db(name: &str, db: &DbConfig, drivers: &[&str]) -> Result<()> {
    let driver = db.driver.to_lowercase();
    if driver.is_empty() {
        return Err(ImportError::Config(format!("{}.Driver is required", name)));
    }
    if !drivers.contains(&driver.as_str()) {
        return Err(ImportError::Config(format!(
            "{}.Driver must be one of {:?}, got '{}'",
            name, drivers, db.driver
        )));
    }
    if db.server.is_empty() {
        return Err(ImportError::Config(format!("{}.Server is required", name)));
    }
    if db.database.is_empty() {
        return Err(ImportError::Config(format!("{}.Database is required", name)));
    }
    Ok(())
}
