//! # sw-call-import
//!
//! Migrates Supportworks helpdesk calls into Hornbill Service Manager
//! through the XMLMC API.
//!
//! For every enabled call class the importer:
//!
//! - **Creates requests** from configurable field mappings, resolving
//!   priorities, teams, sites, services, categories and customers
//! - **Replays lifecycle** steps: back-dated log date, status history,
//!   workflow spawn and on-hold placement
//! - **Copies history** from the Supportworks call diary
//! - **Attaches files**, unpacking archived `.swm` mail messages
//! - **Links associations** between imported calls
//!
//! Work is spread over a bounded pool of workers sharing one session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sw_call_import::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sw_call_import::Result<()> {
//!     let config = Config::load("conf.json")?;
//!     let orchestrator = Orchestrator::new(config, 4, false).await?;
//!     let summary = orchestrator.run().await?;
//!     println!("Created {} requests", summary.created);
//!     Ok(())
//! }
//! ```

pub mod associations;
pub mod attachments;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod import;
pub mod joblog;
pub mod mapping;
pub mod orchestrator;
pub mod pool;
pub mod source;
pub mod swm;
pub mod xmlmc;

#[cfg(test)]
mod testing;

pub use config::{Config, DbConfig, InstanceConfig, RequestTypeConfig};
pub use error::{ImportError, Result};
pub use import::{Counters, CounterSnapshot, LoggedMap, MigrationContext};
pub use orchestrator::{CallClassReport, ImportSummary, Orchestrator};
pub use source::{SourceRow, SqlValue, SupportworksSource};
pub use xmlmc::{MethodCall, MethodResponse, TargetApi, XmlmcClient};
