//! Error types for the call import library.

use thiserror::Error;

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Configuration error (invalid file, missing fields, unknown driver, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// MySQL-protocol source database error (swsql, mysql, mysql320)
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// MSSQL source database error
    #[error("Source database error: {0}")]
    SourceMssql(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The target API answered with a non-OK status
    #[error("API call {service}::{method} failed: {message}")]
    Api {
        service: String,
        method: String,
        message: String,
    },

    /// HTTP transport error talking to the target API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed XML request or response
    #[error("XML error: {0}")]
    Xml(String),

    /// A single file attachment could not be migrated
    #[error("Attachment {file}: {message}")]
    Attachment { file: String, message: String },

    /// SWM composite email could not be decoded
    #[error("SWM decode failed: {0}")]
    Swm(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON configuration or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip container error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ImportError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        ImportError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Api error for a rejected method call
    pub fn api(
        service: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ImportError::Api {
            service: service.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create an Attachment error
    pub fn attachment(file: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Attachment {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::Config(_) | ImportError::Yaml(_) | ImportError::Json(_) => 1,
            ImportError::Source(_) | ImportError::SourceMssql(_) | ImportError::Pool { .. } => 2,
            ImportError::Api { .. } | ImportError::Http(_) | ImportError::Xml(_) => 3,
            ImportError::Io(_) => 7,
            _ => 10,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ImportError::Config("x".into()).exit_code(), 1);
        assert_eq!(ImportError::pool("down", "connecting").exit_code(), 2);
        assert_eq!(ImportError::api("session", "userLogon", "bad").exit_code(), 3);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(ImportError::from(io).exit_code(), 7);
        assert_eq!(ImportError::Swm("two files".into()).exit_code(), 10);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = ImportError::api("data", "entityAddRecord", "invalid column");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: API call data::entityAddRecord failed"));
        assert!(text.contains("invalid column"));
    }
}
