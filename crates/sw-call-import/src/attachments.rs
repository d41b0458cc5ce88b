//! File attachment migration.
//!
//! Supportworks keeps call files on disk under a folder sharded by call
//! reference, with metadata in `system_cfastore`. Each file is pushed to
//! the request itself or to a historic update attachment row, then its
//! content location is written back onto the owning record.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ImportError, Result};
use crate::joblog::JobLog;
use crate::mapping::{epoch_to_datetime, pad_call_ref};
use crate::source::FileAttachmentRecord;
use crate::swm;
use crate::xmlmc::{MethodCall, TargetApi, APP_SERVICE_MANAGER};

/// `updateid` of files attached to the call rather than a diary entry.
pub const PRIMARY_UPDATE_ID: &str = "999999999";

/// Where a file ends up on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    /// The request record.
    Primary,
    /// A historic update attachment row for this (target) update id.
    HistoricUpdate(String),
}

impl AttachTarget {
    /// Route by the source update id. Historic update ids are zero based on
    /// the target, one based in Supportworks.
    pub fn from_update_id(update_id: &str) -> Self {
        let update_id = update_id.trim();
        if update_id == PRIMARY_UPDATE_ID {
            return Self::Primary;
        }
        match update_id.parse::<i64>() {
            Ok(id) => Self::HistoricUpdate((id - 1).to_string()),
            Err(_) => Self::HistoricUpdate(update_id.to_string()),
        }
    }

    /// Entity the content is attached to.
    pub fn entity(&self) -> &'static str {
        match self {
            Self::Primary => "Requests",
            Self::HistoricUpdate(_) => "RequestHistoricUpdateAttachments",
        }
    }
}

/// `<root>/<first four of the 7-digit ref>/f<8-digit ref>.<3-digit data id>`
pub fn storage_path(root: &Path, callref: i64, data_id: i64) -> PathBuf {
    let padded = pad_call_ref(&callref.to_string(), "", 7);
    let folder: String = padded.chars().take(4).collect();
    let file = format!(
        "{}.{}",
        pad_call_ref(&callref.to_string(), "f", 8),
        pad_call_ref(&data_id.to_string(), "", 3)
    );
    root.join(folder).join(file)
}

/// Replace characters file systems reject with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | '|' | '\\' | '/' | ':' | '*' | '?' | '"' => '_',
            c => c,
        })
        .collect()
}

/// One file to push.
struct Upload<'a> {
    record: &'a FileAttachmentRecord,
    filename: String,
    data: String,
    /// Uncompressed and compressed sizes recorded on the historic row.
    sizes: (String, String),
    description: String,
}

fn plain_sizes(size: usize) -> (String, String) {
    (size.to_string(), size.to_string())
}

/// Moves stored files onto target requests.
#[derive(Debug, Clone)]
pub struct AttachmentMigrator {
    root: PathBuf,
}

impl AttachmentMigrator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Migrate one stored file; returns how many files were attached.
    ///
    /// Composite emails are replaced by their transcript (`<name>.txt`) and
    /// every file found inside. A failure of the file itself is an error;
    /// a failed extracted file is logged and skipped.
    pub async fn migrate(
        &self,
        api: &dyn TargetApi,
        record: &FileAttachmentRecord,
        target_ref: &str,
        log: &mut JobLog,
    ) -> Result<usize> {
        let target = AttachTarget::from_update_id(&record.update_id);
        let path = storage_path(&self.root, record.callref, record.data_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ImportError::attachment(&record.filename, format!("{}: {}", path.display(), e))
        })?;
        log.debug(format!("Adding {} from {}", record.filename, path.display()));

        if !swm::is_swm(&record.filename) {
            let upload = Upload {
                record,
                filename: record.filename.clone(),
                sizes: (record.size_u.to_string(), record.size_c.to_string()),
                data: STANDARD.encode(&bytes),
                description: format!("Originally added by {}", record.added_by),
            };
            self.push(api, &target, target_ref, upload, log).await?;
            return Ok(1);
        }

        let transcript = swm::decode(&bytes)
            .map_err(|e| ImportError::attachment(&record.filename, e.to_string()))?;
        let transcript_name = format!("{}.txt", record.filename);
        let text = transcript.to_text();
        let upload = Upload {
            record,
            filename: transcript_name.clone(),
            sizes: plain_sizes(text.len()),
            data: STANDARD.encode(text.as_bytes()),
            description: format!("Originally added by {}", record.added_by),
        };
        self.push(api, &target, target_ref, upload, log).await?;

        let mut attached = 1;
        for inner in transcript.attachments {
            let upload = Upload {
                record,
                filename: inner.filename.clone(),
                sizes: plain_sizes(inner.size),
                data: inner.payload,
                description: format!("File extracted from {}", transcript_name),
            };
            match self.push(api, &target, target_ref, upload, log).await {
                Ok(()) => attached += 1,
                Err(e) => log.warn(e.to_string()),
            }
        }
        Ok(attached)
    }

    async fn push(
        &self,
        api: &dyn TargetApi,
        target: &AttachTarget,
        target_ref: &str,
        upload: Upload<'_>,
        log: &mut JobLog,
    ) -> Result<()> {
        let filename = sanitize_filename(&upload.filename);
        let fail = |e: ImportError| ImportError::attachment(filename.clone(), e.to_string());

        let key = match target {
            AttachTarget::Primary => target_ref.to_string(),
            AttachTarget::HistoricUpdate(update_id) => {
                let call = historic_row_call(upload.record, target_ref, update_id, &filename, &upload.sizes);
                let response = api.invoke_ok(&call).await.map_err(fail)?;
                response
                    .get("primaryEntityData/record/h_pk_fileid")
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ImportError::attachment(filename.clone(), "no file id returned for historic attachment row")
                    })?
            }
        };

        let attach = MethodCall::new("data", "entityAttachFile")
            .param("application", APP_SERVICE_MANAGER)
            .param("entity", target.entity())
            .param("keyValue", key.as_str())
            .param("folder", "/")
            .element("localFile", |f| {
                f.param("fileName", filename.as_str())
                    .param("fileData", upload.data.as_str())
            })
            .param("overwrite", "true");
        let response = api.invoke_ok(&attach).await.map_err(fail)?;
        let location = response
            .get("contentLocation")
            .map(str::to_string)
            .ok_or_else(|| ImportError::attachment(filename.clone(), "no content location returned"))?;

        let finalize = match target {
            AttachTarget::Primary => MethodCall::new("data", "entityAddRecord")
                .param("application", APP_SERVICE_MANAGER)
                .param("entity", "RequestAttachments")
                .element("primaryEntityData", |p| {
                    p.element("record", |r| {
                        r.param("h_request_id", target_ref)
                            .param("h_description", upload.description.as_str())
                            .param("h_filename", filename.as_str())
                            .param("h_contentlocation", location.as_str())
                            .param(
                                "h_timestamp",
                                epoch_to_datetime(&upload.record.time_added.to_string()).unwrap_or_default(),
                            )
                            .param("h_visibility", "trustedGuest")
                    })
                }),
            AttachTarget::HistoricUpdate(_) => MethodCall::new("data", "entityUpdateRecord")
                .param("application", APP_SERVICE_MANAGER)
                .param("entity", "RequestHistoricUpdateAttachments")
                .element("primaryEntityData", |p| {
                    p.element("record", |r| {
                        r.param("h_pk_fileid", key.as_str())
                            .param("h_contentlocation", location.as_str())
                    })
                }),
        };
        api.invoke_ok(&finalize).await.map_err(fail)?;
        log.info(format!(
            "{} file content [{}] added to [{}]",
            target.entity(),
            filename,
            target_ref
        ));
        Ok(())
    }
}

fn historic_row_call(
    record: &FileAttachmentRecord,
    target_ref: &str,
    update_id: &str,
    filename: &str,
    (size_u, size_c): &(String, String),
) -> MethodCall {
    MethodCall::new("data", "entityAddRecord")
        .param("application", APP_SERVICE_MANAGER)
        .param("entity", "RequestHistoricUpdateAttachments")
        .param("returnModifiedData", "true")
        .element("primaryEntityData", |p| {
            p.element("record", |r| {
                r.param("h_addedby", record.added_by.as_str())
                    .param("h_callref", target_ref)
                    .param("h_compressed", record.compressed.as_str())
                    .param("h_dataid", record.data_id.to_string())
                    .param("h_filename", filename)
                    .param("h_filetime", record.file_time.as_str())
                    .param("h_sizec", size_c.as_str())
                    .param("h_sizeu", size_u.as_str())
                    .param("h_timeadded", record.time_added.to_string())
                    .param("h_updateid", update_id)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swm::tests::{container, MESSAGE};
    use crate::testing::{fail, ok, MockApi};

    fn record(update_id: &str, filename: &str) -> FileAttachmentRecord {
        FileAttachmentRecord {
            file_id: "77".into(),
            callref: 123,
            data_id: 2,
            update_id: update_id.into(),
            compressed: "0".into(),
            size_u: 5,
            size_c: 5,
            filename: filename.into(),
            added_by: "alice".into(),
            time_added: 1_500_000_000,
            file_time: "1500000000".into(),
        }
    }

    fn store(root: &Path, data: &[u8]) {
        let path = storage_path(root, 123, 2);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn api() -> MockApi {
        MockApi::new(|call| match (call.method(), call.get("entity")) {
            ("entityAddRecord", Some("RequestHistoricUpdateAttachments")) => {
                ok("<primaryEntityData><record><h_pk_fileid>501</h_pk_fileid></record></primaryEntityData>")
            }
            ("entityAttachFile", _) => ok("<contentLocation>/files/loc-1</contentLocation>"),
            _ => ok(""),
        })
    }

    #[test]
    fn test_storage_path() {
        let path = storage_path(Path::new("/fs"), 123, 2);
        assert_eq!(path, PathBuf::from("/fs/0000/f00000123.002"));
        let path = storage_path(Path::new("/fs"), 1234567, 10);
        assert_eq!(path, PathBuf::from("/fs/1234/f01234567.010"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(r#"a<b>c|d\e/f:g*h?i"j.txt"#), "a_b_c_d_e_f_g_h_i_j.txt");
        assert_eq!(sanitize_filename("plain.pdf"), "plain.pdf");
    }

    #[test]
    fn test_target_routing() {
        assert_eq!(AttachTarget::from_update_id("999999999"), AttachTarget::Primary);
        assert_eq!(
            AttachTarget::from_update_id("4"),
            AttachTarget::HistoricUpdate("3".into())
        );
        assert_eq!(AttachTarget::Primary.entity(), "Requests");
    }

    #[tokio::test]
    async fn test_primary_file() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), b"hello");
        let api = api();
        let migrator = AttachmentMigrator::new(dir.path());
        let mut log = JobLog::new("F0000123");

        let attached = migrator
            .migrate(&api, &record(PRIMARY_UPDATE_ID, "notes:1.txt"), "IN00001", &mut log)
            .await
            .unwrap();
        assert_eq!(attached, 1);

        let push = &api.calls_to("data::entityAttachFile")[0];
        assert_eq!(push.get("entity"), Some("Requests"));
        assert_eq!(push.get("keyValue"), Some("IN00001"));
        assert_eq!(push.get("localFile/fileName"), Some("notes_1.txt"));
        assert_eq!(push.get("localFile/fileData"), Some("aGVsbG8="));

        let rows = api.calls_for_entity("data::entityAddRecord", "RequestAttachments");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("primaryEntityData/record/h_contentlocation"), Some("/files/loc-1"));
        assert_eq!(
            rows[0].get("primaryEntityData/record/h_description"),
            Some("Originally added by alice")
        );
        assert!(api
            .calls_for_entity("data::entityAddRecord", "RequestHistoricUpdateAttachments")
            .is_empty());
    }

    #[tokio::test]
    async fn test_historic_file_uses_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), b"hello");
        let api = api();
        let migrator = AttachmentMigrator::new(dir.path());
        let mut log = JobLog::new("F0000123");

        migrator
            .migrate(&api, &record("4", "log.txt"), "IN00001", &mut log)
            .await
            .unwrap();

        let names: Vec<String> = api.calls().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec!["data::entityAddRecord", "data::entityAttachFile", "data::entityUpdateRecord"]
        );
        let calls = api.calls();
        assert_eq!(calls[0].get("primaryEntityData/record/h_updateid"), Some("3"));
        assert_eq!(calls[0].get("primaryEntityData/record/h_callref"), Some("IN00001"));
        assert_eq!(calls[1].get("entity"), Some("RequestHistoricUpdateAttachments"));
        assert_eq!(calls[1].get("keyValue"), Some("501"));
        assert_ne!(calls[1].get("keyValue"), Some("77"));
        assert_eq!(calls[2].get("primaryEntityData/record/h_pk_fileid"), Some("501"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let api = api();
        let migrator = AttachmentMigrator::new(dir.path());
        let mut log = JobLog::new("F0000123");
        let err = migrator
            .migrate(&api, &record(PRIMARY_UPDATE_ID, "gone.txt"), "IN00001", &mut log)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone.txt"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_push_fails() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), b"hello");
        let api = MockApi::new(|call| match call.method() {
            "entityAttachFile" => fail("Quota exceeded"),
            _ => ok(""),
        });
        let migrator = AttachmentMigrator::new(dir.path());
        let mut log = JobLog::new("F0000123");
        let err = migrator
            .migrate(&api, &record(PRIMARY_UPDATE_ID, "a.txt"), "IN00001", &mut log)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Quota exceeded"));
        assert!(api.calls_to("data::entityAddRecord").is_empty());
    }

    #[tokio::test]
    async fn test_swm_becomes_transcript_and_parts() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &container(&[("message.eml", MESSAGE.as_bytes())]));
        let api = api();
        let migrator = AttachmentMigrator::new(dir.path());
        let mut log = JobLog::new("F0000123");

        let attached = migrator
            .migrate(&api, &record(PRIMARY_UPDATE_ID, "mail.swm"), "IN00001", &mut log)
            .await
            .unwrap();
        assert_eq!(attached, 3);

        let names: Vec<String> = api
            .calls_to("data::entityAttachFile")
            .iter()
            .map(|c| c.get("localFile/fileName").unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["mail.swm.txt", "report.pdf", "smoke.png"]);
        let rows = api.calls_for_entity("data::entityAddRecord", "RequestAttachments");
        assert_eq!(
            rows[1].get("primaryEntityData/record/h_description"),
            Some("File extracted from mail.swm.txt")
        );
    }
}
