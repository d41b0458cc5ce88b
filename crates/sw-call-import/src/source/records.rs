//! Typed records read from the Supportworks databases.

use super::SourceRow;

/// Metadata for one stored file (`system_cfastore`).
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachmentRecord {
    pub file_id: String,
    pub callref: i64,
    pub data_id: i64,
    /// `999999999` for files attached to the call itself.
    pub update_id: String,
    pub compressed: String,
    pub size_u: i64,
    pub size_c: i64,
    pub filename: String,
    pub added_by: String,
    pub time_added: i64,
    pub file_time: String,
}

impl FileAttachmentRecord {
    /// Build from a `system_cfastore` row.
    pub fn from_row(row: &SourceRow) -> Self {
        Self {
            file_id: row.string_or_empty("fileid"),
            callref: row.get_int("callref").unwrap_or_default(),
            data_id: row.get_int("dataid").unwrap_or_default(),
            update_id: row.string_or_empty("updateid"),
            compressed: row.string_or_empty("compressed"),
            size_u: row.get_int("sizeu").unwrap_or_default(),
            size_c: row.get_int("sizec").unwrap_or_default(),
            filename: row.string_or_empty("filename"),
            added_by: row.string_or_empty("addedby"),
            time_added: row.get_int("timeadded").unwrap_or_default(),
            file_time: row.string_or_empty("filetime"),
        }
    }
}

/// One call diary entry (`updatedb`).
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryUpdate {
    pub update_index: i64,
    pub update_time: Option<i64>,
    pub source: String,
    pub code: String,
    pub text: String,
    pub time_spent: Option<i64>,
    pub update_type: Option<i64>,
    pub analyst_id: String,
    pub group_id: String,
}

impl DiaryUpdate {
    /// Build from a diary query row.
    pub fn from_row(row: &SourceRow) -> Self {
        Self {
            update_index: row.get_int("udindex").unwrap_or_default(),
            update_time: row.get_epoch("updatetimex"),
            source: row.string_or_empty("udsource"),
            code: row.string_or_empty("udcode"),
            text: row.string_or_empty("updatetxt"),
            time_spent: row.get_int("timespent"),
            update_type: row.get_int("udtype"),
            analyst_id: row.string_or_empty("repid"),
            group_id: row.string_or_empty("groupid"),
        }
    }
}

/// Parent/child call pair from the association query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationPair {
    pub master: String,
    pub slave: String,
}

impl AssociationPair {
    /// Build from a row with `parentRequest` and `childRequest` columns.
    pub fn from_row(row: &SourceRow) -> Self {
        Self {
            master: row.string_or_empty("parentRequest"),
            slave: row.string_or_empty("childRequest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SqlValue;

    #[test]
    fn test_file_record_from_row() {
        let row = SourceRow::new()
            .with("fileid", SqlValue::Int(77))
            .with("callref", SqlValue::Int(123))
            .with("dataid", SqlValue::Int(2))
            .with("updateid", SqlValue::Text("999999999".into()))
            .with("filename", SqlValue::Text("log.txt".into()))
            .with("addedby", SqlValue::Text("alice".into()))
            .with("timeadded", SqlValue::Int(1_600_000_000));
        let record = FileAttachmentRecord::from_row(&row);
        assert_eq!(record.file_id, "77");
        assert_eq!(record.callref, 123);
        assert_eq!(record.data_id, 2);
        assert_eq!(record.update_id, "999999999");
        assert_eq!(record.size_u, 0);
    }

    #[test]
    fn test_diary_update_from_row() {
        let row = SourceRow::new()
            .with("udindex", SqlValue::Int(3))
            .with("updatetimex", SqlValue::Int(0))
            .with("updatetxt", SqlValue::Text("Rebooted".into()))
            .with("repid", SqlValue::Text("bob".into()));
        let update = DiaryUpdate::from_row(&row);
        assert_eq!(update.update_index, 3);
        assert_eq!(update.update_time, None);
        assert_eq!(update.time_spent, None);
        assert_eq!(update.analyst_id, "bob");
    }
}
