//! Field mapping helpers.
//!
//! Mapping expressions reference source columns in square brackets, e.g.
//! `"[itsm_title] ([callref])"`. `[oldCallRef]` is the legacy display
//! reference: `h_formattedcallref` when the query selects it, otherwise the
//! call reference padded to `F0000123`.

use std::fmt;

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::source::SourceRow;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("valid regex"));
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

/// Resolves mapping expressions against source rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldMapper;

impl FieldMapper {
    /// Substitute every `[column]` in `expression` with the row value.
    /// Missing or NULL columns become empty strings.
    pub fn resolve(expression: &str, row: &SourceRow) -> String {
        PLACEHOLDER
            .replace_all(expression, |caps: &Captures<'_>| {
                let column = &caps[1];
                if column == "oldCallRef" {
                    legacy_reference(row)
                } else {
                    row.string_or_empty(column)
                }
            })
            .into_owned()
    }
}

/// `h_formattedcallref`, or `F` + call reference padded to seven digits.
pub fn legacy_reference(row: &SourceRow) -> String {
    if let Some(formatted) = row.get_string("h_formattedcallref") {
        return formatted;
    }
    row.get_string("callref")
        .map(|callref| pad_call_ref(&callref, "F", 7))
        .unwrap_or_default()
}

/// Numeric call reference from a source reference: the first run of
/// digits, so `"F0001234"` and `"1234"` both give 1234.
pub fn call_ref_number(source_ref: &str) -> Option<i64> {
    DIGITS.find(source_ref)?.as_str().parse().ok()
}

/// Left-pad `value` with zeros to `width` and prefix it.
pub fn pad_call_ref(value: &str, prefix: &str, width: usize) -> String {
    format!("{}{:0>width$}", prefix, value, width = width)
}

/// Convert a Unix epoch string to `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Empty, zero and unparsable values give `None`.
pub fn epoch_to_datetime(epoch: &str) -> Option<String> {
    let seconds: i64 = epoch.trim().parse().ok()?;
    if seconds == 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Rename a Supportworks extended column to its target form:
/// `h_custom_a` → `h_custom_1`, `h_custom_b` → `h_custom_2`, ...
pub fn extended_column_name(column: &str) -> String {
    match column.rsplit_once('_') {
        Some((stem, suffix)) if suffix.len() == 1 => {
            let ch = suffix.as_bytes()[0];
            if ch.is_ascii_lowercase() {
                format!("{}_{}", stem, ch - b'a' + 1)
            } else {
                column.to_string()
            }
        }
        _ => column.to_string(),
    }
}

/// Closed set of target request states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    New,
    Open,
    OnHold,
    Resolved,
    Closed,
    Cancelled,
}

impl RequestStatus {
    /// Parse `status.open`, `open`, `onHold` etc. (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        let name = lower.strip_prefix("status.").unwrap_or(&lower);
        match name {
            "new" => Some(Self::New),
            "open" => Some(Self::Open),
            "onhold" => Some(Self::OnHold),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Wire value for `h_status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "status.new",
            Self::Open => "status.open",
            Self::OnHold => "status.onHold",
            Self::Resolved => "status.resolved",
            Self::Closed => "status.closed",
            Self::Cancelled => "status.cancelled",
        }
    }

    /// Resolved or closed.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// No workflow is spawned for these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed | Self::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of translating a source status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTranslation {
    /// State sent at creation.
    pub status: RequestStatus,
    /// Place the request on hold once it exists.
    pub hold: bool,
    /// Archive the request (cancelled calls).
    pub archived: bool,
}

/// Map a configured status onto what is sent at creation. On-hold cannot
/// be set at creation, so it is created open with a deferred hold.
pub fn translate_status(status: RequestStatus) -> StatusTranslation {
    match status {
        RequestStatus::OnHold => StatusTranslation {
            status: RequestStatus::Open,
            hold: true,
            archived: false,
        },
        RequestStatus::Cancelled => StatusTranslation {
            status,
            hold: false,
            archived: true,
        },
        _ => StatusTranslation {
            status,
            hold: false,
            archived: false,
        },
    }
}
