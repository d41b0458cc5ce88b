//! SWM composite email decoding.
//!
//! An `.swm` file is a zip archive holding exactly one MIME message. It is
//! turned into a plain text transcript plus the files carried inside the
//! message. Decoding runs through fixed stages; a failure in any stage
//! abandons this one file.

use std::fmt;
use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::DateTime;
use mail_parser::{Address, Message, MessageParser, MimeHeaders, PartType};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ImportError, Result};

/// File extension of composite emails.
pub const SWM_EXTENSION: &str = "swm";

const SEPARATOR_WIDTH: usize = 50;

/// Largest inner message accepted, declared or actual.
const MAX_INNER_SIZE: u64 = 256 * 1024 * 1024;

static RAW_ADDRESS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^(from|to):[ \t]*(.*)$").expect("valid regex"));
static ANGLE_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").expect("valid regex"));

/// Decoder stages, named in failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwmStage {
    OpenArchive,
    LocateSinglePart,
    ParseMime,
    FallbackHeaderParse,
    ExtractAttachments,
    BuildTranscript,
}

impl fmt::Display for SwmStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenArchive => "open archive",
            Self::LocateSinglePart => "locate message",
            Self::ParseMime => "parse MIME",
            Self::FallbackHeaderParse => "read raw headers",
            Self::ExtractAttachments => "extract attachments",
            Self::BuildTranscript => "build transcript",
        };
        f.write_str(name)
    }
}

fn stage_error(stage: SwmStage, message: impl fmt::Display) -> ImportError {
    ImportError::Swm(format!("{}: {}", stage, message))
}

/// A file carried inside the message.
#[derive(Debug, Clone, PartialEq)]
pub struct SubAttachment {
    pub filename: String,
    pub mime_type: String,
    pub content_id: Option<String>,
    /// Base64 of the decoded content.
    pub payload: String,
    /// Decoded size in bytes.
    pub size: usize,
}

/// The flattened email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailTranscript {
    pub header: String,
    pub from: String,
    pub to: String,
    /// `YYYY-MM-DD HH:MM:SS`, when the message carries a date.
    pub sent: Option<String>,
    pub subject: String,
    /// CRLF line endings.
    pub body: String,
    pub attachments: Vec<SubAttachment>,
}

impl EmailTranscript {
    /// Text layout stored in place of the container.
    pub fn to_text(&self) -> String {
        let separator = "-".repeat(SEPARATOR_WIDTH);
        let mut out = String::new();
        out.push_str("RFC Header: ");
        out.push_str(&self.header);
        out.push_str("\r\n");
        out.push_str(&separator);
        out.push_str("\r\n");
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("To: {}\r\n", self.to));
        if let Some(sent) = &self.sent {
            out.push_str(&format!("Sent: {}\r\n", sent));
        }
        out.push_str(&format!("Subject: {}\r\n", self.subject));
        out.push_str(&separator);
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// Decode an SWM container.
pub fn decode(container: &[u8]) -> Result<EmailTranscript> {
    let mut archive = zip::ZipArchive::new(Cursor::new(container))
        .map_err(|e| stage_error(SwmStage::OpenArchive, e))?;
    let raw = single_entry(&mut archive)?;

    let message = MessageParser::default()
        .parse(&raw)
        .ok_or_else(|| stage_error(SwmStage::ParseMime, "not a MIME message"))?;

    let header = crlf(&String::from_utf8_lossy(raw_header(&raw)));
    let mut from = message.from().map(addresses).unwrap_or_default();
    let mut to = message.to().map(addresses).unwrap_or_default();
    if from.is_empty() || to.is_empty() {
        let (raw_from, raw_to) = fallback_addresses(&header);
        if from.is_empty() {
            from = raw_from;
        }
        if to.is_empty() {
            to = raw_to;
        }
    }

    let attachments = extract_attachments(&message);

    let sent = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string());

    let body = text_body(&message)
        .or_else(|| html_body(&message))
        .map(|b| crlf(&b))
        .unwrap_or_default();

    Ok(EmailTranscript {
        header,
        from: from.join(", "),
        to: to.join(", "),
        sent,
        subject: message.subject().unwrap_or_default().to_string(),
        body,
        attachments,
    })
}

fn single_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Result<Vec<u8>> {
    let files: Vec<usize> = (0..archive.len())
        .filter(|i| archive.by_index(*i).map(|f| !f.is_dir()).unwrap_or(false))
        .collect();
    match files.as_slice() {
        [index] => {
            let mut entry = archive
                .by_index(*index)
                .map_err(|e| stage_error(SwmStage::LocateSinglePart, e))?;
            if entry.size() > MAX_INNER_SIZE {
                return Err(stage_error(
                    SwmStage::LocateSinglePart,
                    format!("inner file declares {} bytes", entry.size()),
                ));
            }
            let mut raw = Vec::with_capacity(entry.size() as usize);
            (&mut entry)
                .take(MAX_INNER_SIZE + 1)
                .read_to_end(&mut raw)
                .map_err(|e| stage_error(SwmStage::LocateSinglePart, e))?;
            if raw.len() as u64 > MAX_INNER_SIZE {
                return Err(stage_error(SwmStage::LocateSinglePart, "inner file too large"));
            }
            Ok(raw)
        }
        [] => Err(stage_error(SwmStage::LocateSinglePart, "archive is empty")),
        many => Err(stage_error(
            SwmStage::LocateSinglePart,
            format!("expected one inner file, found {}", many.len()),
        )),
    }
}

/// Bytes before the first blank line.
fn raw_header(raw: &[u8]) -> &[u8] {
    let crlf_end = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf_end = raw.windows(2).position(|w| w == b"\n\n");
    let end = match (crlf_end, lf_end) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    };
    &raw[..end]
}

fn addresses(address: &Address<'_>) -> Vec<String> {
    match address {
        Address::List(list) => list
            .iter()
            .filter_map(|a| a.address.as_deref())
            .map(str::to_string)
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .filter_map(|a| a.address.as_deref())
            .map(str::to_string)
            .collect(),
    }
}

/// Lenient `From`/`To` scan over the raw header block.
fn fallback_addresses(header: &str) -> (Vec<String>, Vec<String>) {
    let mut from = Vec::new();
    let mut to = Vec::new();
    for caps in RAW_ADDRESS_HEADER.captures_iter(header) {
        let value = caps[2].trim();
        let address = ANGLE_ADDRESS
            .captures(value)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| value.to_string());
        if address.is_empty() {
            continue;
        }
        if caps[1].eq_ignore_ascii_case("from") {
            from.push(address);
        } else {
            to.push(address);
        }
    }
    (from, to)
}

fn text_body(message: &Message<'_>) -> Option<String> {
    message
        .text_body
        .iter()
        .filter_map(|id| message.parts.get(*id))
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        })
}

fn html_body(message: &Message<'_>) -> Option<String> {
    message
        .html_body
        .iter()
        .filter_map(|id| message.parts.get(*id))
        .find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        })
}

/// Attachments and inline parts. Unnamed text parts are the body; empty
/// payloads are dropped.
fn extract_attachments(message: &Message<'_>) -> Vec<SubAttachment> {
    let mut out = Vec::new();
    for part in &message.parts {
        let content: Vec<u8> = match &part.body {
            PartType::Multipart(_) => continue,
            PartType::Text(text) | PartType::Html(text) => {
                if part.attachment_name().is_none() {
                    continue;
                }
                text.as_bytes().to_vec()
            }
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => bytes.to_vec(),
            PartType::Message(inner) => inner.raw_message.to_vec(),
        };
        if content.is_empty() {
            continue;
        }

        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let filename = part
            .attachment_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("attachment{}", out.len() + 1));

        out.push(SubAttachment {
            filename,
            mime_type,
            content_id: part.content_id().map(|id| id.trim_matches(&['<', '>'][..]).to_string()),
            size: content.len(),
            payload: STANDARD.encode(&content),
        });
    }
    out
}

/// Normalize any line endings to CRLF.
pub fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

/// Whether a stored file name is a composite email.
pub fn is_swm(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(SWM_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    pub(crate) const MESSAGE: &str = "From: Alice Example <alice@example.com>\r\n\
To: desk@example.com\r\n\
Subject: Printer on fire\r\n\
Date: Fri, 14 Jul 2017 02:40:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
The printer is on fire.\nPlease send help.\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQKJcfsj6IK\r\n\
--XYZ\r\n\
Content-Type: image/png; name=\"smoke.png\"\r\n\
Content-Disposition: inline; filename=\"smoke.png\"\r\n\
Content-ID: <smoke@example.com>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==\r\n\
--XYZ--\r\n";

    pub(crate) fn container(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_decode_round_trip() {
        let swm = container(&[("message.eml", MESSAGE.as_bytes())]);
        let transcript = decode(&swm).unwrap();

        assert_eq!(transcript.from, "alice@example.com");
        assert_eq!(transcript.to, "desk@example.com");
        assert_eq!(transcript.subject, "Printer on fire");
        assert_eq!(transcript.sent.as_deref(), Some("2017-07-14 02:40:00"));
        assert_eq!(
            transcript.body.trim_end(),
            "The printer is on fire.\r\nPlease send help."
        );

        assert_eq!(transcript.attachments.len(), 2);
        assert!(transcript.attachments.iter().all(|a| !a.payload.is_empty()));
        let pdf = &transcript.attachments[0];
        assert_eq!(pdf.filename, "report.pdf");
        assert_eq!(pdf.mime_type, "application/pdf");
        let png = &transcript.attachments[1];
        assert_eq!(png.content_id.as_deref(), Some("smoke@example.com"));
    }

    #[test]
    fn test_transcript_layout() {
        let swm = container(&[("message.eml", MESSAGE.as_bytes())]);
        let text = decode(&swm).unwrap().to_text();
        let dashes = "-".repeat(50);
        assert!(text.starts_with("RFC Header: From: Alice Example <alice@example.com>\r\n"));
        assert!(text.contains(&format!(
            "{d}\r\nFrom: alice@example.com\r\nTo: desk@example.com\r\nSent: 2017-07-14 02:40:00\r\nSubject: Printer on fire\r\n{d}\r\nThe printer",
            d = dashes
        )));
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_no_sent_line_without_date() {
        let transcript = EmailTranscript {
            header: "X".into(),
            from: "a@b".into(),
            to: "c@d".into(),
            subject: "s".into(),
            body: "b".into(),
            ..Default::default()
        };
        assert!(!transcript.to_text().contains("Sent:"));
    }

    #[test]
    fn test_multiple_inner_files_rejected() {
        let swm = container(&[("a.eml", MESSAGE.as_bytes()), ("b.eml", MESSAGE.as_bytes())]);
        let err = decode(&swm).unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(decode(b"plain text").is_err());
    }

    #[test]
    fn test_fallback_addresses() {
        let (from, to) = fallback_addresses("From: \"Bob\" <bob@example.com>\r\nTO: desk@example.com\r\n");
        assert_eq!(from, vec!["bob@example.com"]);
        assert_eq!(to, vec!["desk@example.com"]);
    }

    /// Stored single-entry zip whose central directory claims a zip64
    /// uncompressed size of `u64::MAX` for an empty file.
    fn oversized_container() -> Vec<u8> {
        let name = b"message.eml";
        let mut zip = Vec::new();
        // local file header
        zip.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        zip.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        zip.extend_from_slice(&[0; 12]);
        zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip.extend_from_slice(name);

        let cd_offset = zip.len() as u32;
        let mut extra = Vec::new();
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.extend_from_slice(&8u16.to_le_bytes());
        extra.extend_from_slice(&u64::MAX.to_le_bytes());

        let mut cd = Vec::new();
        cd.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        cd.extend_from_slice(&[45, 0, 45, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        cd.extend_from_slice(&0u32.to_le_bytes()); // crc
        cd.extend_from_slice(&0u32.to_le_bytes()); // compressed
        cd.extend_from_slice(&u32::MAX.to_le_bytes()); // uncompressed, see zip64
        cd.extend_from_slice(&(name.len() as u16).to_le_bytes());
        cd.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        cd.extend_from_slice(&[0; 10]); // comment, disk, attributes
        cd.extend_from_slice(&0u32.to_le_bytes()); // local header offset
        cd.extend_from_slice(name);
        cd.extend_from_slice(&extra);
        zip.extend_from_slice(&cd);

        zip.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        zip.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0]);
        zip.extend_from_slice(&(cd.len() as u32).to_le_bytes());
        zip.extend_from_slice(&cd_offset.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip
    }

    #[test]
    fn test_oversized_inner_file_rejected() {
        let result = std::panic::catch_unwind(|| decode(&oversized_container()));
        let err = result.expect("decode must not panic").unwrap_err();
        assert!(matches!(err, ImportError::Swm(_)));
    }

    #[test]
    fn test_fallback_fills_missing_side_only() {
        let message = MESSAGE.replace("To: desk@example.com", "To: undisclosed-recipients:;");
        let swm = container(&[("message.eml", message.as_bytes())]);
        let transcript = decode(&swm).unwrap();
        assert_eq!(transcript.from, "alice@example.com");
        assert_eq!(transcript.to, "undisclosed-recipients:;");
    }

    #[test]
    fn test_crlf_and_extension() {
        assert_eq!(crlf("a\nb\r\nc\rd"), "a\r\nb\r\nc\r\nd");
        assert!(is_swm("mail.SWM"));
        assert!(!is_swm("mail.swm.txt"));
    }
}
