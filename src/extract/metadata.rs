//! MetadataExtractor (C2, §4.2): per-format internal metadata harvest.
//!
//! PDF dates/author/title come from a lightweight scan of the raw info
//! dictionary (grounded on
//! `original_source/.../metadata_extraction.py::extract_pdf_metadata`'s field
//! list, re-expressed as a byte scanner since the teacher carries no PDF
//! object-model reader and a full one is unwarranted for eight info-dict
//! keys). DOCX/XLSX core properties come from `docProps/core.xml` inside the
//! zip container (OOXML, shared by both formats). Images use EXIF.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Extracted format-level metadata, keyed the way `Document` fields expect
/// (`document_created_at`, `document_author`, ...). Unknown MIME types yield
/// an empty map.
pub type Metadata = HashMap<String, Value>;

pub async fn extract_metadata(path: &Path, mime_type: &str) -> Metadata {
    let path = path.to_path_buf();
    let mime_type = mime_type.to_string();
    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, &mime_type))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "metadata extraction task panicked");
            HashMap::new()
        })
}

fn extract_metadata_blocking(path: &Path, mime_type: &str) -> Metadata {
    match mime_type {
        "application/pdf" => extract_pdf_metadata(path).unwrap_or_else(|e| {
            warn!(file = %path.display(), error = %e, "pdf metadata extraction failed");
            HashMap::new()
        }),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            extract_ooxml_metadata(path).unwrap_or_else(|e| {
                warn!(file = %path.display(), error = %e, "ooxml metadata extraction failed");
                HashMap::new()
            })
        }
        m if m.starts_with("image/") => extract_image_metadata(path).unwrap_or_else(|e| {
            warn!(file = %path.display(), error = %e, "exif extraction failed");
            HashMap::new()
        }),
        _ => HashMap::new(),
    }
}

/// PDF dates: `D:YYYYMMDDhhmmss±HH'mm'` -> ISO-8601 (§4.2).
pub fn parse_pdf_date(raw: &str) -> Option<String> {
    let s = raw.strip_prefix("D:").unwrap_or(raw);
    if s.len() < 14 {
        return None;
    }
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(4..6)?.parse().ok()?;
    let day: u32 = s.get(6..8)?.parse().ok()?;
    let hour: u32 = s.get(8..10)?.parse().ok()?;
    let minute: u32 = s.get(10..12)?.parse().ok()?;
    let second: u32 = s.get(12..14)?.parse().ok()?;

    let naive = NaiveDateTime::parse_from_str(
        &format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
        "%Y-%m-%d %H:%M:%S",
    )
    .ok()?;

    let rest = &s[14..];
    if let Some(sign) = rest.chars().next().filter(|c| *c == '+' || *c == '-') {
        let tz_hours: i32 = rest.get(1..3)?.parse().ok()?;
        let tz_minutes: i32 = rest
            .split('\'')
            .nth(1)
            .and_then(|m| m.get(0..2))
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        let offset_secs = (tz_hours * 3600 + tz_minutes * 60) * if sign == '-' { -1 } else { 1 };
        let offset = FixedOffset::east_opt(offset_secs)?;
        let dt = offset.from_local_datetime(&naive).single()?;
        return Some(dt.to_rfc3339());
    }

    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339())
}

static PDF_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(CreationDate|ModDate|Author|Title|Subject|Keywords|Producer|Creator)\s*\(((?:[^()\\]|\\.)*)\)").unwrap());

fn unescape_pdf_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn extract_pdf_metadata(path: &Path) -> anyhow::Result<Metadata> {
    let bytes = std::fs::read(path)?;
    let tail_start = bytes.len().saturating_sub(4096);
    let text = String::from_utf8_lossy(&bytes[tail_start..]);
    let mut metadata = HashMap::new();

    for cap in PDF_FIELD.captures_iter(&text) {
        let key = &cap[1];
        let value = unescape_pdf_literal(&cap[2]);
        match key {
            "CreationDate" => {
                if let Some(iso) = parse_pdf_date(&value) {
                    metadata.insert("document_created_at".to_string(), Value::String(iso));
                }
            }
            "ModDate" => {
                if let Some(iso) = parse_pdf_date(&value) {
                    metadata.insert("document_modified_at".to_string(), Value::String(iso));
                }
            }
            "Author" => {
                metadata.insert("document_author".to_string(), Value::String(value.trim().to_string()));
            }
            "Title" => {
                metadata.insert("document_title".to_string(), Value::String(value.trim().to_string()));
            }
            "Subject" => {
                metadata.insert("document_subject".to_string(), Value::String(value.trim().to_string()));
            }
            "Keywords" => {
                metadata.insert("document_keywords".to_string(), Value::String(value.trim().to_string()));
            }
            "Producer" => {
                metadata.insert("document_producer".to_string(), Value::String(value.trim().to_string()));
            }
            "Creator" => {
                metadata.insert("document_creator".to_string(), Value::String(value.trim().to_string()));
            }
            _ => {}
        }
    }

    Ok(metadata)
}

fn extract_ooxml_metadata(path: &Path) -> anyhow::Result<Metadata> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut core_xml = String::new();
    {
        let mut entry = archive.by_name("docProps/core.xml")?;
        std::io::Read::read_to_string(&mut entry, &mut core_xml)?;
    }

    let mut reader = quick_xml::Reader::from_str(&core_xml);
    reader.config_mut().trim_text(true);

    let mut metadata = HashMap::new();
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                current_tag = Some(local_name(&e.name().into_inner()));
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    let value = t.unescape().unwrap_or_default().trim().to_string();
                    if !value.is_empty() {
                        insert_core_property(&mut metadata, tag, &value);
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => current_tag = None,
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("core.xml parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(metadata)
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

fn insert_core_property(metadata: &mut Metadata, tag: &str, value: &str) {
    match tag {
        "created" => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
                metadata.insert("document_created_at".to_string(), Value::String(dt.to_rfc3339()));
            }
        }
        "modified" => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
                metadata.insert("document_modified_at".to_string(), Value::String(dt.to_rfc3339()));
            }
        }
        "creator" => {
            metadata.insert("document_author".to_string(), Value::String(value.to_string()));
        }
        "title" => {
            metadata.insert("document_title".to_string(), Value::String(value.to_string()));
        }
        "subject" => {
            metadata.insert("document_subject".to_string(), Value::String(value.to_string()));
        }
        "keywords" => {
            metadata.insert("document_keywords".to_string(), Value::String(value.to_string()));
        }
        "lastModifiedBy" => {
            metadata.insert(
                "document_last_modified_by".to_string(),
                Value::String(value.to_string()),
            );
        }
        "revision" => {
            if let Ok(n) = value.parse::<i64>() {
                metadata.insert("document_revision".to_string(), Value::Number(n.into()));
            }
        }
        _ => {}
    }
}

fn extract_image_metadata(path: &Path) -> anyhow::Result<Metadata> {
    let file = std::fs::File::open(path)?;
    let mut bufreader = std::io::BufReader::new(file);
    let exif_reader = exif::Reader::new();
    let exif = match exif_reader.read_from_container(&mut bufreader) {
        Ok(exif) => exif,
        Err(_) => return Ok(HashMap::new()),
    };

    let mut metadata = HashMap::new();
    if let Some(field) = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
        let raw = field.display_value().to_string();
        if let Some(iso) = parse_exif_datetime(&raw) {
            metadata.insert("document_created_at".to_string(), Value::String(iso));
        }
    }
    if let Some(field) = exif.get_field(exif::Tag::Make, exif::In::PRIMARY) {
        metadata.insert(
            "document_camera_make".to_string(),
            Value::String(field.display_value().to_string().trim().to_string()),
        );
    }
    if let Some(field) = exif.get_field(exif::Tag::Model, exif::In::PRIMARY) {
        metadata.insert(
            "document_camera_model".to_string(),
            Value::String(field.display_value().to_string().trim().to_string()),
        );
    }
    Ok(metadata)
}

/// EXIF `DateTimeOriginal` is `YYYY:MM:DD HH:MM:SS`.
fn parse_exif_datetime(raw: &str) -> Option<String> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pdf_date_with_timezone() {
        let iso = parse_pdf_date("D:20240115103045-05'00'").unwrap();
        assert!(iso.starts_with("2024-01-15T10:30:45"));
        assert!(iso.ends_with("-05:00"));
    }

    #[test]
    fn parses_pdf_date_without_timezone() {
        let iso = parse_pdf_date("D:20240115103045").unwrap();
        assert!(iso.starts_with("2024-01-15T10:30:45"));
    }

    #[test]
    fn rejects_short_date() {
        assert!(parse_pdf_date("D:2024").is_none());
    }
}
