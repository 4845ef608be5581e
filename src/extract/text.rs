//! TextExtractor (C3, §4.2): bytes → plaintext, tagged with the extraction
//! method used for provenance. Unknown MIME types return empty text rather
//! than failing the pipeline.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    TextFile,
    Pdf,
    Docx,
    Xlsx,
    Ocr,
    Unknown,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::TextFile => "text_file",
            ExtractionMethod::Pdf => "pdf",
            ExtractionMethod::Docx => "docx",
            ExtractionMethod::Xlsx => "xlsx",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Unknown => "unknown",
        }
    }
}

pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
}

pub async fn extract_text(path: &Path, mime_type: &str) -> ExtractedText {
    let path = path.to_path_buf();
    let mime_type = mime_type.to_string();
    tokio::task::spawn_blocking(move || extract_text_blocking(&path, &mime_type))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "text extraction task panicked");
            ExtractedText {
                text: String::new(),
                method: ExtractionMethod::Unknown,
            }
        })
}

fn extract_text_blocking(path: &Path, mime_type: &str) -> ExtractedText {
    match mime_type {
        "text/plain" | "text/markdown" | "text/csv" => {
            let text = std::fs::read_to_string(path).unwrap_or_default();
            ExtractedText {
                text,
                method: ExtractionMethod::TextFile,
            }
        }
        "application/pdf" => match pdf_extract::extract_text(path) {
            Ok(text) => ExtractedText {
                text,
                method: ExtractionMethod::Pdf,
            },
            Err(e) => {
                warn!(file = %path.display(), error = %e, "pdf text extraction failed");
                ExtractedText {
                    text: String::new(),
                    method: ExtractionMethod::Pdf,
                }
            }
        },
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            match extract_docx_text(path) {
                Ok(text) => ExtractedText {
                    text,
                    method: ExtractionMethod::Docx,
                },
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "docx text extraction failed");
                    ExtractedText {
                        text: String::new(),
                        method: ExtractionMethod::Docx,
                    }
                }
            }
        }
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            match extract_xlsx_text(path) {
                Ok(text) => ExtractedText {
                    text,
                    method: ExtractionMethod::Xlsx,
                },
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "xlsx text extraction failed");
                    ExtractedText {
                        text: String::new(),
                        method: ExtractionMethod::Xlsx,
                    }
                }
            }
        }
        m if m.starts_with("image/") => {
            // No OCR engine is bundled; the contract is honoured with a
            // tagged empty result rather than skipped entirely.
            ExtractedText {
                text: String::new(),
                method: ExtractionMethod::Ocr,
            }
        }
        _ => ExtractedText {
            text: String::new(),
            method: ExtractionMethod::Unknown,
        },
    }
}

fn extract_docx_text(path: &Path) -> anyhow::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    {
        let mut entry = archive.by_name("word/document.xml")?;
        entry.read_to_string(&mut xml)?;
    }

    let mut reader = quick_xml::Reader::from_str(&xml);
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                out.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "t" {
                    in_text_run = false;
                } else if name == "p" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("document.xml parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

fn read_shared_strings(archive: &mut zip::ZipArchive<std::fs::File>) -> Vec<String> {
    let mut xml = String::new();
    let entry = archive.by_name("xl/sharedStrings.xml");
    let mut entry = match entry {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    if entry.read_to_string(&mut xml).is_err() {
        return Vec::new();
    }
    drop(entry);

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "si" {
                    current.clear();
                } else if name == "t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "t" {
                    in_text = false;
                } else if name == "si" {
                    strings.push(current.clone());
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    strings
}

fn extract_xlsx_text(path: &Path) -> anyhow::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let shared_strings = read_shared_strings(&mut archive);

    let sheet_names: Vec<String> = (0..archive.len())
        .filter_map(|i| {
            let name = archive.by_index(i).ok()?.name().to_string();
            if name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml") {
                Some(name)
            } else {
                None
            }
        })
        .collect();

    let mut out = String::new();
    for sheet_name in sheet_names {
        let mut xml = String::new();
        {
            let mut entry = archive.by_name(&sheet_name)?;
            entry.read_to_string(&mut xml)?;
        }
        out.push_str(&extract_sheet_text(&xml, &shared_strings));
        out.push('\n');
    }
    Ok(out)
}

fn extract_sheet_text(xml: &str, shared_strings: &[String]) -> String {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut out = String::new();
    let mut buf = Vec::new();
    let mut cell_is_shared = false;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "c" {
                    cell_is_shared = e
                        .attributes()
                        .flatten()
                        .any(|a| a.key.as_ref() == b"t" && &*a.value == b"s");
                } else if name == "v" || name == "t" {
                    in_value = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default();
                if cell_is_shared {
                    if let Ok(idx) = raw.parse::<usize>() {
                        if let Some(s) = shared_strings.get(idx) {
                            out.push_str(s);
                            out.push(' ');
                        }
                    }
                } else {
                    out.push_str(&raw);
                    out.push(' ');
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = local_name(&e.name().into_inner());
                if name == "v" || name == "t" {
                    in_value = false;
                } else if name == "row" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_method_strings_match_spec() {
        assert_eq!(ExtractionMethod::TextFile.as_str(), "text_file");
        assert_eq!(ExtractionMethod::Ocr.as_str(), "ocr");
        assert_eq!(ExtractionMethod::Unknown.as_str(), "unknown");
    }

    #[test]
    fn shared_string_sheet_extracts_text() {
        let shared = vec!["Hello".to_string(), "World".to_string()];
        let xml = r#"<sheetData><row><c t="s"><v>0</v></c><c t="s"><v>1</v></c></row></sheetData>"#;
        let text = extract_sheet_text(xml, &shared);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
    }
}
