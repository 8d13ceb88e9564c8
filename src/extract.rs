//! Text extraction from files.
//!
//! The [`TextExtractor`] trait is the seam for plugging in a conversion
//! service. [`DocumentExtractor`] handles plain-text types directly and
//! decodes PDF and OOXML (DOCX, PPTX, XLSX) on the blocking pool.
//! Extraction never panics the pass: decoder panics and malformed archives
//! become [`ExtractError::CorruptFile`].

use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::classify::{MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};
use crate::error::FailureKind;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            ExtractError::CorruptFile(_) => FailureKind::CorruptFile,
            ExtractError::Io(_) => FailureKind::Io,
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, media_type: &str) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    max_file_bytes: u64,
}

impl DocumentExtractor {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    async fn read_bounded(&self, path: &Path) -> Result<Vec<u8>, ExtractError> {
        let len = tokio::fs::metadata(path).await?.len();
        if len > self.max_file_bytes {
            return Err(ExtractError::UnsupportedFormat(format!(
                "file is {} bytes, limit is {}",
                len, self.max_file_bytes
            )));
        }
        Ok(tokio::fs::read(path).await?)
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, path: &Path, media_type: &str) -> Result<String, ExtractError> {
        if is_plain_text(media_type) {
            let bytes = self.read_bounded(path).await?;
            return String::from_utf8(bytes)
                .map_err(|e| ExtractError::CorruptFile(format!("invalid UTF-8: {}", e)));
        }

        if !matches!(media_type, MIME_PDF | MIME_DOCX | MIME_PPTX | MIME_XLSX) {
            return Err(ExtractError::UnsupportedFormat(media_type.to_string()));
        }

        let bytes = self.read_bounded(path).await?;
        let media_type = media_type.to_string();
        tokio::task::spawn_blocking(move || extract_binary(&bytes, &media_type))
            .await
            .map_err(|e| ExtractError::CorruptFile(format!("decoder aborted: {}", e)))?
    }
}

fn is_plain_text(media_type: &str) -> bool {
    media_type.starts_with("text/") || media_type == "application/json"
}

/// Decode a binary document held in memory.
pub fn extract_binary(bytes: &[u8], media_type: &str) -> Result<String, ExtractError> {
    match media_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::CorruptFile(format!("PDF: {}", e))),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn corrupt(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::CorruptFile(e.to_string())
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(corrupt)
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(corrupt)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(corrupt)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::CorruptFile(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entry names `{prefix}N.xml`, ordered by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut out = String::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !out.is_empty() && !text.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(text.trim_end());
    }
    Ok(out)
}

/// Concatenate `<*:t>` text runs, ending a line at each closing `paragraph` element.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().map_err(corrupt)?.as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let cells = extract_sheet_cells(&xml, &shared_strings)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    // Workbooks with only numeric cells have no shared string table.
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().map_err(corrupt)?.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v => {
                let v = te.unescape().map_err(corrupt)?;
                let v = v.trim();
                if shared {
                    if let Some(s) = v.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !v.is_empty() {
                    cells.push(v.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"{W_NS}\"><w:body>\
             <w:p><w:r><w:t>First &amp; foremost</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second</w:t></w:r><w:r><w:t> line</w:t></w:r></w:p>\
             </w:body></w:document>"
        );
        let bytes = zip_with(&[("word/document.xml", &xml)]);
        let text = extract_binary(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First & foremost\nSecond line\n");
    }

    #[test]
    fn xlsx_reads_shared_and_inline_values() {
        let shared = "<sst><si><t>alpha</t></si><si><t>beta</t></si></sst>";
        let sheet = "<worksheet><sheetData><row>\
                     <c t=\"s\"><v>1</v></c><c><v>42</v></c><c t=\"s\"><v>0</v></c>\
                     </row></sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        assert_eq!(extract_binary(&bytes, MIME_XLSX).unwrap(), "beta 42 alpha");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |t: &str| format!("<p:sld><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:sld>");
        let s1 = slide("one");
        let s2 = slide("two");
        let s10 = slide("ten");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        assert_eq!(extract_binary(&bytes, MIME_PPTX).unwrap(), "one\n\ntwo\n\nten");
    }

    #[test]
    fn malformed_inputs_are_corrupt() {
        assert!(matches!(
            extract_binary(b"not a pdf", MIME_PDF),
            Err(ExtractError::CorruptFile(_))
        ));
        assert!(matches!(
            extract_binary(b"not a zip", MIME_DOCX),
            Err(ExtractError::CorruptFile(_))
        ));
        let no_body = zip_with(&[("other.xml", "<x/>")]);
        assert!(matches!(
            extract_binary(&no_body, MIME_DOCX),
            Err(ExtractError::CorruptFile(_))
        ));
    }

    #[tokio::test]
    async fn plain_text_and_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ok = tmp.path().join("a.txt");
        std::fs::write(&ok, "héllo").unwrap();
        let bad = tmp.path().join("b.txt");
        std::fs::write(&bad, [0x66, 0xff, 0xfe]).unwrap();

        let ex = DocumentExtractor::new(1024);
        assert_eq!(ex.extract(&ok, "text/plain").await.unwrap(), "héllo");

        let err = ex.extract(&bad, "text/plain").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::CorruptFile);

        let err = ex.extract(&ok, "image/png").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnsupportedFormat);

        let err = ex
            .extract(&tmp.path().join("missing.txt"), "text/plain")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Io);

        let small = DocumentExtractor::new(2);
        let err = small.extract(&ok, "text/plain").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnsupportedFormat);
    }
}
