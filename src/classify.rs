//! Media-type classification.
//!
//! The [`TypeClassifier`] trait is the seam for plugging in a different
//! classifier. The default [`SniffingClassifier`] checks magic bytes with
//! `infer`, then the file extension, then whether the head decodes as UTF-8
//! text.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bytes read from the start of a file for classification.
pub const HEAD_BYTES: usize = 8 * 1024;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Known(String),
    Unknown,
}

#[async_trait]
pub trait TypeClassifier: Send + Sync {
    /// Label the file from its leading bytes and path.
    async fn classify(&self, head: &[u8], path: &Path) -> Classification;
}

/// Read up to [`HEAD_BYTES`] from the start of `path`.
pub async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(HEAD_BYTES);
    file.take(HEAD_BYTES as u64).read_to_end(&mut head).await?;
    Ok(head)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SniffingClassifier;

#[async_trait]
impl TypeClassifier for SniffingClassifier {
    async fn classify(&self, head: &[u8], path: &Path) -> Classification {
        sniff(head, path)
    }
}

pub fn sniff(head: &[u8], path: &Path) -> Classification {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| mime_for_extension(&e));

    if let Some(kind) = infer::get(head) {
        let mime = kind.mime_type();
        // OOXML containers are plain zips in their first few KiB.
        if mime == "application/zip" {
            if let Some(ext_mime) = by_ext.filter(|m| is_ooxml(m)) {
                return Classification::Known(ext_mime.to_string());
            }
        }
        return Classification::Known(mime.to_string());
    }

    if let Some(mime) = by_ext {
        return Classification::Known(mime.to_string());
    }

    if looks_like_text(head) {
        return Classification::Known("text/plain".to_string());
    }

    Classification::Unknown
}

fn is_ooxml(mime: &str) -> bool {
    matches!(mime, MIME_DOCX | MIME_PPTX | MIME_XLSX)
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "text/xml",
        "txt" | "text" | "log" | "rst" | "adoc" | "org" | "tex" | "toml" | "yaml" | "yml"
        | "ini" | "cfg" | "conf" | "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "h"
        | "cpp" | "hpp" | "rb" | "sh" | "sql" | "lua" | "css" => "text/plain",
        _ => return None,
    })
}

/// UTF-8 with no NUL bytes. A multi-byte sequence cut off by the head
/// boundary still counts as text.
fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return true;
    }
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(s: &str) -> Classification {
        Classification::Known(s.to_string())
    }

    #[test]
    fn magic_bytes_win() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(sniff(&png, Path::new("/x/notes.txt")), known("image/png"));
        assert_eq!(sniff(b"%PDF-1.4\n...", Path::new("/x/doc")), known(MIME_PDF));
    }

    #[test]
    fn extension_table_fallback() {
        assert_eq!(sniff(b"# Title", Path::new("/x/a.MD")), known("text/markdown"));
        // Garbage in a .pdf is still labelled a PDF; extraction reports it corrupt.
        assert_eq!(sniff(b"not a pdf", Path::new("/x/a.pdf")), known(MIME_PDF));
    }

    #[test]
    fn utf8_sniff_and_unknown() {
        assert_eq!(sniff("héllo".as_bytes(), Path::new("/x/README")), known("text/plain"));
        let cut = &"é".as_bytes()[..1];
        assert_eq!(sniff(cut, Path::new("/x/README")), known("text/plain"));
        assert_eq!(sniff(&[0xff, 0x00, 0x13], Path::new("/x/blob.bin")), Classification::Unknown);
    }

    #[tokio::test]
    async fn reads_bounded_head() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        std::fs::write(&path, "a".repeat(HEAD_BYTES * 2)).unwrap();
        assert_eq!(read_head(&path).await.unwrap().len(), HEAD_BYTES);
    }
}
