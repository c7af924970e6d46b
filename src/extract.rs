//! Text extraction boundary
//!
//! Turns a source file into page-annotated text. Pages are separated by
//! form feeds (or a configured marker line); the chunker relies on that.
//! Conversion of binary formats (PDF, DOCX) lives behind this trait in
//! external tooling; the crate ships an extractor for plain-text files.

use crate::backoff::Retryable;
use crate::job::SourceRef;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during text extraction
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The converter is temporarily unavailable (worth retrying)
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for ExtractionError {
    fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::Unavailable(_))
    }
}

/// Extracts page-annotated text from a source document
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, source: &SourceRef) -> Result<String, ExtractionError>;
}

/// Reads UTF-8 text files as they are
///
/// Accepts `.txt`, `.text`, `.md` and `.markdown`. Page breaks already in
/// the file (form feeds, marker lines) are kept untouched.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub const EXTENSIONS: [&'static str; 4] = ["txt", "text", "md", "markdown"];

    pub fn new() -> Self {
        Self
    }

    pub fn supports(&self, source: &SourceRef) -> bool {
        source
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| Self::EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, source: &SourceRef) -> Result<String, ExtractionError> {
        if !self.supports(source) {
            let ext = source
                .path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "no extension".to_string());
            return Err(ExtractionError::UnsupportedFormat(format!(
                "{} ({})",
                source.display_name, ext
            )));
        }

        let bytes = tokio::fs::read(&source.path).await?;
        String::from_utf8(bytes).map_err(|_| {
            ExtractionError::UnsupportedFormat(format!("{} is not UTF-8 text", source.display_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_text_file_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("book.txt");
        let content = "Page one\u{000C}Page two\r\n";
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();

        let text = PlainTextExtractor::new()
            .extract(&SourceRef::from_path(&path))
            .await
            .unwrap();
        assert_eq!(text, content);
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let err = PlainTextExtractor::new()
            .extract(&SourceRef::from_path("/tmp/book.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = PlainTextExtractor::new()
            .extract(&SourceRef::from_path(dir.path().join("missing.md")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[tokio::test]
    async fn rejects_binary_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = PlainTextExtractor::new()
            .extract(&SourceRef::from_path(&path))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(PlainTextExtractor::new().supports(&SourceRef::from_path("A.MD")));
        assert!(!PlainTextExtractor::new().supports(&SourceRef::from_path("README")));
    }
}
