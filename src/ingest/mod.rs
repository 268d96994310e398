// src/ingest/mod.rs
// Document ingestion: extraction seam, chunking, and the bus-fed worker

pub mod pipeline;
pub mod splitter;

pub use pipeline::DocPipeline;
pub use splitter::TextSplitter;

use std::path::Path;

use crate::error::{Result, TrellisError};

/// Extraction seam for uploaded files. Real format extractors (PDF, Office,
/// OCR) live outside the core; the pipeline only depends on this contract.
pub trait Extractor: Send + Sync {
    fn supports(&self, filename: &str) -> bool;

    /// Extract plain text from raw file bytes.
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String>;
}

/// Extractor for formats that already are plain text.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn supports(&self, filename: &str) -> bool {
        matches!(
            extension(filename).as_deref(),
            Some("txt") | Some("md") | Some("text") | Some("log")
        )
    }

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TrellisError::Input(format!("{filename} is not valid UTF-8")))
    }
}

pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extractor_dispatches_on_extension() {
        let extractor = PlainTextExtractor;
        assert!(extractor.supports("notes.txt"));
        assert!(extractor.supports("README.MD"));
        assert!(!extractor.supports("slides.pptx"));
        assert!(!extractor.supports("no_extension"));
    }

    #[test]
    fn plain_text_extractor_rejects_invalid_utf8() {
        let extractor = PlainTextExtractor;
        assert!(extractor.extract(&[0xff, 0xfe, 0x01], "bad.txt").is_err());
        assert_eq!(
            extractor.extract(b"hello", "ok.txt").unwrap(),
            "hello".to_string()
        );
    }
}
