// src/chat/mod.rs
// Per-turn orchestration of the QA core

pub mod orchestrator;
pub mod reply;

pub use orchestrator::{MsgOrchestrator, SendMessageInputs};
pub use reply::{ReplyOutcome, ReplyPipeline, ReplyRequest};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::stream::SseEvent;

/// Result of analyzing an uploaded image.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub combined_content: String,
    pub image_info: Value,
    pub ocr_text: String,
    pub vision_description: String,
}

/// External collaborator contract: OCR + captioning for uploaded images.
/// Implementations push `thought` progress events while working and return
/// the combined description; the orchestrator forwards the events and
/// emits the final `image_analysis_complete`.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze_stream(
        &self,
        bytes: &[u8],
        filename: &str,
        events: mpsc::UnboundedSender<SseEvent>,
    ) -> Result<ImageAnalysis>;
}

/// Image formats routed to the analyzer instead of the text extractors.
pub fn is_image_file(filename: &str) -> bool {
    matches!(
        crate::ingest::extension(filename).as_deref(),
        Some("jpg") | Some("jpeg") | Some("png") | Some("webp") | Some("gif") | Some("bmp")
            | Some("tiff")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions_are_recognized() {
        assert!(is_image_file("photo.PNG"));
        assert!(is_image_file("scan.jpeg"));
        assert!(!is_image_file("report.pdf"));
        assert!(!is_image_file("notes.txt"));
    }
}
