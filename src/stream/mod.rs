// src/stream/mod.rs
// Typed client event stream and the LLM token stream parser

pub mod parser;

pub use parser::{ParsedEvent, StreamParser};

use serde_json::{Value, json};

use crate::store::DocumentRef;

/// One server-sent event pushed to the client during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    SessionCreated {
        session_id: String,
        session_name: String,
    },
    UserMessageSaved {
        uuid: String,
        content: String,
    },
    Thought {
        content: String,
    },
    Action {
        content: String,
    },
    Observation {
        content: String,
    },
    AnswerChunk {
        content: String,
    },
    Documents {
        documents: Vec<DocumentRef>,
    },
    ImageAnalysisComplete {
        combined_content: String,
        image_info: Value,
        ocr_text: String,
        vision_description: String,
    },
    AiMessageSaved {
        uuid: String,
        content: String,
        thought_chain_id: Option<String>,
    },
    Done {
        session_id: String,
    },
    Error {
        message: String,
    },
}

impl SseEvent {
    /// Wire event name (the SSE `event:` line).
    pub fn name(&self) -> &'static str {
        match self {
            SseEvent::SessionCreated { .. } => "session_created",
            SseEvent::UserMessageSaved { .. } => "user_message_saved",
            SseEvent::Thought { .. } => "thought",
            SseEvent::Action { .. } => "action",
            SseEvent::Observation { .. } => "observation",
            SseEvent::AnswerChunk { .. } => "answer_chunk",
            SseEvent::Documents { .. } => "documents",
            SseEvent::ImageAnalysisComplete { .. } => "image_analysis_complete",
            SseEvent::AiMessageSaved { .. } => "ai_message_saved",
            SseEvent::Done { .. } => "done",
            SseEvent::Error { .. } => "error",
        }
    }

    /// JSON payload (the SSE `data:` line).
    pub fn data(&self) -> Value {
        match self {
            SseEvent::SessionCreated {
                session_id,
                session_name,
            } => json!({"session_id": session_id, "session_name": session_name}),
            SseEvent::UserMessageSaved { uuid, content } => {
                json!({"uuid": uuid, "content": content})
            }
            SseEvent::Thought { content }
            | SseEvent::Action { content }
            | SseEvent::Observation { content }
            | SseEvent::AnswerChunk { content } => json!({"content": content}),
            SseEvent::Documents { documents } => json!({"documents": documents}),
            SseEvent::ImageAnalysisComplete {
                combined_content,
                image_info,
                ocr_text,
                vision_description,
            } => json!({
                "combined_content": combined_content,
                "image_info": image_info,
                "ocr_text": ocr_text,
                "vision_description": vision_description,
            }),
            SseEvent::AiMessageSaved {
                uuid,
                content,
                thought_chain_id,
            } => json!({
                "uuid": uuid,
                "content": content,
                "thought_chain_id": thought_chain_id,
            }),
            SseEvent::Done { session_id } => json!({"session_id": session_id}),
            SseEvent::Error { message } => json!({"message": message}),
        }
    }

    /// Render as an SSE frame: `event:` line, `data:` JSON line, blank line.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}
