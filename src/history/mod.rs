// src/history/mod.rs
// Bounded conversation history with threshold-triggered summarization

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmProvider};
use crate::store::{DocStore, SendType, StoredMessage, new_message};

const SUMMARY_PROMPT: &str = "You condense chat history. Write a compact third-person summary \
of the conversation so far: the user's goals, the facts that were established, and any open \
follow-ups. Keep it under 200 words. Output only the summary.";

/// Loads bounded conversation context and compacts old turns into a single
/// summary row once the threshold is crossed. SUMMARY rows never map
/// through the user/assistant roles; the latest one becomes a system-role
/// prefix and supersedes everything before it.
pub struct HistoryMgr {
    docstore: Arc<DocStore>,
    llm: Arc<dyn LlmProvider>,
    config: HistoryConfig,
    summarizer_deadline: Duration,
}

impl HistoryMgr {
    pub fn new(
        docstore: Arc<DocStore>,
        llm: Arc<dyn LlmProvider>,
        config: HistoryConfig,
        summarizer_deadline_secs: u64,
    ) -> Self {
        Self {
            docstore,
            llm,
            config,
            summarizer_deadline: Duration::from_secs(summarizer_deadline_secs),
        }
    }

    /// Chat-shaped history for prompt assembly. With a summary present the
    /// result is `[system summary, turns after it...]`, otherwise all turns.
    pub async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let mut history = Vec::new();

        match self.docstore.latest_summary(session_id).await? {
            Some(summary) => {
                history.push(ChatMessage::system(format!(
                    "[history summary]\n{}",
                    summary.content
                )));
                for msg in self
                    .docstore
                    .messages_after(session_id, summary.created_at)
                    .await?
                {
                    if let Some(mapped) = map_role(&msg) {
                        history.push(mapped);
                    }
                }
            }
            None => {
                for msg in self.docstore.non_summary_messages(session_id).await? {
                    if let Some(mapped) = map_role(&msg) {
                        history.push(mapped);
                    }
                }
            }
        }

        debug!(session = session_id, turns = history.len(), "history loaded");
        Ok(history)
    }

    /// Compact the session when enough turns accumulated since the last
    /// summary. Returns whether a new summary was written.
    pub async fn maybe_summarize(&self, session_id: &str) -> Result<bool> {
        let last_summary = self.docstore.latest_summary(session_id).await?;
        let (messages, base) = match &last_summary {
            Some(summary) => (
                self.docstore
                    .messages_after(session_id, summary.created_at)
                    .await?,
                format!("[history summary]\n{}\n\n[new dialog]\n", summary.content),
            ),
            None => (
                self.docstore.non_summary_messages(session_id).await?,
                "[dialog]\n".to_string(),
            ),
        };

        if messages.len() < self.config.summary_threshold {
            return Ok(false);
        }
        debug!(
            session = session_id,
            count = messages.len(),
            threshold = self.config.summary_threshold,
            "summarization triggered"
        );

        let dialog = self.assemble_dialog(&base, &messages);
        let call = self.llm.chat(vec![
            ChatMessage::system(SUMMARY_PROMPT),
            ChatMessage::user(format!("Summarize the following dialog:\n\n{dialog}")),
        ]);
        let summary = match tokio::time::timeout(self.summarizer_deadline, call).await {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(e)) => {
                warn!(session = session_id, error = %e, "summarizer call failed");
                return Ok(false);
            }
            Err(_) => {
                warn!(session = session_id, "summarizer timed out");
                return Ok(false);
            }
        };
        if summary.is_empty() {
            return Ok(false);
        }

        let row = new_message(session_id, &summary, SendType::Summary, "system", "system");
        self.docstore.insert_message(&row).await?;
        info!(session = session_id, "history compacted into summary");
        Ok(true)
    }

    /// Keep the dialog under the summarizer's token ceiling by dropping the
    /// oldest turns first. Tokens are estimated as 0.8 x chars.
    fn assemble_dialog(&self, base: &str, messages: &[StoredMessage]) -> String {
        let budget_chars = (self.config.max_summary_tokens as f64 / 0.8) as usize;

        let mut lines: Vec<String> = messages
            .iter()
            .map(|msg| {
                let speaker = match msg.send_type {
                    SendType::User => "User",
                    _ => "Assistant",
                };
                format!("{speaker}: {}\n", msg.content)
            })
            .collect();

        let mut total: usize = base.chars().count()
            + lines.iter().map(|l| l.chars().count()).sum::<usize>();
        let mut skip = 0usize;
        while total > budget_chars && skip < lines.len().saturating_sub(1) {
            total -= lines[skip].chars().count();
            skip += 1;
        }
        let mut dialog = base.to_string();
        for line in lines.drain(skip..) {
            dialog.push_str(&line);
        }
        dialog
    }

    /// Name the session from its first complete turn. Fire-and-forget; the
    /// caller spawns this in the background.
    pub async fn auto_name_session(
        &self,
        session_id: &str,
        first_user_q: &str,
        first_ai_a: &str,
    ) -> Result<()> {
        let answer_preview: String = first_ai_a.chars().take(200).collect();
        let prompt = format!(
            "Create a short title (8-15 characters) for this conversation.\n\
             Return only the title itself, nothing else.\n\n\
             User question: {first_user_q}\n\
             Assistant answer: {answer_preview}...\n\n\
             Title:"
        );

        let response = match tokio::time::timeout(
            self.summarizer_deadline,
            self.llm.chat(vec![ChatMessage::user(prompt)]),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(session = session_id, error = %e, "session naming failed");
                return Ok(());
            }
            Err(_) => {
                warn!(session = session_id, "session naming timed out");
                return Ok(());
            }
        };

        let mut title = response.trim().trim_matches(['"', '\'']).to_string();
        if title.chars().count() > 20 {
            title = title.chars().take(20).collect();
        }
        if title.is_empty() {
            return Ok(());
        }

        self.docstore.update_session_name(session_id, &title).await?;
        info!(session = session_id, title = %title, "session auto-named");
        Ok(())
    }
}

fn map_role(msg: &StoredMessage) -> Option<ChatMessage> {
    match msg.send_type {
        SendType::User => Some(ChatMessage::user(msg.content.clone())),
        SendType::Ai => Some(ChatMessage::assistant(msg.content.clone())),
        // SUMMARY rows are handled by the caller as a system prefix.
        SendType::Summary => None,
    }
}
