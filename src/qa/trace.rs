// src/qa/trace.rs
// Persists reasoning traces and feeds approved Q/A pairs into the cache

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::QaCache;
use crate::error::Result;
use crate::store::{ChainStep, DocStore, DocumentRef, StepKind, ThoughtChain};

/// Condensed listing entry for a session's traces.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub uuid: String,
    pub question: String,
    pub answer_preview: String,
    pub total_steps: i64,
    pub documents_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Inputs for one trace save.
pub struct SaveChain<'a> {
    pub session_id: &'a str,
    pub question: &'a str,
    pub answer: &'a str,
    pub thoughts: &'a [String],
    pub actions: &'a [String],
    pub observations: &'a [String],
    pub documents_used: Vec<DocumentRef>,
    pub user_id: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub model_name: Option<&'a str>,
    pub should_cache: bool,
}

/// Persists the Q/A pair plus the full reasoning trace. When the judge
/// approved caching, the question also enters the QA vector collection and
/// the chain is flagged as cached.
pub struct TraceStore {
    docstore: Arc<DocStore>,
    cache: Arc<QaCache>,
}

impl TraceStore {
    pub fn new(docstore: Arc<DocStore>, cache: Arc<QaCache>) -> Self {
        Self { docstore, cache }
    }

    /// Interleave thought/action/observation lists into ordered steps.
    pub fn build_steps(
        thoughts: &[String],
        actions: &[String],
        observations: &[String],
    ) -> Vec<ChainStep> {
        let mut steps = Vec::new();
        let mut index = 1u32;
        let rounds = thoughts.len().max(actions.len()).max(observations.len());

        for i in 0..rounds {
            if let Some(content) = thoughts.get(i).filter(|c| !c.is_empty()) {
                steps.push(ChainStep {
                    step: index,
                    kind: StepKind::Thought,
                    content: content.clone(),
                });
                index += 1;
            }
            if let Some(content) = actions.get(i).filter(|c| !c.is_empty()) {
                steps.push(ChainStep {
                    step: index,
                    kind: StepKind::Action,
                    content: content.clone(),
                });
                index += 1;
            }
            if let Some(content) = observations.get(i).filter(|c| !c.is_empty()) {
                steps.push(ChainStep {
                    step: index,
                    kind: StepKind::Observation,
                    content: content.clone(),
                });
                index += 1;
            }
        }
        steps
    }

    /// Persist a trace. Returns the chain uuid. The chain row is always
    /// written; the cache entry only when approved and enabled.
    pub async fn save_chain(&self, save: SaveChain<'_>) -> Result<String> {
        let steps = Self::build_steps(save.thoughts, save.actions, save.observations);
        let chain = ThoughtChain {
            uuid: Uuid::new_v4().to_string(),
            session_id: save.session_id.to_string(),
            message_id: save.message_id.map(|s| s.to_string()),
            question: save.question.to_string(),
            answer: save.answer.to_string(),
            total_steps: steps.len() as i64,
            steps,
            documents_used: save.documents_used,
            user_id: save.user_id.map(|s| s.to_string()),
            model_name: save.model_name.map(|s| s.to_string()),
            like_count: 0,
            dislike_count: 0,
            is_cached: false,
            qa_vector_id: None,
            user_feedbacks: Default::default(),
            created_at: Utc::now(),
        };
        self.docstore.insert_thought_chain(&chain).await?;

        if save.should_cache && self.cache.is_enabled() {
            match self
                .cache
                .insert(
                    &chain.uuid,
                    save.question,
                    save.answer,
                    save.session_id,
                    save.user_id,
                )
                .await
            {
                Ok(vector_id) => {
                    self.docstore
                        .set_chain_cache_state(&chain.uuid, Some(&vector_id))
                        .await?;
                    debug!(chain = %chain.uuid, "question cached for similarity lookup");
                }
                Err(e) => {
                    // The trace survives; only the cache entry is lost.
                    error!(chain = %chain.uuid, error = %e, "qa cache insert failed");
                }
            }
        } else if !save.should_cache {
            debug!(chain = %chain.uuid, "judge declined caching");
        }

        // Back-reference the chain from the AI message it explains.
        if let Some(message_id) = save.message_id {
            let patch = json!({
                "thought_chain_id": chain.uuid,
                "like_count": 0,
                "dislike_count": 0,
            });
            if let Err(e) = self.docstore.update_message_extra(message_id, &patch).await {
                error!(message = message_id, error = %e, "message back-reference failed");
            }
        }

        info!(chain = %chain.uuid, steps = chain.total_steps, "reasoning trace saved");
        Ok(chain.uuid)
    }

    pub async fn get_chain(&self, chain_id: &str) -> Result<Option<ThoughtChain>> {
        self.docstore.get_thought_chain(chain_id).await
    }

    pub async fn get_chains_by_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ChainSummary>> {
        let chains = self.docstore.chains_by_session(session_id, limit).await?;
        Ok(chains
            .into_iter()
            .map(|chain| {
                let answer_preview = if chain.answer.chars().count() > 100 {
                    let truncated: String = chain.answer.chars().take(100).collect();
                    format!("{truncated}...")
                } else {
                    chain.answer.clone()
                };
                ChainSummary {
                    uuid: chain.uuid,
                    question: chain.question,
                    answer_preview,
                    total_steps: chain.total_steps,
                    documents_count: chain.documents_used.len(),
                    created_at: chain.created_at,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_interleave_in_round_order() {
        let thoughts = vec!["t1".to_string(), "t2".to_string()];
        let actions = vec!["a1".to_string()];
        let observations = vec!["o1".to_string()];

        let steps = TraceStore::build_steps(&thoughts, &actions, &observations);
        let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Thought,
                StepKind::Action,
                StepKind::Observation,
                StepKind::Thought
            ]
        );
        // Step indices are consecutive from 1.
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.step, i as u32 + 1);
        }
    }

    #[test]
    fn empty_entries_are_skipped() {
        let thoughts = vec!["".to_string(), "t2".to_string()];
        let actions: Vec<String> = vec![];
        let observations = vec!["o1".to_string()];

        let steps = TraceStore::build_steps(&thoughts, &actions, &observations);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Observation);
        assert_eq!(steps[1].kind, StepKind::Thought);
    }
}
