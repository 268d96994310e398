// src/qa/judge.rs
// Asynchronous cacheability judgement for answered questions

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, LlmProvider};

const EVALUATION_PROMPT: &str = r#"You judge whether a user question is worth caching in a knowledge base.

Criteria:
1. Knowledge questions (policies, regulations, procedures, domain facts) -> worth caching
2. Concrete service questions (scholarship rules, course schedules, application steps) -> worth caching
3. Bare greetings ("hi", "thanks", "bye") -> not worth caching
4. Small talk ("how is the weather", "who are you") -> not worth caching
5. Highly personal questions ("what are my grades") -> not worth caching
6. Questions shorter than 5 characters or too vague -> not worth caching
7. Real-time questions whose answer changes over time -> not worth caching, including:
   - weather ("will it rain tomorrow")
   - time and date ("what time is it")
   - breaking news ("what happened today")
   - prices, stocks, exchange rates ("gold price")
   - traffic and routing ("is the road congested")
   - nearby places ("closest hospital")

Reply with exactly "YES" or "NO" and nothing else.

User question: "#;

/// Bare greetings rejected without an LLM call.
const GREETINGS: [&str; 10] = [
    "hi", "hello", "hey", "thanks", "thank you", "bye", "goodbye", "good morning",
    "good evening", "ok",
];

/// Real-time intent markers; any occurrence rejects caching outright.
const REALTIME_KEYWORDS: [&str; 22] = [
    "weather",
    "temperature",
    "rain",
    "snow",
    "forecast",
    "what time",
    "current time",
    "what day is",
    "stock",
    "share price",
    "exchange rate",
    "price of",
    "traffic",
    "congest",
    "route to",
    "directions",
    "navigate",
    "nearby",
    "nearest",
    "closest",
    "latest news",
    "breaking news",
];

/// Decides asynchronously whether a Q/A pair should enter the similar-QA
/// cache. A cheap rule layer rejects obvious non-candidates before the LLM
/// is consulted; on any model error or timeout the default is do-not-cache.
pub struct QaJudge {
    llm: Arc<dyn LlmProvider>,
    enabled: bool,
    deadline: Duration,
    pending: Mutex<HashMap<String, JoinHandle<bool>>>,
}

impl QaJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, enabled: bool, deadline_secs: u64) -> Self {
        Self {
            llm,
            enabled,
            deadline: Duration::from_secs(deadline_secs),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Rule layer. Returns true when the question deserves an LLM
    /// judgement.
    pub fn quick_filter(question: &str) -> bool {
        let normalized = question.trim().to_lowercase();
        if normalized.chars().count() < 5 {
            return false;
        }
        if GREETINGS.contains(&normalized.as_str()) {
            return false;
        }
        for greeting in GREETINGS {
            if normalized.starts_with(greeting) && normalized.chars().count() < 10 {
                return false;
            }
        }
        for keyword in REALTIME_KEYWORDS {
            if normalized.contains(keyword) {
                debug!(question = %question, keyword, "real-time question, cache rejected");
                return false;
            }
        }
        true
    }

    /// Full judgement: rules first, then a bounded YES/NO model call.
    pub async fn evaluate(&self, question: &str) -> bool {
        if !self.enabled || !Self::quick_filter(question) {
            return false;
        }

        let prompt = format!("{EVALUATION_PROMPT}{question}");
        let call = self.llm.chat(vec![ChatMessage::user(prompt)]);
        match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(response)) => {
                let verdict = response.trim().to_uppercase();
                let should_cache = verdict == "YES";
                debug!(question = %question, verdict = %verdict, "qa judge verdict");
                should_cache
            }
            Ok(Err(e)) => {
                warn!(error = %e, "qa judge call failed, defaulting to no-cache");
                false
            }
            Err(_) => {
                warn!("qa judge call timed out, defaulting to no-cache");
                false
            }
        }
    }

    /// Kick off an evaluation in the background, keyed so the orchestrator
    /// can collect it after the agent finishes.
    pub fn start_evaluation(self: &Arc<Self>, question: &str, evaluation_id: &str) {
        let judge = Arc::clone(self);
        let question = question.to_string();
        let handle = tokio::spawn(async move { judge.evaluate(&question).await });
        self.pending.lock().insert(evaluation_id.to_string(), handle);
    }

    /// Collect a pending evaluation. Timeouts and unknown ids read as
    /// do-not-cache.
    pub async fn await_result(&self, evaluation_id: &str, wait: Duration) -> bool {
        let handle = self.pending.lock().remove(evaluation_id);
        let Some(handle) = handle else {
            return false;
        };
        match tokio::time::timeout(wait, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(evaluation_id, error = %e, "qa judge task failed");
                false
            }
            Err(_) => {
                warn!(evaluation_id, "qa judge result not ready in time");
                false
            }
        }
    }

    pub fn cancel(&self, evaluation_id: &str) {
        if let Some(handle) = self.pending.lock().remove(evaluation_id) {
            handle.abort();
        }
    }
}
