// src/stream/parser.rs
// Finite state machine over concatenated LLM tokens

use tracing::debug;

/// Parser states. ANSWER is terminal: once entered, every further token is
/// answer content no matter which labels appear in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Idle,
    Thought,
    Action,
    Observation,
    Answer,
}

/// Event produced while consuming the token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Thought(String),
    Action(String),
    Observation(String),
    AnswerChunk(String),
}

/// Incremental parser for the agent's Thought/Action/Observation/Answer
/// grammar. Keeps a rolling buffer; state advances only on trigger-literal
/// boundaries, and the buffer is consumed up to and including the trigger.
///
/// `ACTION` and `OBSERVATION` content is not emitted from the token stream;
/// the agent's explicit callback delivers those and supersedes.
pub struct StreamParser {
    state: ParseState,
    buffer: String,
    in_answer: bool,
    last_observation: Option<String>,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            buffer: String::new(),
            in_answer: false,
            last_observation: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one token chunk; possibly produce one event.
    pub fn parse_chunk(&mut self, chunk: &str) -> Option<ParsedEvent> {
        self.buffer.push_str(chunk);

        if let Some(event) = self.detect_state_change() {
            return Some(event);
        }
        self.process_current_state(chunk)
    }

    /// Trigger-literal transitions. Returns an event only when entering
    /// answer mode with trailing content already buffered.
    fn detect_state_change(&mut self) -> Option<ParsedEvent> {
        // Terminal state: no transitions out of ANSWER.
        if self.in_answer {
            return None;
        }

        if self.state != ParseState::Thought {
            if let Some(rest) = split_after(&self.buffer, "Thought:") {
                self.state = ParseState::Thought;
                self.buffer = rest;
                return None;
            }
        }

        if self.state != ParseState::Action {
            if let Some(rest) = split_after(&self.buffer, "Action:") {
                self.state = ParseState::Action;
                self.buffer = rest;
                return None;
            }
        }

        if self.state != ParseState::Observation {
            if let Some(rest) = split_after(&self.buffer, "Observation:") {
                self.state = ParseState::Observation;
                self.buffer = rest;
                return None;
            }
        }

        let answer_rest = split_after(&self.buffer, "Final Answer:")
            .or_else(|| split_after(&self.buffer, "Answer:"));
        if let Some(rest) = answer_rest {
            self.state = ParseState::Answer;
            self.in_answer = true;
            let content = rest.trim().to_string();
            self.buffer.clear();
            debug!("parser entered answer mode");
            if !content.is_empty() {
                return Some(ParsedEvent::AnswerChunk(content));
            }
            return None;
        }

        None
    }

    fn process_current_state(&mut self, chunk: &str) -> Option<ParsedEvent> {
        // Pure newline chunks are dropped.
        if chunk == "\n" || chunk == "\r\n" {
            return None;
        }

        match self.state {
            ParseState::Thought => {
                // A pending label in the buffer belongs to the next
                // transition, not to the thought text.
                if self.buffer.contains("Action:") || self.buffer.contains("Answer:") {
                    return None;
                }
                Some(ParsedEvent::Thought(chunk.to_string()))
            }
            // Delivered via the agent callback instead.
            ParseState::Action | ParseState::Observation => None,
            ParseState::Answer => Some(ParsedEvent::AnswerChunk(chunk.to_string())),
            ParseState::Idle => None,
        }
    }

    /// Record/forward an agent callback event. The callback path supersedes
    /// the token stream for actions and observations.
    pub fn handle_agent_event(&mut self, event: ParsedEvent) -> Option<ParsedEvent> {
        match &event {
            ParsedEvent::Observation(content) => {
                self.last_observation = Some(content.clone());
                Some(event)
            }
            ParsedEvent::Action(_) => Some(event),
            ParsedEvent::AnswerChunk(_) => {
                self.in_answer = true;
                self.state = ParseState::Answer;
                Some(event)
            }
            ParsedEvent::Thought(_) => Some(event),
        }
    }

    /// Tail content when the stream ended inside a recognizable but
    /// unflushed Answer.
    pub fn get_remaining_answer(&self) -> Option<String> {
        if self.in_answer || self.buffer.trim().is_empty() {
            return None;
        }
        let rest = split_after(&self.buffer, "Final Answer:")
            .or_else(|| split_after(&self.buffer, "Answer:"))?;
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn is_answer_sent(&self) -> bool {
        self.in_answer
    }

    /// True iff the agent's final string equals the last observation seen;
    /// prevents re-emitting an observation as the answer.
    pub fn should_skip_duplicate_answer(&self, final_result: &str) -> bool {
        self.last_observation.as_deref() == Some(final_result)
    }
}

/// Everything after the first occurrence of `trigger`, or None.
fn split_after(buffer: &str, trigger: &str) -> Option<String> {
    buffer
        .find(trigger)
        .map(|pos| buffer[pos + trigger.len()..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut StreamParser, text: &str) -> Vec<ParsedEvent> {
        // Feed small chunks to mimic token streaming.
        let mut events = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        for piece in chars.chunks(4) {
            let chunk: String = piece.iter().collect();
            if let Some(event) = parser.parse_chunk(&chunk) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn thought_then_answer_emits_both() {
        let mut parser = StreamParser::new();
        let events = feed(
            &mut parser,
            "Thought: I should look this up.\nFinal Answer: Bananas are yellow.",
        );

        let thought_text: String = events
            .iter()
            .filter_map(|e| match e {
                ParsedEvent::Thought(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(thought_text.contains("look"), "thoughts: {thought_text:?}");

        let answer_text: String = events
            .iter()
            .filter_map(|e| match e {
                ParsedEvent::AnswerChunk(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(answer_text.contains("Bananas are yellow"));
        assert!(parser.is_answer_sent());
    }

    #[test]
    fn no_answer_chunk_before_final_answer() {
        let mut parser = StreamParser::new();
        let events = feed(
            &mut parser,
            "Thought: X\nAction: tool\nAction Input: I\nObservation: O\n",
        );
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ParsedEvent::AnswerChunk(_))),
            "answer emitted before Final Answer: {events:?}"
        );
    }

    #[test]
    fn action_and_observation_tokens_are_swallowed() {
        let mut parser = StreamParser::new();
        let events = feed(&mut parser, "Action: search\nObservation: found things\n");
        assert!(events.is_empty(), "unexpected events: {events:?}");
    }

    #[test]
    fn answer_mode_is_terminal() {
        let mut parser = StreamParser::new();
        feed(&mut parser, "Final Answer: step one.");
        let events = feed(&mut parser, " Thought: this label is part of the answer");

        assert!(
            events.iter().all(|e| matches!(e, ParsedEvent::AnswerChunk(_))),
            "non-answer events after terminal state: {events:?}"
        );
        let answer: String = events
            .iter()
            .filter_map(|e| match e {
                ParsedEvent::AnswerChunk(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(answer.contains("Thought:"));
    }

    #[test]
    fn pure_newline_chunks_are_dropped() {
        let mut parser = StreamParser::new();
        parser.parse_chunk("Final Answer: hi");
        assert_eq!(parser.parse_chunk("\n"), None);
    }

    #[test]
    fn remaining_answer_is_recovered() {
        let mut parser = StreamParser::new();
        // Arrives in one lump; no transition fired chunk-by-chunk.
        parser.buffer = "Thought: done\nFinal Answer: recovered tail".to_string();
        assert_eq!(
            parser.get_remaining_answer().as_deref(),
            Some("recovered tail")
        );
    }

    #[test]
    fn duplicate_observation_answers_are_skipped() {
        let mut parser = StreamParser::new();
        parser.handle_agent_event(ParsedEvent::Observation("the result".to_string()));
        assert!(parser.should_skip_duplicate_answer("the result"));
        assert!(!parser.should_skip_duplicate_answer("something else"));
    }
}
