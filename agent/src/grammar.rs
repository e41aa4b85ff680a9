//! Output grammar shared by the prompt composer and the reasoning loop.
//!
//! A model response is expected to look like:
//!
//! ```text
//! Thought: I should look at the tables first
//! Action: list_tables
//! Action Input:
//! ```
//!
//! or, once the model knows the answer:
//!
//! ```text
//! Thought: I now know the final answer
//! Final Answer: Ada Lovelace and Grace Hopper work in Engineering.
//! ```

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

pub const QUESTION_MARKER: &str = "Question:";
pub const THOUGHT_MARKER: &str = "Thought:";
pub const ACTION_MARKER: &str = "Action:";
pub const ACTION_INPUT_MARKER: &str = "Action Input:";
pub const OBSERVATION_MARKER: &str = "Observation:";
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// The terminal step of a parsed model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningStep {
    Action { tool: String, input: String },
    FinalAnswer(String),
}

/// Ways a model response can violate the grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("the response was empty")]
    Empty,
    #[error("missing 'Action:' after 'Thought:'")]
    MissingAction,
    #[error("missing 'Action Input:' after 'Action:'")]
    MissingActionInput,
    #[error("'Action:' must name a tool")]
    EmptyToolName,
    #[error("'Final Answer:' must be followed by the answer")]
    EmptyFinalAnswer,
    #[error("the response contains both an action and a final answer")]
    Ambiguous,
}

impl ParseFailure {
    /// Observation fed back to the model so it can correct its format
    pub fn corrective_observation(&self) -> String {
        format!(
            "Could not parse your output: {}. Follow the format exactly: either \
             '{ACTION_MARKER}' with a tool name followed by '{ACTION_INPUT_MARKER}', \
             or '{FINAL_ANSWER_MARKER}' with the answer, never both.",
            self
        )
    }
}

/// A well-formed response: an optional thought and exactly one terminal step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub thought: Option<String>,
    pub step: ReasoningStep,
    /// Response text with any self-generated observation removed
    pub text: String,
}

fn action_regex() -> &'static Regex {
    static ACTION: OnceLock<Regex> = OnceLock::new();
    ACTION.get_or_init(|| {
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
            .expect("action pattern is valid")
    })
}

fn action_only_regex() -> &'static Regex {
    static ACTION_ONLY: OnceLock<Regex> = OnceLock::new();
    ACTION_ONLY.get_or_init(|| {
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)")
            .expect("action pattern is valid")
    })
}

/// Cuts the response at the first line the model wrote as an observation
pub fn truncate_observation(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with(OBSERVATION_MARKER) {
            return &text[..offset];
        }
        offset += line.len();
    }
    text
}

/// Strips markdown fences and wrapping quotes or backticks from a tool input
pub fn clean_input(input: &str) -> String {
    let mut cleaned = input.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop an info string such as ```sql
        let body = match rest.find('\n') {
            Some(idx) if !rest[..idx].trim().contains(' ') => &rest[idx + 1..],
            _ => rest,
        };
        cleaned = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }

    loop {
        let unwrapped = ['"', '\'', '`'].iter().find_map(|q| {
            cleaned
                .strip_prefix(*q)
                .and_then(|s| s.strip_suffix(*q))
                .map(str::trim)
        });
        match unwrapped {
            Some(inner) if inner.len() < cleaned.len() => cleaned = inner,
            _ => break,
        }
    }

    cleaned.to_string()
}

fn clean_tool_name(name: &str) -> String {
    name.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '*')
        .trim()
        .to_string()
}

fn leading_thought(text: &str, end: usize) -> Option<String> {
    let head = text[..end].trim();
    let head = head.strip_prefix(THOUGHT_MARKER).unwrap_or(head).trim();
    if head.is_empty() {
        None
    } else {
        Some(head.to_string())
    }
}

/// Parses one completion into an optional thought plus one terminal step
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ParseFailure> {
    let text = truncate_observation(raw).trim_end();
    if text.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }

    let final_at = text.find(FINAL_ANSWER_MARKER);

    if let Some(caps) = action_regex().captures(text) {
        if final_at.is_some() {
            return Err(ParseFailure::Ambiguous);
        }
        let (Some(whole), Some(tool), Some(input)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            return Err(ParseFailure::MissingAction);
        };

        let tool = clean_tool_name(tool.as_str());
        if tool.is_empty() {
            return Err(ParseFailure::EmptyToolName);
        }

        return Ok(ParsedResponse {
            thought: leading_thought(text, whole.start()),
            step: ReasoningStep::Action {
                tool,
                input: clean_input(input.as_str()),
            },
            text: text.to_string(),
        });
    }

    if let Some(at) = final_at {
        let answer = text[at + FINAL_ANSWER_MARKER.len()..].trim();
        if answer.is_empty() {
            return Err(ParseFailure::EmptyFinalAnswer);
        }
        return Ok(ParsedResponse {
            thought: leading_thought(text, at),
            step: ReasoningStep::FinalAnswer(answer.to_string()),
            text: text.to_string(),
        });
    }

    if action_only_regex().is_match(text) {
        Err(ParseFailure::MissingActionInput)
    } else {
        Err(ParseFailure::MissingAction)
    }
}
