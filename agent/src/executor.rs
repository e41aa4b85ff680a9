use std::sync::Arc;
use std::time::Duration;

use roster_core::completion::CompletionEngine;
use roster_core::config::AgentConfig;
use roster_core::types::{ToolInvocation, Turn};
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{AgentError, AgentResult};
use crate::grammar::{parse_response, truncate_observation, ParseFailure, ReasoningStep};
use crate::prompt::PromptComposer;
use crate::tools::{ToolRun, ToolSet};

/// Bounds for one reasoning run
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Completion calls allowed per run
    pub max_iterations: usize,
    /// Consecutive parse failures tolerated; one more aborts the run
    pub max_parse_failures: usize,
    pub completion_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl AgentSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_parse_failures: config.max_parse_failures,
            completion_timeout: config.completion_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    IterationBudgetExceeded,
    ParseFailureBudgetExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Answered { answer: String },
    Aborted { reason: AbortReason, message: String },
}

impl RunOutcome {
    /// Text returned to the caller and stored in memory
    pub fn text(&self) -> &str {
        match self {
            RunOutcome::Answered { answer } => answer,
            RunOutcome::Aborted { message, .. } => message,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, RunOutcome::Answered { .. })
    }
}

/// Result of one reasoning run
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRun {
    pub outcome: RunOutcome,
    pub trace: Vec<ToolInvocation>,
    /// Completion calls made
    pub iterations: usize,
}

#[derive(Debug)]
enum LoopState {
    Thinking,
    Acting {
        text: String,
        tool: String,
        input: String,
    },
    Observing {
        text: String,
        observation: String,
    },
    Answered(String),
    Aborted(AbortReason),
}

/// Drives the think, act, observe cycle for one question.
///
/// Each cycle makes exactly one completion call. Tool and grammar errors are
/// fed back to the model as observations; only an unreachable completion
/// engine ends a run with an error.
pub struct AgentExecutor {
    engine: Arc<dyn CompletionEngine>,
    tools: ToolSet,
    composer: PromptComposer,
    settings: AgentSettings,
}

impl AgentExecutor {
    pub fn new(
        engine: Arc<dyn CompletionEngine>,
        tools: ToolSet,
        composer: PromptComposer,
        settings: AgentSettings,
    ) -> Self {
        Self {
            engine,
            tools,
            composer,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// One completion call. `Ok(None)` means the call produced nothing usable
    /// but the run may continue.
    async fn complete(&self, prompt: &str) -> AgentResult<Option<String>> {
        match tokio::time::timeout(self.settings.completion_timeout, self.engine.complete(prompt))
            .await
        {
            Ok(Ok(text)) => Ok(Some(text)),
            Ok(Err(e)) if e.is_recoverable() => {
                warn!(error = %e, "Completion produced no usable text");
                Ok(None)
            }
            Ok(Err(e)) => {
                error!(error = %e, provider = self.engine.provider_name(), "Completion engine failed");
                Err(AgentError::CompletionEngineUnavailable(e))
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.completion_timeout.as_secs(),
                    "Completion timed out"
                );
                Ok(None)
            }
        }
    }

    /// Answer `question` given the prior turns of its conversation
    #[instrument(skip(self, history), fields(history_turns = history.len()))]
    pub async fn run(&self, question: &str, history: &[Turn]) -> AgentResult<AgentRun> {
        let mut state = LoopState::Thinking;
        let mut scratchpad = String::new();
        let mut tool_run = ToolRun::new();
        let mut iterations = 0usize;
        let mut parse_failures = 0usize;
        let mut last_thought: Option<String> = None;

        loop {
            state = match state {
                LoopState::Thinking => {
                    if iterations >= self.settings.max_iterations {
                        LoopState::Aborted(AbortReason::IterationBudgetExceeded)
                    } else {
                        iterations += 1;
                        debug!(iteration = iterations, "Thinking");

                        let prompt = self.composer.compose(history, question, &scratchpad);
                        let raw = self.complete(&prompt).await?;
                        let parsed = match raw.as_deref() {
                            Some(text) => parse_response(text).map_err(|f| (text.to_string(), f)),
                            None => Err((String::new(), ParseFailure::Empty)),
                        };

                        match parsed {
                            Ok(parsed) => {
                                parse_failures = 0;
                                if parsed.thought.is_some() {
                                    last_thought = parsed.thought.clone();
                                }
                                match parsed.step {
                                    ReasoningStep::Action { tool, input } => LoopState::Acting {
                                        text: parsed.text,
                                        tool,
                                        input,
                                    },
                                    ReasoningStep::FinalAnswer(answer) => {
                                        LoopState::Answered(answer)
                                    }
                                }
                            }
                            Err((text, failure)) => {
                                parse_failures += 1;
                                warn!(
                                    iteration = iterations,
                                    consecutive = parse_failures,
                                    failure = %failure,
                                    "Could not parse completion"
                                );
                                if parse_failures > self.settings.max_parse_failures {
                                    LoopState::Aborted(AbortReason::ParseFailureBudgetExceeded)
                                } else {
                                    LoopState::Observing {
                                        text: truncate_observation(&text).trim().to_string(),
                                        observation: failure.corrective_observation(),
                                    }
                                }
                            }
                        }
                    }
                }
                LoopState::Acting { text, tool, input } => {
                    let observation = self.tools.invoke(&mut tool_run, &tool, &input).await;
                    LoopState::Observing { text, observation }
                }
                LoopState::Observing { text, observation } => {
                    scratchpad.push_str(text.trim_end());
                    scratchpad.push_str("\nObservation: ");
                    scratchpad.push_str(&observation);
                    scratchpad.push_str("\nThought: ");
                    LoopState::Thinking
                }
                LoopState::Answered(answer) => {
                    info!(
                        iterations = iterations,
                        tool_calls = tool_run.trace().len(),
                        "Run answered"
                    );
                    return Ok(AgentRun {
                        outcome: RunOutcome::Answered { answer },
                        trace: tool_run.into_trace(),
                        iterations,
                    });
                }
                LoopState::Aborted(reason) => {
                    let message = self.abort_message(reason, last_thought.as_deref());
                    warn!(
                        reason = ?reason,
                        iterations = iterations,
                        tool_calls = tool_run.trace().len(),
                        "Run aborted"
                    );
                    return Ok(AgentRun {
                        outcome: RunOutcome::Aborted { reason, message },
                        trace: tool_run.into_trace(),
                        iterations,
                    });
                }
            };
        }
    }

    fn abort_message(&self, reason: AbortReason, last_thought: Option<&str>) -> String {
        let mut message = match reason {
            AbortReason::IterationBudgetExceeded => format!(
                "I could not find an answer within {} reasoning steps.",
                self.settings.max_iterations
            ),
            AbortReason::ParseFailureBudgetExceeded => {
                "I could not produce a well-formed answer to your question.".to_string()
            }
        };
        if let Some(thought) = last_thought {
            message.push_str(" My last thought was: ");
            message.push_str(thought);
        }
        message
    }
}
