// The roster-agent crate answers natural-language questions about the
// employee roster:
// - Tool set over the roster database
// - Per-conversation memory
// - Prompt composition and output grammar
// - The reasoning loop and the query service around it
// - The HTTP shell used by the daemon

pub mod errors;
pub mod executor;
pub mod grammar;
pub mod http_server;
pub mod prompt;
pub mod service;
pub mod session;
pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use errors::{AgentError, AgentResult, ToolError};
pub use executor::{AbortReason, AgentExecutor, AgentRun, AgentSettings, RunOutcome};
pub use grammar::{parse_response, ParseFailure, ParsedResponse, ReasoningStep};
pub use prompt::PromptComposer;
pub use service::QueryService;
pub use session::{ConversationStore, ConversationStoreRef, InMemoryConversationStore};
pub use tools::{ToolRun, ToolSet, ToolSettings, ToolSpec, TOOL_CATALOG};
