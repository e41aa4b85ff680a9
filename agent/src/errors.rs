use std::time::Duration;

use roster_core::errors::CompletionError;
use roster_db::DatabaseError;
use thiserror::Error;

use crate::session::MemoryStoreError;

/// Failures raised while dispatching a tool. All of them are rendered back
/// into the loop as observations.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{requested}'. Valid tools are: {}", available.join(", "))]
    UnknownTool {
        requested: String,
        available: Vec<String>,
    },
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Tool '{tool}' timed out after {}s", elapsed.as_secs())]
    Timeout { tool: String, elapsed: Duration },
}

/// Faults that end a run outside the loop's own recovery
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Completion engine unavailable: {0}")]
    CompletionEngineUnavailable(#[from] CompletionError),
    #[error("Conversation memory error: {0}")]
    Memory(#[from] MemoryStoreError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
