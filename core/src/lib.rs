// Shared building blocks for the roster query workspace:
// - Configuration loading
// - Conversation and response data structures
// - Completion engine capability and clients
// - Shared error types

// Export config module - Configuration loading
pub mod config;
pub use config::*;

// Export types module - Conversation turns, traces and wire types
pub mod types;
pub use types::*;

// Export completion module - Text completion capability
pub mod completion;
pub use completion::{
    create_completion_engine, wait_until_ready, CompletionEngine, OllamaClient, OpenAiClient,
};

// Export errors module - Shared error types
pub mod errors;
pub use errors::*;
