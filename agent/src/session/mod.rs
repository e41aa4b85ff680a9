//! Conversation memory for the query agent
//!
//! Keeps the ordered question/answer history of each conversation so later
//! questions can refer back to earlier ones. The `ConversationStore` trait
//! can be implemented by different storage backends; the daemon uses the
//! in-memory adapter.

pub mod adapters;
pub mod store;

pub use adapters::InMemoryConversationStore;
pub use store::{
    Conversation, ConversationGuard, ConversationStore, ConversationStoreRef, MemoryStoreError,
};
