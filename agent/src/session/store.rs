use std::error::Error;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core::types::{Role, Turn};

/// Error type for conversation store operations
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryStoreError {
    /// Conversation identifiers must be non-empty
    InvalidConversationId,
    /// Error occurred during a store operation
    StorageError(String),
}

impl Display for MemoryStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryStoreError::InvalidConversationId => {
                write!(f, "Invalid conversation id: must not be empty")
            }
            MemoryStoreError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl Error for MemoryStoreError {}

/// Rejects identifiers that cannot key a conversation
pub fn validate_conversation_id(id: &str) -> Result<(), MemoryStoreError> {
    if id.trim().is_empty() {
        Err(MemoryStoreError::InvalidConversationId)
    } else {
        Ok(())
    }
}

/// Ordered message log for one conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Caller-supplied or generated identifier
    pub id: String,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// Last time a turn was appended
    pub updated_at: DateTime<Utc>,
    /// Turns in chronological order, never mutated once appended
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation with the given ID
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
        }
    }

    /// Append a turn at the end of the log
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = turn.created_at;
        self.turns.push(turn);
    }

    /// The last `window` turns, oldest first
    pub fn recent(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }
}

/// Held for the duration of a run; other requests on the same conversation wait for it
pub type ConversationGuard = tokio::sync::OwnedMutexGuard<()>;

/// Trait defining the interface for conversation memory stores
#[async_trait]
pub trait ConversationStore: Send + Sync + Debug {
    /// Return the conversation for `id`, creating an empty one if absent
    async fn get_or_create(&self, id: &str) -> Result<Conversation, MemoryStoreError>;

    /// Append a single turn, creating the conversation if absent
    async fn append(&self, id: &str, role: Role, text: &str) -> Result<(), MemoryStoreError>;

    /// Append a question and its answer as one atomic step
    async fn append_exchange(
        &self,
        id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), MemoryStoreError>;

    /// Turns of the conversation in order; empty for unknown ids
    async fn history(&self, id: &str) -> Result<Vec<Turn>, MemoryStoreError>;

    /// Acquire the per-conversation lock
    async fn lock(&self, id: &str) -> Result<ConversationGuard, MemoryStoreError>;

    /// Drop conversations idle past the configured TTL
    async fn cleanup_expired(&self) -> Result<usize, MemoryStoreError>;

    /// Number of live conversations
    async fn len(&self) -> Result<usize, MemoryStoreError>;
}

/// Type alias for Arc-wrapped ConversationStore trait objects
pub type ConversationStoreRef = Arc<dyn ConversationStore>;
