use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core::config::MemoryConfig;
use roster_core::types::{Role, Turn};
use tracing::{debug, info};

use crate::session::store::{
    validate_conversation_id, Conversation, ConversationGuard, ConversationStore,
    MemoryStoreError,
};

#[derive(Debug)]
struct Entry {
    conversation: Conversation,
    last_accessed: DateTime<Utc>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Entry {
    fn new(id: &str) -> Self {
        Self {
            conversation: Conversation::new(id.to_string()),
            last_accessed: Utc::now(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// A run holds or awaits this conversation's lock
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.lock) > 1
    }
}

/// In-memory conversation store, bounded by count (LRU) and idle time (TTL)
#[derive(Debug)]
pub struct InMemoryConversationStore {
    /// Thread-safe storage of conversations
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    max_conversations: usize,
    idle_ttl: Option<Duration>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl InMemoryConversationStore {
    /// Create a store with the default limits
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_conversations: usize, idle_ttl: Option<Duration>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_conversations: max_conversations.max(1),
            idle_ttl,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::with_limits(config.max_conversations, config.idle_ttl())
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        if entry.in_use() {
            return false;
        }
        match self.idle_ttl {
            Some(ttl) => (now - entry.last_accessed)
                .to_std()
                .map(|idle| idle > ttl)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Get-or-create under an already held write lock, touching the entry
    fn entry_mut<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        id: &str,
    ) -> &'a mut Entry {
        let now = Utc::now();
        let stale = entries
            .get(id)
            .map(|entry| self.is_expired(entry, now))
            .unwrap_or(false);
        if stale {
            debug!(conversation_id = id, "Conversation expired, starting fresh");
            entries.remove(id);
        }

        if !entries.contains_key(id) {
            entries.insert(id.to_string(), Entry::new(id));
            debug!(conversation_id = id, "Created conversation");
            self.evict_over_capacity(entries, id);
        }

        // The entry for `id` is never evicted above
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| Entry::new(id));
        entry.last_accessed = now;
        entry
    }

    /// Evict least-recently-used conversations until within capacity.
    /// Conversations with an active run are skipped.
    fn evict_over_capacity(&self, entries: &mut HashMap<String, Entry>, keep: &str) {
        while entries.len() > self.max_conversations {
            let victim = entries
                .iter()
                .filter(|(id, entry)| id.as_str() != keep && !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    entries.remove(&id);
                    debug!(conversation_id = %id, "Evicted least recently used conversation");
                }
                None => break,
            }
        }
    }

    fn write_lock_error<E: std::fmt::Display>(e: E) -> MemoryStoreError {
        MemoryStoreError::StorageError(format!("Failed to acquire write lock: {}", e))
    }

    fn read_lock_error<E: std::fmt::Display>(e: E) -> MemoryStoreError {
        MemoryStoreError::StorageError(format!("Failed to acquire read lock: {}", e))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, id: &str) -> Result<Conversation, MemoryStoreError> {
        validate_conversation_id(id)?;
        let mut entries = self.entries.write().map_err(Self::write_lock_error)?;
        Ok(self.entry_mut(&mut entries, id).conversation.clone())
    }

    async fn append(&self, id: &str, role: Role, text: &str) -> Result<(), MemoryStoreError> {
        validate_conversation_id(id)?;
        let mut entries = self.entries.write().map_err(Self::write_lock_error)?;
        self.entry_mut(&mut entries, id)
            .conversation
            .push(Turn::new(role, text));
        Ok(())
    }

    async fn append_exchange(
        &self,
        id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), MemoryStoreError> {
        validate_conversation_id(id)?;
        let mut entries = self.entries.write().map_err(Self::write_lock_error)?;
        let conversation = &mut self.entry_mut(&mut entries, id).conversation;
        conversation.push(Turn::user(question));
        conversation.push(Turn::assistant(answer));
        debug!(
            conversation_id = id,
            turns = conversation.turns.len(),
            "Appended exchange"
        );
        Ok(())
    }

    async fn history(&self, id: &str) -> Result<Vec<Turn>, MemoryStoreError> {
        validate_conversation_id(id)?;
        let entries = self.entries.read().map_err(Self::read_lock_error)?;
        let now = Utc::now();
        Ok(entries
            .get(id)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.conversation.turns.clone())
            .unwrap_or_default())
    }

    async fn lock(&self, id: &str) -> Result<ConversationGuard, MemoryStoreError> {
        validate_conversation_id(id)?;
        let mutex = {
            let mut entries = self.entries.write().map_err(Self::write_lock_error)?;
            Arc::clone(&self.entry_mut(&mut entries, id).lock)
        };
        Ok(mutex.lock_owned().await)
    }

    async fn cleanup_expired(&self) -> Result<usize, MemoryStoreError> {
        let mut entries = self.entries.write().map_err(Self::write_lock_error)?;

        let now = Utc::now();
        let expired_ids: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();

        let count = expired_ids.len();
        for id in expired_ids {
            entries.remove(&id);
            debug!(conversation_id = %id, "Cleaned up expired conversation");
        }

        if count > 0 {
            info!("Cleaned up {} expired conversations", count);
        }

        Ok(count)
    }

    async fn len(&self) -> Result<usize, MemoryStoreError> {
        let entries = self.entries.read().map_err(Self::read_lock_error)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tokio::test;

    fn contents(turns: &[Turn]) -> Vec<(Role, String)> {
        turns.iter().map(|t| (t.role, t.content.clone())).collect()
    }

    #[test]
    async fn test_get_or_create_is_idempotent() {
        let store = InMemoryConversationStore::new();

        let first = store.get_or_create("conv-1").await.unwrap();
        store.append("conv-1", Role::User, "hello").await.unwrap();
        let second = store.get_or_create("conv-1").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(contents(&second.turns), vec![(Role::User, "hello".to_string())]);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[test]
    async fn test_append_exchange_keeps_order() {
        let store = InMemoryConversationStore::new();

        store.append_exchange("conv", "q1", "a1").await.unwrap();
        store.append_exchange("conv", "q2", "a2").await.unwrap();

        let history = store.history("conv").await.unwrap();
        assert_eq!(
            contents(&history),
            vec![
                (Role::User, "q1".to_string()),
                (Role::Assistant, "a1".to_string()),
                (Role::User, "q2".to_string()),
                (Role::Assistant, "a2".to_string()),
            ]
        );
    }

    #[test]
    async fn test_invalid_id_is_rejected() {
        let store = InMemoryConversationStore::new();

        assert_eq!(
            store.append("", Role::User, "x").await,
            Err(MemoryStoreError::InvalidConversationId)
        );
        assert!(matches!(
            store.get_or_create("").await,
            Err(MemoryStoreError::InvalidConversationId)
        ));
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[test]
    async fn test_history_of_unknown_id_does_not_create() {
        let store = InMemoryConversationStore::new();

        assert!(store.history("nobody").await.unwrap().is_empty());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[test]
    async fn test_least_recently_used_is_evicted() {
        let store = InMemoryConversationStore::with_limits(2, None);

        store.append("a", Role::User, "from a").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        store.append("b", Role::User, "from b").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        // Touch `a` so `b` becomes the oldest
        store.get_or_create("a").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        store.get_or_create("c").await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.history("a").await.unwrap().len(), 1);
        assert!(store.history("b").await.unwrap().is_empty());
    }

    #[test]
    async fn test_locked_conversation_is_not_evicted() {
        let store = InMemoryConversationStore::with_limits(1, None);

        store.append("busy", Role::User, "running").await.unwrap();
        let guard = store.lock("busy").await.unwrap();

        store.get_or_create("other").await.unwrap();
        assert_eq!(store.history("busy").await.unwrap().len(), 1);
        assert_eq!(store.len().await.unwrap(), 2);

        drop(guard);
        store.get_or_create("third").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.history("busy").await.unwrap().is_empty());
    }

    #[test]
    async fn test_idle_conversations_expire() {
        let store = InMemoryConversationStore::with_limits(10, Some(Duration::from_millis(10)));

        store.append_exchange("old", "q", "a").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(30));

        // Expired conversations read as absent
        assert!(store.history("old").await.unwrap().is_empty());

        let cleaned = store.cleanup_expired().await.unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(store.len().await.unwrap(), 0);

        // And come back empty when referenced again
        let fresh = store.get_or_create("old").await.unwrap();
        assert!(fresh.turns.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_serializes_same_conversation() {
        let store = Arc::new(InMemoryConversationStore::new());

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let _guard = store.lock("shared").await.unwrap();
                store
                    .append("shared", Role::User, &format!("q{}", i))
                    .await
                    .unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                store
                    .append("shared", Role::Assistant, &format!("a{}", i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.history("shared").await.unwrap();
        assert_eq!(history.len(), 8);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
