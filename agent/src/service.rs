use std::sync::Arc;

use roster_core::types::QueryResponse;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::AgentExecutor;
use crate::session::ConversationStoreRef;

const EMPTY_QUERY_MESSAGE: &str = "Query parameter is required.";

/// Entry point used by the request handlers.
///
/// Every call returns a `QueryResponse`; faults inside a run are reported
/// through `success = false` and never escape to the caller.
#[derive(Clone)]
pub struct QueryService {
    executor: Arc<AgentExecutor>,
    memory: ConversationStoreRef,
}

impl QueryService {
    pub fn new(executor: AgentExecutor, memory: ConversationStoreRef) -> Self {
        Self {
            executor: Arc::new(executor),
            memory,
        }
    }

    pub fn memory(&self) -> &ConversationStoreRef {
        &self.memory
    }

    fn fault_message(fault: impl std::fmt::Display) -> String {
        format!("Error processing your query: {}", fault)
    }

    /// Answer `question` within the conversation `conversation_id`,
    /// starting a new conversation when none is given.
    pub async fn answer(&self, question: &str, conversation_id: Option<&str>) -> QueryResponse {
        let conversation_id = conversation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut response = QueryResponse {
            conversation_id: conversation_id.clone(),
            query: question.to_string(),
            response: String::new(),
            steps: Vec::new(),
            success: false,
        };

        if question.trim().is_empty() {
            warn!(conversation_id = %conversation_id, "Rejected empty query");
            response.response = EMPTY_QUERY_MESSAGE.to_string();
            return response;
        }

        // Turns within one conversation are serialized for the whole run
        let _guard = match self.memory.lock(&conversation_id).await {
            Ok(guard) => guard,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Failed to lock conversation");
                response.response = Self::fault_message(e);
                return response;
            }
        };

        let history = match self.memory.history(&conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Failed to load history");
                response.response = Self::fault_message(e);
                return response;
            }
        };

        info!(
            conversation_id = %conversation_id,
            history_turns = history.len(),
            "Processing query"
        );

        let executor = Arc::clone(&self.executor);
        let question_owned = question.to_string();
        let handle = tokio::spawn(async move { executor.run(&question_owned, &history).await });

        match handle.await {
            Ok(Ok(run)) => {
                response.success = run.outcome.is_answered();
                response.response = run.outcome.text().to_string();
                response.steps = run.trace;
            }
            Ok(Err(e)) => {
                error!(conversation_id = %conversation_id, error = %e, "Run failed");
                response.response = Self::fault_message(e);
            }
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Run task panicked");
                response.response = Self::fault_message(e);
            }
        }

        if let Err(e) = self
            .memory
            .append_exchange(&conversation_id, question, &response.response)
            .await
        {
            error!(conversation_id = %conversation_id, error = %e, "Failed to store exchange");
        }

        response
    }
}
