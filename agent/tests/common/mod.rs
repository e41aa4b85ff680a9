#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roster_agent::{
    AgentExecutor, AgentSettings, InMemoryConversationStore, PromptComposer, QueryService,
    ToolSet, ToolSettings, TOOL_CATALOG,
};
use roster_core::completion::CompletionEngine;
use roster_core::errors::CompletionResult;
use roster_db::{bootstrap, SqliteDatabase};
use rusqlite::Connection;
use tempfile::TempDir;

pub use roster_agent::testing::ScriptedEngine;

/// Answers every prompt with its own question, after a pause
#[derive(Debug)]
pub struct EchoEngine {
    pub delay: Duration,
}

#[async_trait]
impl CompletionEngine for EchoEngine {
    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        tokio::time::sleep(self.delay).await;
        let question = prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("Question: "))
            .unwrap_or_default();
        Ok(format!("Final Answer: you asked {question}"))
    }

    async fn probe(&self) -> CompletionResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "echo"
    }

    fn model_name(&self) -> String {
        "echo".to_string()
    }
}

/// Creates the employees table in a scratch directory and fills it
pub async fn seeded_roster() -> (TempDir, SqliteDatabase) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("employee_database.db");
    bootstrap::initialize(&path).await.unwrap();

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "INSERT INTO employees (name, department, position, email, phone, address, hire_date, date_of_birth, ssn, username) VALUES
            ('Ada Lovelace', 'Engineering', 'Principal Engineer', 'ada@example.com', '555-0100', '1 Analytical Way', '2019-03-01', '1985-12-10', '111-22-3333', 'ada'),
            ('Grace Hopper', 'Engineering', 'Engineering Manager', 'grace@example.com', '555-0101', '2 Compiler Ct', '2017-06-15', '1980-12-09', '222-33-4444', 'grace'),
            ('Mary Jackson', 'Research', 'Aerospace Analyst', 'mary@example.com', '555-0102', '3 Langley Rd', '2020-01-20', '1988-04-09', '333-44-5555', 'mary');",
    )
    .unwrap();

    (dir, SqliteDatabase::new(path))
}

pub fn service_with(
    engine: Arc<dyn CompletionEngine>,
    db: SqliteDatabase,
    settings: AgentSettings,
) -> QueryService {
    let executor = AgentExecutor::new(
        engine,
        ToolSet::new(Arc::new(db), ToolSettings::default()),
        PromptComposer::new(TOOL_CATALOG, 20),
        settings,
    );
    QueryService::new(executor, Arc::new(InMemoryConversationStore::new()))
}
