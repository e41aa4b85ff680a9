//! Test doubles for the completion engine and the database.
//!
//! Compiled for this crate's unit tests and, through the `test-support`
//! feature, for its integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use roster_core::completion::CompletionEngine;
use roster_core::errors::{CompletionError, CompletionResult};
use roster_db::{ColumnInfo, Database, DatabaseError, DbResult, QueryRows, Row, SchemaDescriptor};
use serde_json::json;

/// Completion engine that replays canned responses in order
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<CompletionResult<String>>>,
    prompts: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(responses: impl IntoIterator<Item = CompletionResult<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionEngine for ScriptedEngine {
    async fn complete(&self, prompt: &str) -> CompletionResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::EmptyResponse))
    }

    async fn probe(&self) -> CompletionResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}

const FAKE_ROW_COUNT: usize = 3;

/// In-memory stand-in for the roster database
#[derive(Debug, Default)]
pub struct FakeDatabase {
    pub schema_calls: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Database for FakeDatabase {
    async fn list_tables(&self) -> DbResult<Vec<String>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vec!["departments".to_string(), "employees".to_string()])
    }

    async fn table_schemas(&self, tables: &[String]) -> DbResult<Vec<SchemaDescriptor>> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        let known = self.list_tables().await?;
        let unknown: Vec<String> = tables
            .iter()
            .filter(|t| !known.contains(t))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(DatabaseError::UnknownTable {
                requested: unknown,
                known,
            });
        }
        Ok(tables
            .iter()
            .map(|t| SchemaDescriptor {
                table: t.clone(),
                columns: vec![ColumnInfo {
                    name: "name".to_string(),
                    declared_type: "TEXT".to_string(),
                }],
                create_sql: Some(format!("CREATE TABLE {t} (name TEXT)")),
                sample_rows: Vec::new(),
            })
            .collect())
    }

    async fn validate(&self, sql: &str) -> DbResult<()> {
        if sql.contains("nope") {
            Err(DatabaseError::QueryExecution(
                "no such column: nope".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn execute(&self, sql: &str, max_rows: usize) -> DbResult<QueryRows> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.validate(sql).await?;
        let rows: Vec<Row> = (0..FAKE_ROW_COUNT)
            .take(max_rows)
            .map(|i| {
                let mut row = Row::new();
                row.insert("name".to_string(), json!(format!("person {i}")));
                row.insert("id".to_string(), json!(i));
                row
            })
            .collect();
        Ok(QueryRows {
            truncated: rows.len() < FAKE_ROW_COUNT,
            rows,
        })
    }
}
