use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use roster_core::config::{AgentConfig, DatabaseConfig};
use roster_core::types::ToolInvocation;
use roster_db::{ensure_read_only, DatabaseRef, QueryRows};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::ToolError;

pub const LIST_TABLES: &str = "list_tables";
pub const GET_SCHEMA: &str = "get_schema";
pub const VALIDATE_QUERY: &str = "validate_query";
pub const RUN_QUERY: &str = "run_query";

/// Name and one-line description of a tool, as shown to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOL_CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: LIST_TABLES,
        description: "Input is an empty string, output is a comma-separated list of tables in the database.",
    },
    ToolSpec {
        name: GET_SCHEMA,
        description: "Input is a comma-separated list of tables, output is the schema and sample rows for those tables. Call list_tables first to be sure the tables exist.",
    },
    ToolSpec {
        name: VALIDATE_QUERY,
        description: "Input is a SQL SELECT query, output says whether the query is valid without running it.",
    },
    ToolSpec {
        name: RUN_QUERY,
        description: "Input is a detailed and correct SQL SELECT query, output is the result rows as JSON. If the query is not correct, an error message is returned; rewrite the query and try again.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    ListTables,
    GetSchema,
    ValidateQuery,
    RunQuery,
}

impl ToolKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            LIST_TABLES => Some(ToolKind::ListTables),
            GET_SCHEMA => Some(ToolKind::GetSchema),
            VALIDATE_QUERY => Some(ToolKind::ValidateQuery),
            RUN_QUERY => Some(ToolKind::RunQuery),
            _ => None,
        }
    }
}

/// Limits applied to every tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub timeout: Duration,
    pub max_observation_chars: usize,
    pub max_result_rows: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self::new(&AgentConfig::default(), &DatabaseConfig::default())
    }
}

impl ToolSettings {
    pub fn new(agent: &AgentConfig, database: &DatabaseConfig) -> Self {
        Self {
            timeout: agent.tool_timeout(),
            max_observation_chars: agent.max_observation_chars,
            max_result_rows: database.max_result_rows,
        }
    }
}

/// State owned by one reasoning run: the trace and the schema cache
#[derive(Debug, Default)]
pub struct ToolRun {
    trace: Vec<ToolInvocation>,
    schema_cache: HashMap<String, String>,
}

impl ToolRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace(&self) -> &[ToolInvocation] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<ToolInvocation> {
        self.trace
    }
}

/// The fixed set of database tools the reasoning loop can call.
///
/// Tools never touch conversation memory; their only side effect is the
/// trace entry recorded on the caller's `ToolRun`.
#[derive(Debug, Clone)]
pub struct ToolSet {
    db: DatabaseRef,
    settings: ToolSettings,
}

impl ToolSet {
    pub fn new(db: DatabaseRef, settings: ToolSettings) -> Self {
        Self { db, settings }
    }

    pub fn catalog(&self) -> &'static [ToolSpec] {
        TOOL_CATALOG
    }

    async fn bounded<T, F>(&self, tool: &str, fut: F) -> Result<T, ToolError>
    where
        F: Future<Output = Result<T, ToolError>>,
    {
        tokio::time::timeout(self.settings.timeout, fut)
            .await
            .map_err(|_| ToolError::Timeout {
                tool: tool.to_string(),
                elapsed: self.settings.timeout,
            })?
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, ToolError> {
        Ok(self.db.list_tables().await?)
    }

    /// Rendered schema for each requested table, served from the run's cache when possible
    pub async fn get_schema(&self, run: &mut ToolRun, tables: &[String]) -> Result<String, ToolError> {
        if tables.is_empty() {
            let known = self.db.list_tables().await?;
            return Err(ToolError::InvalidInput(format!(
                "No table names given. Valid tables are: {}",
                known.join(", ")
            )));
        }

        let missing: Vec<String> = tables
            .iter()
            .filter(|t| !run.schema_cache.contains_key(*t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            for schema in self.db.table_schemas(&missing).await? {
                run.schema_cache.insert(schema.table.clone(), schema.render());
            }
        } else {
            debug!(tables = ?tables, "Schema served from run cache");
        }

        Ok(tables
            .iter()
            .filter_map(|t| run.schema_cache.get(t).cloned())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    pub async fn validate_query(&self, sql: &str) -> Result<(), ToolError> {
        let statement = ensure_read_only(sql)?;
        self.db.validate(statement).await?;
        Ok(())
    }

    pub async fn run_query(&self, sql: &str) -> Result<QueryRows, ToolError> {
        let statement = ensure_read_only(sql)?;
        Ok(self.db.execute(statement, self.settings.max_result_rows).await?)
    }

    async fn dispatch(&self, run: &mut ToolRun, tool: &str, input: &str) -> Result<String, ToolError> {
        let Some(kind) = ToolKind::from_name(tool) else {
            return Err(ToolError::UnknownTool {
                requested: tool.to_string(),
                available: TOOL_CATALOG.iter().map(|t| t.name.to_string()).collect(),
            });
        };

        match kind {
            ToolKind::ListTables => {
                let tables = self.bounded(tool, self.list_tables()).await?;
                Ok(tables.join(", "))
            }
            ToolKind::GetSchema => {
                let tables = parse_table_list(input);
                self.bounded(tool, self.get_schema(run, &tables)).await
            }
            ToolKind::ValidateQuery => {
                self.bounded(tool, self.validate_query(input)).await?;
                Ok("The query is valid.".to_string())
            }
            ToolKind::RunQuery => {
                let result = self.bounded(tool, self.run_query(input)).await?;
                Ok(render_rows(result))
            }
        }
    }

    /// Run one tool and return the observation the loop should see.
    ///
    /// Failures come back as `Error: ...` observations. Every call, known
    /// tool or not, is appended to the run's trace.
    pub async fn invoke(&self, run: &mut ToolRun, tool: &str, input: &str) -> String {
        info!(tool = tool, input = input, "Dispatching tool");

        let observation = match self.dispatch(run, tool, input).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = tool, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        };
        let observation = truncate_chars(&observation, self.settings.max_observation_chars);

        run.trace.push(ToolInvocation {
            tool: tool.to_string(),
            input: input.to_string(),
            output: observation.clone(),
        });
        observation
    }
}

/// Splits `a, "b", a` into `[a, b]`
fn parse_table_list(input: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for name in input.split(',') {
        let name = name
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim();
        if !name.is_empty() && !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}

fn render_rows(result: QueryRows) -> String {
    let shown = result.rows.len();
    let rendered = Value::Array(result.rows.into_iter().map(Value::Object).collect()).to_string();
    if result.truncated {
        format!("{}\n(showing first {} rows, more were available)", rendered, shown)
    } else {
        rendered
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... (output truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDatabase;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn tool_set(db: Arc<FakeDatabase>, settings: ToolSettings) -> ToolSet {
        ToolSet::new(db, settings)
    }

    #[tokio::test]
    async fn test_list_tables_observation_and_trace() {
        let tools = tool_set(Arc::new(FakeDatabase::default()), ToolSettings::default());
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, LIST_TABLES, "").await;

        assert_eq!(observation, "departments, employees");
        assert_eq!(
            run.trace(),
            &[ToolInvocation {
                tool: LIST_TABLES.to_string(),
                input: String::new(),
                output: "departments, employees".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_get_schema_is_cached_per_run() {
        let db = Arc::new(FakeDatabase::default());
        let tools = tool_set(db.clone(), ToolSettings::default());
        let mut run = ToolRun::new();

        let first = tools.invoke(&mut run, GET_SCHEMA, "employees, \"employees\"").await;
        let second = tools.invoke(&mut run, GET_SCHEMA, "employees").await;

        assert_eq!(first, second);
        assert!(first.starts_with("CREATE TABLE employees"));
        assert_eq!(db.schema_calls.load(Ordering::SeqCst), 1);

        // A new run starts with an empty cache
        let mut next_run = ToolRun::new();
        tools.invoke(&mut next_run, GET_SCHEMA, "employees").await;
        assert_eq!(db.schema_calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.trace().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table_enumerates_valid_tables() {
        let tools = tool_set(Arc::new(FakeDatabase::default()), ToolSettings::default());
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, GET_SCHEMA, "staff").await;

        assert!(observation.starts_with("Error: Unknown table(s): staff"));
        assert!(observation.contains("Valid tables are: departments, employees"));
        assert_eq!(run.trace().len(), 1);
    }

    #[tokio::test]
    async fn test_get_schema_without_tables() {
        let tools = tool_set(Arc::new(FakeDatabase::default()), ToolSettings::default());
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, GET_SCHEMA, "  ").await;
        assert!(observation.contains("Valid tables are: departments, employees"));
    }

    #[tokio::test]
    async fn test_write_statements_never_reach_the_database() {
        let db = Arc::new(FakeDatabase::default());
        let tools = tool_set(db.clone(), ToolSettings::default());
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, RUN_QUERY, "DELETE FROM employees").await;
        assert!(observation.starts_with("Error: Statement rejected"));

        let observation = tools
            .invoke(&mut run, VALIDATE_QUERY, "SELECT 1; DROP TABLE employees")
            .await;
        assert!(observation.starts_with("Error: Statement rejected"));

        assert!(db.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_and_run_query() {
        let tools = tool_set(Arc::new(FakeDatabase::default()), ToolSettings::default());
        let mut run = ToolRun::new();

        assert_eq!(
            tools.invoke(&mut run, VALIDATE_QUERY, "SELECT name FROM employees").await,
            "The query is valid."
        );
        assert_eq!(
            tools.invoke(&mut run, VALIDATE_QUERY, "SELECT nope FROM employees").await,
            "Error: no such column: nope"
        );

        let rows = tools.invoke(&mut run, RUN_QUERY, "SELECT name, id FROM employees").await;
        assert_eq!(
            rows,
            r#"[{"name":"person 0","id":0},{"name":"person 1","id":1},{"name":"person 2","id":2}]"#
        );
        assert_eq!(run.trace().len(), 3);
    }

    #[tokio::test]
    async fn test_result_rows_are_capped() {
        let settings = ToolSettings {
            max_result_rows: 2,
            ..ToolSettings::default()
        };
        let tools = tool_set(Arc::new(FakeDatabase::default()), settings);
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, RUN_QUERY, "SELECT name FROM employees").await;
        assert!(observation.ends_with("(showing first 2 rows, more were available)"));
        assert!(!observation.contains("person 2"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recorded() {
        let tools = tool_set(Arc::new(FakeDatabase::default()), ToolSettings::default());
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, "drop_everything", "now").await;

        assert_eq!(
            observation,
            "Error: Unknown tool 'drop_everything'. Valid tools are: list_tables, get_schema, validate_query, run_query"
        );
        assert_eq!(run.trace()[0].tool, "drop_everything");
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_observation() {
        let db = Arc::new(FakeDatabase {
            delay: Some(Duration::from_millis(200)),
            ..FakeDatabase::default()
        });
        let settings = ToolSettings {
            timeout: Duration::from_millis(20),
            ..ToolSettings::default()
        };
        let tools = tool_set(db, settings);
        let mut run = ToolRun::new();

        let observation = tools.invoke(&mut run, LIST_TABLES, "").await;
        assert!(observation.starts_with("Error: Tool 'list_tables' timed out"));
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(
            parse_table_list(" employees, 'departments',employees ,, `x` "),
            vec!["employees", "departments", "x"]
        );
        assert!(parse_table_list("").is_empty());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé\n... (output truncated)");
    }
}
