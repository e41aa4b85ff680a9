use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Statement};
use serde_json::{Number, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use roster_core::config::DatabaseConfig;

use crate::backend::Database;
use crate::errors::{DatabaseError, DbResult};
use crate::schema::{ColumnInfo, QueryRows, Row, SchemaDescriptor};

/// Virtual machine instructions between two interrupt checks
const PROGRESS_CHECK_OPS: i32 = 1000;

/// SQLite-backed database capability.
///
/// Each call opens a fresh read-only connection on a blocking thread, so
/// the struct itself is just configuration and is cheap to share.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
    sample_rows: usize,
    busy_timeout: Duration,
    query_timeout: Duration,
}

/// Flags the blocking statement to stop when the awaiting future goes away
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl SqliteDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            path: path.into(),
            sample_rows: defaults.sample_rows,
            busy_timeout: Duration::from_millis(defaults.busy_timeout_ms),
            query_timeout: defaults.query_timeout(),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            path: config.path.clone(),
            sample_rows: config.sample_rows,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            query_timeout: config.query_timeout(),
        }
    }

    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Runs `f` against a new read-only connection on the blocking pool.
    ///
    /// The statement is interrupted once `query_timeout` has passed or the
    /// returned future is dropped, so an abandoned query frees its thread.
    async fn with_connection<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let query_timeout = self.query_timeout;
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel = CancelOnDrop(cancelled.clone());

        tokio::task::spawn_blocking(move || {
            let conn = open_read_only(&path, busy_timeout)?;
            let started = Instant::now();
            let deadline = started.checked_add(query_timeout);
            conn.progress_handler(
                PROGRESS_CHECK_OPS,
                Some(move || {
                    cancelled.load(Ordering::Relaxed)
                        || deadline.is_some_and(|d| Instant::now() >= d)
                }),
            );

            match f(&conn) {
                Err(DatabaseError::Interrupted { .. }) => {
                    let elapsed = started.elapsed();
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "Query interrupted");
                    Err(DatabaseError::Interrupted { elapsed })
                }
                other => other,
            }
        })
        .await?
    }
}

fn open_read_only(path: &PathBuf, busy_timeout: Duration) -> DbResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| {
        DatabaseError::BackendUnavailable(format!("Failed to open {}: {}", path.display(), e))
    })?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| DatabaseError::BackendUnavailable(e.to_string()))?;
    Ok(conn)
}

fn list_tables_on(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn describe_table(conn: &Connection, table: &str, sample_rows: usize) -> DbResult<SchemaDescriptor> {
    let create_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE name = ?1",
            [table],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let sample_rows = if sample_rows == 0 {
        Vec::new()
    } else {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(table),
            sample_rows
        ))?;
        collect_rows(&mut stmt, sample_rows)?.rows
    };

    Ok(SchemaDescriptor {
        table: table.to_string(),
        columns,
        create_sql,
        sample_rows,
    })
}

/// Prepares `sql`, refusing anything SQLite reports as writing
fn prepare_read_only<'c>(conn: &'c Connection, sql: &str) -> DbResult<Statement<'c>> {
    let stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(DatabaseError::StatementRejected(
            "the statement would modify the database".to_string(),
        ));
    }
    Ok(stmt)
}

/// Result column names, with repeats suffixed `_1`, `_2`, ... so that
/// `SELECT e.name, m.name` keeps both values.
fn unique_column_names(stmt: &Statement<'_>) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(stmt.column_count());
    for name in stmt.column_names() {
        let mut candidate = name.to_string();
        let mut suffix = 1;
        while names.contains(&candidate) {
            candidate = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        names.push(candidate);
    }
    names
}

/// Reads up to `max_rows` rows, stepping one row further to learn
/// whether the result was cut off.
fn collect_rows(stmt: &mut Statement<'_>, max_rows: usize) -> DbResult<QueryRows> {
    let names = unique_column_names(stmt);
    let mut rows = stmt.query([])?;
    let mut out = QueryRows::default();
    while let Some(row) = rows.next()? {
        if out.rows.len() == max_rows {
            out.truncated = true;
            break;
        }
        let mut map = Row::new();
        for (idx, name) in names.iter().enumerate() {
            map.insert(name.clone(), value_to_json(row.get_ref(idx)?));
        }
        out.rows.push(map);
    }
    Ok(out)
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn list_tables(&self) -> DbResult<Vec<String>> {
        self.with_connection(list_tables_on).await
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn table_schemas(&self, tables: &[String]) -> DbResult<Vec<SchemaDescriptor>> {
        let requested = tables.to_vec();
        let sample_rows = self.sample_rows;
        self.with_connection(move |conn| {
            let known = list_tables_on(conn)?;
            let unknown: Vec<String> = requested
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

            requested
                .iter()
                .map(|table| describe_table(conn, table, sample_rows))
                .collect()
        })
        .await
    }

    async fn validate(&self, sql: &str) -> DbResult<()> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            // Preparing compiles and plans the statement without running it
            prepare_read_only(conn, &sql)?;
            Ok(())
        })
        .await
    }

    async fn execute(&self, sql: &str, max_rows: usize) -> DbResult<QueryRows> {
        let sql = sql.to_string();
        let result = self
            .with_connection(move |conn| {
                let mut stmt = prepare_read_only(conn, &sql)?;
                collect_rows(&mut stmt, max_rows)
            })
            .await?;
        debug!(rows = result.rows.len(), truncated = result.truncated, "Query executed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded_db() -> (TempDir, SqliteDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE employees (id INTEGER PRIMARY KEY, name TEXT NOT NULL, department TEXT NOT NULL, salary REAL);
             CREATE TABLE departments (name TEXT PRIMARY KEY, floor INTEGER);
             INSERT INTO employees (name, department, salary) VALUES
                ('Ada Lovelace', 'Engineering', 120000.5),
                ('Grace Hopper', 'Engineering', NULL),
                ('Mary Jackson', 'Research', 99000.0);
             INSERT INTO departments VALUES ('Engineering', 3), ('Research', 5);",
        )
        .unwrap();
        (dir, SqliteDatabase::new(path))
    }

    #[tokio::test]
    async fn test_list_tables_sorted() {
        let (_dir, db) = seeded_db();
        assert_eq!(db.list_tables().await.unwrap(), vec!["departments", "employees"]);
    }

    #[tokio::test]
    async fn test_schema_with_sample_rows() {
        let (_dir, db) = seeded_db();
        let schemas = db.table_schemas(&["employees".to_string()]).await.unwrap();
        assert_eq!(schemas.len(), 1);

        let employees = &schemas[0];
        let columns: Vec<&str> = employees.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "name", "department", "salary"]);
        assert_eq!(employees.columns[3].declared_type, "REAL");
        assert_eq!(employees.sample_rows.len(), 2);
        assert!(employees.create_sql.as_deref().unwrap().starts_with("CREATE TABLE employees"));
        assert!(employees.render().contains("2 rows from employees table:"));
    }

    #[tokio::test]
    async fn test_unknown_table_lists_valid_tables() {
        let (_dir, db) = seeded_db();
        let err = db
            .table_schemas(&["employees".to_string(), "staff".to_string()])
            .await
            .unwrap_err();

        match &err {
            DatabaseError::UnknownTable { requested, known } => {
                assert_eq!(requested, &vec!["staff".to_string()]);
                assert_eq!(known, &vec!["departments".to_string(), "employees".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("Valid tables are: departments, employees"));
    }

    const COUNT_FOREVER: &str =
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT x FROM n";

    #[tokio::test]
    async fn test_execute_keeps_row_and_column_order() {
        let (_dir, db) = seeded_db();
        let result = db
            .execute("SELECT name, salary FROM employees WHERE department = 'Engineering' ORDER BY id", 10)
            .await
            .unwrap();

        assert!(!result.truncated);
        assert_eq!(
            serde_json::to_value(&result.rows).unwrap(),
            json!([
                {"name": "Ada Lovelace", "salary": 120000.5},
                {"name": "Grace Hopper", "salary": null}
            ])
        );
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["name", "salary"]);
    }

    #[tokio::test]
    async fn test_repeated_column_names_keep_every_value() {
        let (_dir, db) = seeded_db();
        let result = db
            .execute(
                "SELECT e.name, d.name, d.floor FROM employees e \
                 JOIN departments d ON d.name = e.department WHERE e.id = 3",
                10,
            )
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&result.rows).unwrap(),
            json!([{"name": "Mary Jackson", "name_1": "Research", "floor": 5}])
        );
    }

    #[tokio::test]
    async fn test_execute_stops_at_row_limit() {
        let (_dir, db) = seeded_db();

        let result = db.execute("SELECT name FROM employees ORDER BY id", 2).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);

        // Would never finish without the limit
        let result = db.execute(COUNT_FOREVER, 5).await.unwrap();
        assert_eq!(result.rows.len(), 5);
        assert!(result.truncated);
        assert_eq!(result.rows[4]["x"], json!(5));
    }

    #[tokio::test]
    async fn test_long_query_is_interrupted_at_deadline() {
        let (_dir, db) = seeded_db();
        let db = db.with_query_timeout(Duration::from_millis(100));

        let err = db
            .execute(&format!("SELECT count(*) AS n FROM ({COUNT_FOREVER})"), 1)
            .await
            .unwrap_err();
        match err {
            DatabaseError::Interrupted { elapsed } => assert!(elapsed >= Duration::from_millis(100)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_query_frees_its_blocking_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (_dir, db) = seeded_db();
            let db = db.with_query_timeout(Duration::from_secs(3600));

            let abandoned = tokio::time::timeout(
                Duration::from_millis(100),
                db.execute(&format!("SELECT count(*) AS n FROM ({COUNT_FOREVER})"), 1),
            )
            .await;
            assert!(abandoned.is_err());

            // Only one blocking thread exists, so this waits on the abandoned query
            let tables = tokio::time::timeout(Duration::from_secs(10), db.list_tables())
                .await
                .expect("blocking thread was released")
                .unwrap();
            assert_eq!(tables, vec!["departments", "employees"]);
        });
    }

    #[tokio::test]
    async fn test_backend_message_is_verbatim() {
        let (_dir, db) = seeded_db();
        let err = db.execute("SELECT nope FROM employees", 10).await.unwrap_err();
        match err {
            DatabaseError::QueryExecution(message) => assert!(message.contains("no such column: nope")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(db.validate("SELECT name FROM employees").await.is_ok());
        assert!(matches!(
            db.validate("SELECT name FROM staff").await,
            Err(DatabaseError::QueryExecution(_))
        ));
    }

    #[tokio::test]
    async fn test_writing_statements_are_refused_after_prepare() {
        let (_dir, db) = seeded_db();
        for sql in [
            "DELETE FROM employees",
            "WITH x AS (SELECT 1) DELETE FROM employees",
        ] {
            assert!(matches!(
                db.execute(sql, 10).await,
                Err(DatabaseError::StatementRejected(_))
            ));
            assert!(matches!(
                db.validate(sql).await,
                Err(DatabaseError::StatementRejected(_))
            ));
        }

        let result = db.execute("SELECT COUNT(*) AS n FROM employees", 10).await.unwrap();
        assert_eq!(result.rows[0]["n"], json!(3));
    }

    #[tokio::test]
    async fn test_missing_file_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::new(dir.path().join("absent.db"));
        assert!(matches!(
            db.list_tables().await,
            Err(DatabaseError::BackendUnavailable(_))
        ));
    }
}
