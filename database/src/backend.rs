use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::DbResult;
use crate::schema::{QueryRows, SchemaDescriptor};

/// Introspectable, queryable relational store used by the tool set.
///
/// Implementations must not keep per-call state: every call opens its own
/// logical session, so one instance can be shared by concurrent runs.
#[async_trait]
pub trait Database: Send + Sync + Debug {
    /// Names of the user tables, sorted
    async fn list_tables(&self) -> DbResult<Vec<String>>;

    /// Descriptors for the requested tables, in request order.
    /// Fails with `UnknownTable` listing the valid names if any is unknown.
    async fn table_schemas(&self, tables: &[String]) -> DbResult<Vec<SchemaDescriptor>>;

    /// Compiles `sql` without executing it. Fails with `StatementRejected`
    /// when the compiled statement would write.
    async fn validate(&self, sql: &str) -> DbResult<()>;

    /// Executes `sql` and returns at most `max_rows` result rows in order.
    /// Dropping the returned future stops the statement.
    async fn execute(&self, sql: &str, max_rows: usize) -> DbResult<QueryRows>;
}

/// Type alias for Arc-wrapped Database trait objects
pub type DatabaseRef = Arc<dyn Database>;
