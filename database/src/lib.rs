// The roster-db crate provides the database capability consumed by the agent:
// listing tables, describing them, and validating or running read queries.

pub mod backend;
pub mod bootstrap;
pub mod errors;
pub mod guard;
pub mod schema;
mod sqlite;

pub use backend::{Database, DatabaseRef};
pub use errors::{DatabaseError, DbResult};
pub use guard::ensure_read_only;
pub use schema::{ColumnInfo, QueryRows, Row, SchemaDescriptor};
pub use sqlite::SqliteDatabase;
