use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database could not be opened or reached
    #[error("Database backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Unknown table(s): {}. Valid tables are: {}", requested.join(", "), known.join(", "))]
    UnknownTable {
        requested: Vec<String>,
        known: Vec<String>,
    },
    /// Backend message, passed through verbatim
    #[error("{0}")]
    QueryExecution(String),
    #[error("Statement rejected: {0}")]
    StatementRejected(String),
    #[error("{table} table is missing columns: {}", missing.join(", "))]
    SchemaMismatch { table: String, missing: Vec<String> },
    /// The statement ran past its deadline or its caller went away
    #[error("Query interrupted after {}ms", elapsed.as_millis())]
    Interrupted { elapsed: std::time::Duration },
    #[error("Database task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(err: tokio::task::JoinError) -> Self {
        DatabaseError::Task(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DatabaseError>;

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            // Elapsed time is filled in by the connection that set the deadline
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                DatabaseError::Interrupted {
                    elapsed: std::time::Duration::ZERO,
                }
            }
            other => DatabaseError::QueryExecution(other.to_string()),
        }
    }
}
