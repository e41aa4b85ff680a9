use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::{DatabaseError, DbResult};

/// Columns the employee roster table must carry
pub const EMPLOYEE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "department",
    "position",
    "email",
    "phone",
    "address",
    "hire_date",
    "date_of_birth",
    "ssn",
    "username",
];

const CREATE_EMPLOYEES: &str = "
    CREATE TABLE IF NOT EXISTS employees (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        department TEXT NOT NULL,
        position TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT NOT NULL,
        address TEXT NOT NULL,
        hire_date TEXT NOT NULL,
        date_of_birth TEXT NOT NULL,
        ssn TEXT NOT NULL,
        username TEXT NOT NULL
    )";

/// Creates the employees table if it is missing and verifies its columns.
///
/// This is the only code path that opens the database writable. Returns the
/// column names found on the table.
pub async fn initialize(path: &Path) -> DbResult<Vec<String>> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || initialize_blocking(&path)).await?
}

fn initialize_blocking(path: &Path) -> DbResult<Vec<String>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DatabaseError::BackendUnavailable(format!(
                "Failed to create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let conn = Connection::open(path).map_err(|e| {
        DatabaseError::BackendUnavailable(format!("Failed to open {}: {}", path.display(), e))
    })?;

    conn.execute_batch(CREATE_EMPLOYEES)?;

    let mut stmt = conn.prepare("PRAGMA table_info(employees)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    info!(columns = ?columns, "Verified employees table schema");

    let missing: Vec<&str> = EMPLOYEE_COLUMNS
        .iter()
        .copied()
        .filter(|expected| !columns.iter().any(|c| c == expected))
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "Employees table is missing columns");
        return Err(DatabaseError::SchemaMismatch {
            table: "employees".to_string(),
            missing: missing.iter().map(|c| c.to_string()).collect(),
        });
    }

    Ok(columns)
}
