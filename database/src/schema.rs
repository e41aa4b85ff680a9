use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row, keyed by column name in select order
pub type Row = Map<String, Value>;

/// Rows returned by one query, cut off at the caller's row limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub rows: Vec<Row>,
    /// More rows were available past the limit
    pub truncated: bool,
}

/// A column as declared in the table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// Read-only description of one table, as shown to the reasoning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    /// Original `CREATE TABLE` text when the backend keeps it
    pub create_sql: Option<String>,
    pub sample_rows: Vec<Row>,
}

impl SchemaDescriptor {
    /// Renders the table definition followed by a comment block of sample rows.
    pub fn render(&self) -> String {
        let mut out = match &self.create_sql {
            Some(sql) => sql.trim().to_string(),
            None => self.synthesized_create(),
        };

        if self.sample_rows.is_empty() {
            return out;
        }

        out.push_str(&format!(
            "\n\n/*\n{} rows from {} table:\n",
            self.sample_rows.len(),
            self.table
        ));
        let header: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        out.push_str(&header.join("\t"));
        out.push('\n');
        for row in &self.sample_rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| row.get(&c.name).map(render_cell).unwrap_or_default())
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out.push_str("*/");
        out
    }

    fn synthesized_create(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\t{} {}", c.name, c.declared_type).trim_end().to_string())
            .collect();
        format!("CREATE TABLE {} (\n{}\n)", self.table, columns.join(",\n"))
    }
}

/// Plain-text form of a cell value; strings are not quoted
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
