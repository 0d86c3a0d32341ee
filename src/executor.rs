use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// The materialized output of one query: column names plus every row
/// rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.as_deref().unwrap_or("NULL").len();
                if i < widths.len() && len > widths[i] {
                    widths[i] = len;
                }
            }
        }

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:<width$}", col, width = widths[i])?;
        }
        writeln!(f)?;

        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, " | ")?;
                }
                let text = cell.as_deref().unwrap_or("NULL");
                write!(f, "{:<width$}", text, width = widths.get(i).copied().unwrap_or(0))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Rows present in only one of two result sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RowDiff {
    pub only_left: Vec<Vec<Option<String>>>,
    pub only_right: Vec<Vec<Option<String>>>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}

/// Executes rewritten queries against a SQLite database file.
pub struct QueryExecutor {
    conn: Connection,
}

impl QueryExecutor {
    /// Open a SQLite database file.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            anyhow::bail!("Database file not found: {}", path.display());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Run a query and materialize every row as text. SQLite values map to
    /// strings the obvious way; blobs are hex-encoded and NULL stays None.
    pub fn execute(&self, sql: &str) -> Result<ResultSet> {
        debug!("Executing SQL: {}", sql);
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = stmt.column_count();

        let mapped = stmt.query_map([], |row| {
            let mut row_data = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: Option<String> = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => None,
                    rusqlite::types::ValueRef::Integer(i) => Some(i.to_string()),
                    rusqlite::types::ValueRef::Real(f) => Some(f.to_string()),
                    rusqlite::types::ValueRef::Text(s) => {
                        Some(String::from_utf8_lossy(s).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Some(hex::encode(b)),
                };
                row_data.push(value);
            }
            Ok(row_data)
        })?;

        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row?);
        }

        debug!("Query returned {} rows", rows.len());
        Ok(ResultSet { columns, rows })
    }
}

/// Multiset comparison of two result sets: a row appearing N times on one
/// side and M times on the other contributes |N - M| entries to the diff.
/// Column-name agreement is the caller's concern.
pub fn diff_result_sets(left: &ResultSet, right: &ResultSet) -> RowDiff {
    RowDiff {
        only_left: rows_missing_from(&left.rows, &right.rows),
        only_right: rows_missing_from(&right.rows, &left.rows),
    }
}

fn rows_missing_from(
    rows: &[Vec<Option<String>>],
    other: &[Vec<Option<String>>],
) -> Vec<Vec<Option<String>>> {
    let mut budget: HashMap<&[Option<String>], usize> = HashMap::new();
    for row in other {
        *budget.entry(row.as_slice()).or_default() += 1;
    }

    let mut missing = Vec::new();
    for row in rows {
        match budget.get_mut(row.as_slice()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => missing.push(row.clone()),
        }
    }
    missing
}
