//! Structured-query collaborator over a local SQLite store.
//!
//! The store is opened read-only; its schema is snapshotted once at graph
//! construction. One connection is shared behind a mutex, so concurrent runs
//! execute their queries one at a time.

use crate::core::error::AgentError;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// VM instructions between progress-handler checks.
const PROGRESS_OPS: i32 = 1_000;

/// Outcome of one statement. Execution failures land in `error`, never in `Err`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SqlResult {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub error: Option<String>,
}

pub struct SqliteTool {
    conn: Mutex<Connection>,
    timeout: Duration,
}

pub fn open_read_only(db_path: &Path) -> Result<Connection, AgentError> {
    if !db_path.exists() {
        return Err(AgentError::NotFound(format!(
            "database file {}",
            db_path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

impl SqliteTool {
    pub fn open(db_path: &Path, timeout: Duration) -> Result<Self, AgentError> {
        let conn = open_read_only(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            timeout,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Validation("sqlite connection lock poisoned".to_string()))
    }

    /// User tables and views in catalogue order, internal `sqlite_*` tables excluded.
    pub fn get_tables(&self) -> Result<Vec<String>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tables = Vec::new();
        for name in names {
            tables.push(name?);
        }
        Ok(tables)
    }

    /// Human-readable listing, one `TABLE` line plus one `columns:` line per table.
    pub fn get_schema_str(&self) -> Result<String, AgentError> {
        let tables = self.get_tables()?;
        let conn = self.lock()?;
        let mut parts = Vec::with_capacity(tables.len() * 2);
        for table in &tables {
            parts.push(format!("TABLE {}", table));
            match table_columns(&conn, table) {
                Ok(cols) => parts.push(format!("  columns: {}", cols.join(", "))),
                Err(e) => parts.push(format!("  <error reading schema: {}>", e)),
            }
        }
        Ok(parts.join("\n"))
    }

    /// Execute one statement. The statement is normalized first and the
    /// normalized text is echoed back in the result.
    pub fn run_sql(&self, sql: &str) -> SqlResult {
        let sql = normalize_sql(sql);
        let conn = match self.lock() {
            Ok(conn) => conn,
            Err(e) => {
                return SqlResult {
                    sql,
                    error: Some(e.to_string()),
                    ..SqlResult::default()
                };
            }
        };

        let deadline = Instant::now() + self.timeout;
        if let Err(e) = conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() > deadline)) {
            return SqlResult {
                sql,
                error: Some(format!("failed to install query timeout: {}", e)),
                ..SqlResult::default()
            };
        }
        let outcome = fetch_all(&conn, &sql);
        if let Err(e) = conn.progress_handler(0, None::<fn() -> bool>) {
            tracing::warn!("failed to clear query timeout handler: {}", e);
        }

        match outcome {
            Ok((columns, rows)) => SqlResult {
                sql,
                columns,
                rows,
                error: None,
            },
            Err(e) => SqlResult {
                sql,
                error: Some(sqlite_message(&e)),
                ..SqlResult::default()
            },
        }
    }
}

/// Trim whitespace and end with exactly one `;`.
pub fn normalize_sql(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();
    format!("{};", body)
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let cols = stmt.query_map(params![table], |row| {
        let name: String = row.get(0)?;
        let ty: String = row.get(1)?;
        Ok(format!("{} {}", name, ty))
    })?;
    cols.collect()
}

fn fetch_all(conn: &Connection, sql: &str) -> rusqlite::Result<(Vec<String>, Vec<Vec<Value>>)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut cursor = stmt.query([])?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(cell_to_json(row.get_ref(idx)?));
        }
        rows.push(values);
    }
    Ok((columns, rows))
}

fn cell_to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
    }
}

/// Engine message without the rusqlite wrapper text, when one is available.
fn sqlite_message(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
        other => other.to_string(),
    }
}
