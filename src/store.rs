//! Analysis history in SQLite.
//!
//! One row per completed analysis in `document_analyses`. List fields are
//! stored as JSON text. Rows are only removed by [`AnalysisStore::delete_all`],
//! which hands back the blob keys of the removed rows so the caller can purge
//! the blob store.

use crate::document::AnalysisResult;
use crate::error::ExplainError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// A row to insert.
#[derive(Debug, Clone)]
pub struct NewAnalysis<'a> {
    pub filename: &'a str,
    pub uploaded_at: DateTime<Utc>,
    pub analysis: &'a AnalysisResult,
    pub storage_key: Option<&'a str>,
    pub storage_enabled: bool,
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAnalysis {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub analysis: AnalysisResult,
    pub storage_key: Option<String>,
    pub storage_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub count: usize,
    /// Non-null blob keys of the deleted rows.
    pub storage_keys: Vec<String>,
}

pub trait AnalysisStore: Send + Sync {
    /// Insert one analysis and return its id.
    fn save(&self, record: &NewAnalysis<'_>) -> Result<i64, ExplainError>;

    /// Every stored analysis, newest first.
    fn list_all(&self) -> Result<Vec<StoredAnalysis>, ExplainError>;

    fn count(&self) -> Result<usize, ExplainError> {
        Ok(self.list_all()?.len())
    }

    fn delete_all(&self) -> Result<DeleteSummary, ExplainError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS document_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    upload_timestamp TEXT NOT NULL,
    summary TEXT,
    important_points TEXT,
    deadlines TEXT,
    obligations TEXT,
    risks TEXT,
    recommended_next_steps TEXT,
    action_items TEXT,
    confidence TEXT,
    storage_key TEXT,
    storage_enabled INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_analyses_uploaded
    ON document_analyses(upload_timestamp);
";

pub struct SqliteAnalysisStore {
    conn: Mutex<Connection>,
}

impl SqliteAnalysisStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExplainError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExplainError::Store(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened analysis store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ExplainError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open from a `sqlite:` URL.
    ///
    /// `sqlite:///relative.db`, `sqlite:////absolute/path.db`, and
    /// `sqlite://` (in-memory) are accepted.
    pub fn from_database_url(url: &str) -> Result<Self, ExplainError> {
        match parse_sqlite_url(url)? {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection) -> Result<Self, ExplainError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ExplainError> {
        self.conn
            .lock()
            .map_err(|_| ExplainError::Store("connection lock poisoned".into()))
    }
}

/// `Some(path)` for a file database, `None` for in-memory.
fn parse_sqlite_url(url: &str) -> Result<Option<&str>, ExplainError> {
    let rest = url.strip_prefix("sqlite://").ok_or_else(|| {
        ExplainError::InvalidConfig(format!(
            "unsupported DATABASE_URL '{}': only sqlite:// URLs are supported",
            url
        ))
    })?;
    match rest {
        "" | "/" | "/:memory:" => Ok(None),
        _ => Ok(Some(rest.strip_prefix('/').unwrap_or(rest))),
    }
}

fn to_json(items: &[String]) -> Result<String, ExplainError> {
    serde_json::to_string(items).map_err(|e| ExplainError::Store(e.to_string()))
}

fn list_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Vec::new()),
        Some(s) => serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredAnalysis> {
    Ok(StoredAnalysis {
        id: row.get(0)?,
        filename: row.get(1)?,
        upload_timestamp: row.get(2)?,
        analysis: AnalysisResult {
            summary: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            important_points: list_column(row, 4)?,
            deadlines: list_column(row, 5)?,
            obligations: list_column(row, 6)?,
            risks: list_column(row, 7)?,
            recommended_next_steps: list_column(row, 8)?,
            action_items: list_column(row, 9)?,
            confidence: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        },
        storage_key: row.get(11)?,
        storage_enabled: row.get(12)?,
    })
}

impl AnalysisStore for SqliteAnalysisStore {
    fn save(&self, record: &NewAnalysis<'_>) -> Result<i64, ExplainError> {
        let a = record.analysis;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO document_analyses (
                filename, upload_timestamp, summary, important_points, deadlines,
                obligations, risks, recommended_next_steps, action_items,
                confidence, storage_key, storage_enabled
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.filename,
                record.uploaded_at,
                a.summary,
                to_json(&a.important_points)?,
                to_json(&a.deadlines)?,
                to_json(&a.obligations)?,
                to_json(&a.risks)?,
                to_json(&a.recommended_next_steps)?,
                to_json(&a.action_items)?,
                a.confidence,
                record.storage_key,
                record.storage_enabled,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Saved analysis of '{}' as #{}", record.filename, id);
        Ok(id)
    }

    fn list_all(&self) -> Result<Vec<StoredAnalysis>, ExplainError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, upload_timestamp, summary, important_points, deadlines,
                    obligations, risks, recommended_next_steps, action_items,
                    confidence, storage_key, storage_enabled
             FROM document_analyses
             ORDER BY upload_timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count(&self) -> Result<usize, ExplainError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM document_analyses", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn delete_all(&self) -> Result<DeleteSummary, ExplainError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let storage_keys = {
            let mut stmt = tx.prepare(
                "SELECT storage_key FROM document_analyses WHERE storage_key IS NOT NULL",
            )?;
            let keys = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            keys
        };
        let count = tx.execute("DELETE FROM document_analyses", [])?;
        tx.commit()?;
        info!("Deleted {} stored analyses", count);
        Ok(DeleteSummary {
            count,
            storage_keys,
        })
    }
}
