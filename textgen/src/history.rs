//! Generation history stored in SQLite.
//!
//! Every request handled by the front-end can be recorded together with its
//! parameters and outcome, so past prompts can be listed and searched.

use rusqlite::{params, Connection, Result, Row};
use serde::Serialize;
use std::path::Path;

use crate::params::SamplingParams;

/// One recorded request.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp: String,
    pub prompt: String,
    pub max_steps: i64,
    pub temperature: f64,
    pub top_k: i64,
    pub output: String,
    pub ok: bool,
    pub generated_tokens: i64,
}

impl HistoryEntry {
    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            prompt: row.get(2)?,
            max_steps: row.get(3)?,
            temperature: row.get(4)?,
            top_k: row.get(5)?,
            output: row.get(6)?,
            ok: row.get(7)?,
            generated_tokens: row.get(8)?,
        })
    }
}

const COLUMNS: &str =
    "id, timestamp, prompt, max_steps, temperature, top_k, output, ok, generated_tokens";

/// SQLite-backed log of generation requests.
pub struct GenerationLog {
    conn: Connection,
}

impl GenerationLog {
    /// Open (and create if needed) the log at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    /// A log that lives only as long as the value.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS generations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                prompt TEXT NOT NULL,
                max_steps INTEGER NOT NULL,
                temperature REAL NOT NULL,
                top_k INTEGER NOT NULL,
                output TEXT NOT NULL,
                ok INTEGER NOT NULL,
                generated_tokens INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Store one request. `output` is the generated text or the error message.
    pub fn record(
        &self,
        prompt: &str,
        sampling: &SamplingParams,
        output: &str,
        ok: bool,
        generated_tokens: usize,
    ) -> Result<i64> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO generations
                (timestamp, prompt, max_steps, temperature, top_k, output, ok, generated_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                timestamp,
                prompt,
                sampling.max_steps as i64,
                sampling.temperature as f64,
                sampling.top_k as i64,
                output,
                ok,
                generated_tokens as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM generations ORDER BY id DESC LIMIT ?1"
        ))?;
        let mut entries = stmt
            .query_map([limit as i64], HistoryEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    pub fn count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM generations", [], |row| row.get(0))
    }

    /// Entries whose prompt or output contains `query`, newest first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM generations
             WHERE prompt LIKE ?1 OR output LIKE ?1
             ORDER BY id DESC
             LIMIT ?2"
        ))?;
        let pattern = format!("%{}%", query);
        let entries = stmt
            .query_map(params![pattern, limit as i64], HistoryEntry::from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM generations", [])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let (total_entries, failed_entries, generated_tokens) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN ok THEN 0 ELSE 1 END), 0),
                    COALESCE(SUM(generated_tokens), 0)
             FROM generations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let db_size_bytes = self
            .conn
            .path()
            .filter(|p| !AsRef::<Path>::as_ref(p).as_os_str().is_empty())
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(HistoryStats {
            total_entries,
            failed_entries,
            generated_tokens,
            db_size_bytes,
        })
    }
}

/// Summary of the log.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub total_entries: i64,
    pub failed_entries: i64,
    pub generated_tokens: i64,
    pub db_size_bytes: u64,
}
