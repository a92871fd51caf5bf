//! RunStore: persisted process runs and their breakpoints.
//!
//! This is the half of run state a human touches from outside: the CLI reads
//! runs, writes breakpoint resolutions, and requests cancellation here, while
//! a suspended runner polls the same records. Dual storage as everywhere
//! else: JSONL source of truth, SQLite index.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};

use crate::error::{CadenceError, Result};
use crate::store::records::{BreakpointRecord, Resolution, RunRecord, RunStatus};

/// RunStore manages run and breakpoint records.
pub struct RunStore {
    /// Base directory for this store
    base_dir: PathBuf,

    /// Path to the runs JSONL file
    runs_jsonl: PathBuf,

    /// Path to the breakpoints JSONL file
    breakpoints_jsonl: PathBuf,

    /// SQLite connection for queries
    db: Connection,
}

impl RunStore {
    /// Open or create a RunStore at the specified directory.
    ///
    /// Files live under `<base_dir>/.runstore/`.
    pub fn open_at(base_dir: &Path) -> Result<Self> {
        let store_dir = base_dir.join(".runstore");
        fs::create_dir_all(&store_dir)
            .map_err(|e| CadenceError::Storage(format!("Failed to create store directory {}: {}", store_dir.display(), e)))?;

        let runs_jsonl = store_dir.join("runs.jsonl");
        let breakpoints_jsonl = store_dir.join("breakpoints.jsonl");
        let db_path = store_dir.join("runs.db");

        let db = Connection::open(&db_path)
            .map_err(|e| CadenceError::Storage(format!("Failed to open SQLite database {}: {}", db_path.display(), e)))?;

        Self::init_schema(&db)?;

        let mut store = Self {
            base_dir: base_dir.to_path_buf(),
            runs_jsonl,
            breakpoints_jsonl,
            db,
        };

        store.rebuild_index_if_needed()?;

        Ok(store)
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                process TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);

            CREATE TABLE IF NOT EXISTS breakpoints (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_breakpoints_run ON breakpoints(run_id);
            CREATE INDEX IF NOT EXISTS idx_breakpoints_status ON breakpoints(status);
            "#,
        )?;

        Ok(())
    }

    /// Rebuild the SQLite index from the JSONL files if needed.
    fn rebuild_index_if_needed(&mut self) -> Result<()> {
        let runs_lines = Self::count_lines(&self.runs_jsonl)?;
        let bps_lines = Self::count_lines(&self.breakpoints_jsonl)?;
        if runs_lines == 0 && bps_lines == 0 {
            return Ok(());
        }

        let run_count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap_or(0);
        let bp_count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM breakpoints", [], |row| row.get(0))
            .unwrap_or(0);

        if runs_lines as i64 > run_count || bps_lines as i64 > bp_count || (run_count == 0 && runs_lines > 0) {
            self.rebuild_index()?;
        }

        Ok(())
    }

    fn count_lines(path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(reader.lines().count())
    }

    /// Rebuild both tables from their JSONL files; last entry per id wins.
    fn rebuild_index(&mut self) -> Result<()> {
        self.db.execute("DELETE FROM runs", [])?;
        self.db.execute("DELETE FROM breakpoints", [])?;

        let mut runs: HashMap<String, RunRecord> = HashMap::new();
        if self.runs_jsonl.exists() {
            let reader = BufReader::new(File::open(&self.runs_jsonl)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: RunRecord = serde_json::from_str(&line)?;
                runs.insert(record.run_id.clone(), record);
            }
        }

        let mut breakpoints: HashMap<String, BreakpointRecord> = HashMap::new();
        if self.breakpoints_jsonl.exists() {
            let reader = BufReader::new(File::open(&self.breakpoints_jsonl)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: BreakpointRecord = serde_json::from_str(&line)?;
                breakpoints.insert(record.id.clone(), record);
            }
        }

        let tx = self.db.transaction()?;
        for record in runs.values() {
            Self::insert_run_into_db(&tx, record)?;
        }
        for record in breakpoints.values() {
            Self::insert_breakpoint_into_db(&tx, record)?;
        }
        tx.commit()?;

        Ok(())
    }

    fn insert_run_into_db(db: &Connection, record: &RunRecord) -> Result<()> {
        let json_data = serde_json::to_string(record)?;

        db.execute(
            r#"
            INSERT OR REPLACE INTO runs
            (run_id, process, status, started_at, updated_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.run_id,
                record.process,
                record.status.as_str(),
                record.started_at,
                record.updated_at,
                json_data,
            ],
        )?;

        Ok(())
    }

    fn insert_breakpoint_into_db(db: &Connection, record: &BreakpointRecord) -> Result<()> {
        let json_data = serde_json::to_string(record)?;

        db.execute(
            r#"
            INSERT OR REPLACE INTO breakpoints
            (id, run_id, status, created_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.id,
                record.run_id,
                record.status_str(),
                record.created_at,
                json_data,
            ],
        )?;

        Ok(())
    }

    /// Save or update a run record.
    pub fn save_run(&mut self, record: &RunRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.runs_jsonl)?;
        writeln!(file, "{}", json)?;

        Self::insert_run_into_db(&self.db, record)?;

        Ok(())
    }

    /// Get a run record by id.
    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let result = self
            .db
            .query_row("SELECT json_data FROM runs WHERE run_id = ?1", [run_id], |row| {
                let json: String = row.get(0)?;
                Ok(json)
            });

        match result {
            Ok(json) => {
                let record: RunRecord = serde_json::from_str(&json)?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all runs, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let mut stmt = self.db.prepare("SELECT json_data FROM runs ORDER BY started_at")?;
        let rows = stmt.query_map([], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            let record: RunRecord = serde_json::from_str(&json)?;
            records.push(record);
        }

        Ok(records)
    }

    /// List runs by status.
    pub fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<RunRecord>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM runs WHERE status = ?1 ORDER BY started_at")?;
        let rows = stmt.query_map([status.as_str()], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            let record: RunRecord = serde_json::from_str(&json)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Request external cancellation of a run.
    ///
    /// The runner observes the status flip at its next step or loop-iteration
    /// boundary; in-flight agent calls are not force-aborted.
    pub fn request_cancel(&mut self, run_id: &str) -> Result<RunRecord> {
        let mut record = self
            .get_run(run_id)?
            .ok_or_else(|| CadenceError::RunNotFound(run_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(CadenceError::InvalidState(format!(
                "cannot cancel run {} in terminal status {}",
                run_id, record.status
            )));
        }

        record.finish(RunStatus::Cancelled, Some("cancelled externally".to_string()));
        self.save_run(&record)?;
        Ok(record)
    }

    /// Save or update a breakpoint record.
    pub fn save_breakpoint(&mut self, record: &BreakpointRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.breakpoints_jsonl)?;
        writeln!(file, "{}", json)?;

        Self::insert_breakpoint_into_db(&self.db, record)?;

        Ok(())
    }

    /// Get a breakpoint record by id.
    pub fn get_breakpoint(&self, id: &str) -> Result<Option<BreakpointRecord>> {
        let result = self
            .db
            .query_row("SELECT json_data FROM breakpoints WHERE id = ?1", [id], |row| {
                let json: String = row.get(0)?;
                Ok(json)
            });

        match result {
            Ok(json) => {
                let record: BreakpointRecord = serde_json::from_str(&json)?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a pending breakpoint exactly once.
    pub fn resolve_breakpoint(&mut self, id: &str, resolution: Resolution) -> Result<BreakpointRecord> {
        let mut record = self
            .get_breakpoint(id)?
            .ok_or_else(|| CadenceError::BreakpointNotFound(id.to_string()))?;

        if !record.resolve(resolution) {
            return Err(CadenceError::InvalidState(format!(
                "breakpoint {} is already resolved",
                id
            )));
        }

        self.save_breakpoint(&record)?;
        Ok(record)
    }

    /// List breakpoints for a run, oldest first.
    pub fn list_breakpoints_for_run(&self, run_id: &str) -> Result<Vec<BreakpointRecord>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM breakpoints WHERE run_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map([run_id], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            let record: BreakpointRecord = serde_json::from_str(&json)?;
            records.push(record);
        }

        Ok(records)
    }

    /// List all pending breakpoints across runs.
    pub fn list_pending_breakpoints(&self) -> Result<Vec<BreakpointRecord>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM breakpoints WHERE status = 'pending' ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            let record: BreakpointRecord = serde_json::from_str(&json)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Get the base directory for this store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
