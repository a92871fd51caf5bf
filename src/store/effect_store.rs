//! EffectStore: the durable, idempotent record of task invocations.
//!
//! Every task call is keyed by a deterministic effect id. A resumed run
//! replays Succeeded effects from here instead of re-invoking the agent; a
//! Succeeded record is immutable, and re-recording one with a different
//! payload is the resumption-integrity violation `DuplicateEffect`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde_json::Value;

use crate::error::{CadenceError, Result};
use crate::store::records::{EffectRecord, EffectStatus};

/// Outcome of starting an invocation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// A Succeeded record exists; the output is replayed without re-invoking.
    Cached(Value),
    /// A fresh Pending record was written; the caller must invoke the agent.
    Fresh,
}

/// EffectStore manages effect records with JSONL persistence and SQLite indexing.
pub struct EffectStore {
    /// Base directory for this store
    base_dir: PathBuf,

    /// Path to the JSONL file
    jsonl_path: PathBuf,

    /// SQLite connection for queries
    db: Connection,
}

impl EffectStore {
    /// Open or create an EffectStore at the specified directory.
    ///
    /// Files live under `<base_dir>/.effectstore/`.
    pub fn open_at(base_dir: &Path) -> Result<Self> {
        let store_dir = base_dir.join(".effectstore");
        fs::create_dir_all(&store_dir)
            .map_err(|e| CadenceError::Storage(format!("Failed to create store directory {}: {}", store_dir.display(), e)))?;

        let jsonl_path = store_dir.join("effects.jsonl");
        let db_path = store_dir.join("effects.db");

        let db = Connection::open(&db_path)
            .map_err(|e| CadenceError::Storage(format!("Failed to open SQLite database {}: {}", db_path.display(), e)))?;

        Self::init_schema(&db)?;

        let mut store = Self {
            base_dir: base_dir.to_path_buf(),
            jsonl_path,
            db,
        };

        store.rebuild_index_if_needed()?;

        Ok(store)
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS effects (
                effect_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_effects_run ON effects(run_id);
            CREATE INDEX IF NOT EXISTS idx_effects_status ON effects(status);
            "#,
        )?;

        Ok(())
    }

    /// Rebuild the SQLite index from the JSONL file if needed.
    fn rebuild_index_if_needed(&mut self) -> Result<()> {
        if !self.jsonl_path.exists() {
            return Ok(());
        }

        let jsonl_lines = self.count_jsonl_lines()?;
        let db_count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM effects", [], |row| row.get(0))
            .unwrap_or(0);

        // If the JSONL has entries the index doesn't, the index is stale
        if jsonl_lines as i64 > db_count || db_count == 0 {
            self.rebuild_index()?;
        }

        Ok(())
    }

    /// Count lines in the JSONL file.
    fn count_jsonl_lines(&self) -> Result<usize> {
        let file = File::open(&self.jsonl_path)?;
        let reader = BufReader::new(file);
        Ok(reader.lines().count())
    }

    /// Rebuild the entire SQLite index from the JSONL file.
    ///
    /// The JSONL is append-only, so the last entry per effect id wins.
    fn rebuild_index(&mut self) -> Result<()> {
        self.db.execute("DELETE FROM effects", [])?;

        if !self.jsonl_path.exists() {
            return Ok(());
        }

        let file = File::open(&self.jsonl_path)?;
        let reader = BufReader::new(file);

        let mut records: HashMap<String, EffectRecord> = HashMap::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record: EffectRecord = serde_json::from_str(&line)?;
            records.insert(record.effect_id.clone(), record);
        }

        let tx = self.db.transaction()?;
        for record in records.values() {
            Self::insert_record_into_db(&tx, record)?;
        }
        tx.commit()?;

        Ok(())
    }

    /// Insert a record into the SQLite database.
    fn insert_record_into_db(db: &Connection, record: &EffectRecord) -> Result<()> {
        let json_data = serde_json::to_string(record)?;

        db.execute(
            r#"
            INSERT OR REPLACE INTO effects
            (effect_id, run_id, task_name, status, started_at, completed_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.effect_id,
                record.run_id,
                record.task_name,
                record.status.as_str(),
                record.started_at,
                record.completed_at,
                json_data,
            ],
        )?;

        Ok(())
    }

    /// Append to JSONL and update the index, without the duplicate guard.
    fn write(&mut self, record: &EffectRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.jsonl_path)?;
        writeln!(file, "{}", json)?;

        Self::insert_record_into_db(&self.db, record)?;

        Ok(())
    }

    /// Record an effect, guarding resumption integrity.
    ///
    /// If a terminal record already exists for this id, the new record must
    /// match it on status, output, and error; anything else means a replayed
    /// effect produced a different result and fails with `DuplicateEffect`.
    /// An exact match is an idempotent no-op.
    pub fn put(&mut self, record: &EffectRecord) -> Result<()> {
        if let Some(existing) = self.get(&record.effect_id)? {
            if existing.status.is_terminal() {
                let matches = existing.status == record.status
                    && existing.output == record.output
                    && existing.error == record.error;
                if matches {
                    return Ok(());
                }
                return Err(CadenceError::DuplicateEffect(record.effect_id.clone()));
            }
        }

        self.write(record)
    }

    /// Start an invocation attempt for a deterministic effect id.
    ///
    /// - Succeeded record: replay the cached output, write nothing.
    /// - Pending record: a crash interrupted the previous attempt; supersede it.
    /// - Failed record: the caller is resuming past a failure; supersede it.
    /// - No record: fresh attempt.
    pub fn begin(
        &mut self,
        effect_id: &str,
        run_id: &str,
        task_name: &str,
        input: &Value,
    ) -> Result<BeginOutcome> {
        if let Some(existing) = self.get(effect_id)? {
            if existing.status == EffectStatus::Succeeded {
                let output = existing.output.ok_or_else(|| {
                    CadenceError::Storage(format!("Succeeded effect {} has no output", effect_id))
                })?;
                return Ok(BeginOutcome::Cached(output));
            }
            tracing::debug!(effect_id = %effect_id, status = %existing.status, "Superseding stale effect attempt");
        }

        let record = EffectRecord::pending(effect_id, run_id, task_name, input.clone());
        self.write(&record)?;
        Ok(BeginOutcome::Fresh)
    }

    /// Transition a Pending effect to Succeeded with its validated output.
    pub fn complete(&mut self, effect_id: &str, output: Value) -> Result<EffectRecord> {
        let record = self
            .get(effect_id)?
            .ok_or_else(|| CadenceError::Storage(format!("No effect record for {}", effect_id)))?;

        let done = record.succeeded(output);
        self.put(&done)?;
        Ok(done)
    }

    /// Transition a Pending effect to Failed with the error description.
    pub fn fail(&mut self, effect_id: &str, error: &str) -> Result<EffectRecord> {
        let record = self
            .get(effect_id)?
            .ok_or_else(|| CadenceError::Storage(format!("No effect record for {}", effect_id)))?;

        let failed = record.failed(error);
        self.put(&failed)?;
        Ok(failed)
    }

    /// Get an effect record by id.
    pub fn get(&self, effect_id: &str) -> Result<Option<EffectRecord>> {
        let result = self
            .db
            .query_row("SELECT json_data FROM effects WHERE effect_id = ?1", [effect_id], |row| {
                let json: String = row.get(0)?;
                Ok(json)
            });

        match result {
            Ok(json) => {
                let record: EffectRecord = serde_json::from_str(&json)?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all effects for a run, in invocation order.
    pub fn list_for_run(&self, run_id: &str) -> Result<Vec<EffectRecord>> {
        let mut stmt = self
            .db
            .prepare("SELECT json_data FROM effects WHERE run_id = ?1 ORDER BY started_at")?;
        let rows = stmt.query_map([run_id], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            let record: EffectRecord = serde_json::from_str(&json)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Count a run's effects by status.
    pub fn count_by_status(&self, run_id: &str, status: EffectStatus) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM effects WHERE run_id = ?1 AND status = ?2",
            params![run_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get the base directory for this store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_temp_store() -> (EffectStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EffectStore::open_at(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_open_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let _store = EffectStore::open_at(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join(".effectstore").exists());
        assert!(temp_dir.path().join(".effectstore/effects.db").exists());
    }

    #[test]
    fn test_begin_fresh_then_complete() {
        let (mut store, _temp) = create_temp_store();

        let outcome = store
            .begin("run-1:s0", "run-1", "generate", &json!({"topic": "x"}))
            .unwrap();
        assert_eq!(outcome, BeginOutcome::Fresh);

        let record = store.get("run-1:s0").unwrap().unwrap();
        assert_eq!(record.status, EffectStatus::Pending);
        assert_eq!(record.input["topic"], "x");

        let done = store.complete("run-1:s0", json!({"draft": "d"})).unwrap();
        assert_eq!(done.status, EffectStatus::Succeeded);

        let reloaded = store.get("run-1:s0").unwrap().unwrap();
        assert_eq!(reloaded.output, Some(json!({"draft": "d"})));
    }

    #[test]
    fn test_begin_replays_succeeded_output() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        store.complete("run-1:s0", json!({"draft": "cached"})).unwrap();

        let outcome = store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        assert_eq!(outcome, BeginOutcome::Cached(json!({"draft": "cached"})));
    }

    #[test]
    fn test_begin_supersedes_failed_record() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        store.fail("run-1:s0", "agent timeout").unwrap();

        // Resuming past a failure starts a fresh attempt
        let outcome = store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        assert_eq!(outcome, BeginOutcome::Fresh);

        let record = store.get("run-1:s0").unwrap().unwrap();
        assert_eq!(record.status, EffectStatus::Pending);
    }

    #[test]
    fn test_begin_supersedes_stale_pending_record() {
        let (mut store, _temp) = create_temp_store();

        // Simulates a crash mid-call: Pending record left behind
        store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();

        let outcome = store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        assert_eq!(outcome, BeginOutcome::Fresh);
    }

    #[test]
    fn test_put_duplicate_mismatch_rejected() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        store.complete("run-1:s0", json!({"draft": "a"})).unwrap();

        // A replayed effect producing a different output corrupts resumption
        let divergent = store
            .get("run-1:s0")
            .unwrap()
            .unwrap()
            .succeeded(json!({"draft": "b"}));
        let err = store.put(&divergent).unwrap_err();
        assert!(matches!(err, CadenceError::DuplicateEffect(_)));

        // Stored output is untouched
        let record = store.get("run-1:s0").unwrap().unwrap();
        assert_eq!(record.output, Some(json!({"draft": "a"})));
    }

    #[test]
    fn test_put_exact_match_is_idempotent() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
        let done = store.complete("run-1:s0", json!({"draft": "a"})).unwrap();

        // Re-putting the identical terminal record is a no-op
        assert!(store.put(&done).is_ok());
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp) = create_temp_store();
        let result = store.get("nonexistent").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s1", "run-1", "score", &json!({})).unwrap();
        let failed = store.fail("run-1:s1", "missing required field 'score'").unwrap();

        assert_eq!(failed.status, EffectStatus::Failed);
        assert!(failed.error.unwrap().contains("score"));
        assert_eq!(store.count_by_status("run-1", EffectStatus::Failed).unwrap(), 1);
    }

    #[test]
    fn test_list_for_run_scopes_by_run() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "a", &json!({})).unwrap();
        store.begin("run-1:s1", "run-1", "b", &json!({})).unwrap();
        store.begin("run-2:s0", "run-2", "a", &json!({})).unwrap();

        let effects = store.list_for_run("run-1").unwrap();
        assert_eq!(effects.len(), 2);
        assert!(effects.iter().all(|e| e.run_id == "run-1"));
    }

    #[test]
    fn test_count_by_status() {
        let (mut store, _temp) = create_temp_store();

        store.begin("run-1:s0", "run-1", "a", &json!({})).unwrap();
        store.complete("run-1:s0", json!({})).unwrap();
        store.begin("run-1:s1", "run-1", "b", &json!({})).unwrap();

        assert_eq!(store.count_by_status("run-1", EffectStatus::Succeeded).unwrap(), 1);
        assert_eq!(store.count_by_status("run-1", EffectStatus::Pending).unwrap(), 1);
        assert_eq!(store.count_by_status("run-1", EffectStatus::Failed).unwrap(), 0);
    }

    #[test]
    fn test_jsonl_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut store = EffectStore::open_at(temp_dir.path()).unwrap();
            store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
            store.complete("run-1:s0", json!({"draft": "persisted"})).unwrap();
        }

        {
            let mut store = EffectStore::open_at(temp_dir.path()).unwrap();
            let outcome = store.begin("run-1:s0", "run-1", "generate", &json!({})).unwrap();
            assert_eq!(outcome, BeginOutcome::Cached(json!({"draft": "persisted"})));
        }
    }

    #[test]
    fn test_rebuild_index_from_jsonl() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut store = EffectStore::open_at(temp_dir.path()).unwrap();
            store.begin("run-1:s0", "run-1", "a", &json!({})).unwrap();
            store.complete("run-1:s0", json!({"n": 1})).unwrap();
            store.begin("run-1:s1", "run-1", "b", &json!({})).unwrap();
        }

        // Delete the SQLite file to force rebuild
        let db_path = temp_dir.path().join(".effectstore/effects.db");
        fs::remove_file(&db_path).unwrap();

        {
            let store = EffectStore::open_at(temp_dir.path()).unwrap();
            let effects = store.list_for_run("run-1").unwrap();
            assert_eq!(effects.len(), 2);

            // Last entry per id wins: s0 is Succeeded, not Pending
            let s0 = store.get("run-1:s0").unwrap().unwrap();
            assert_eq!(s0.status, EffectStatus::Succeeded);
        }
    }
}
