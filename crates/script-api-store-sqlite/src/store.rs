// crates/script-api-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunStore backed by SQLite, single non-versioned table.
// Purpose: Persist run records with `INSERT OR REPLACE` upserts.
// Dependencies: script-api-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each mutation to a [`RunRecord`] is followed by a persist: a full-row
//! `INSERT OR REPLACE` keyed by `run_id`. There is no version history table
//! and no integrity hash; the run manager is the only writer and it always
//! overwrites the complete row. Connections are opened short-lived per
//! operation so the OS serializes file-level writes; no pooled connection is
//! required.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use script_api_core::RunId;
use script_api_core::RunRecord;
use script_api_core::RunStatus;
use script_api_core::RunStore;
use script_api_core::RunStoreError;

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout applied to every connection.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for [`SqliteRunStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the database file, e.g. `<state_dir>/runs.db`.
    pub path: PathBuf,
    /// Busy timeout applied to every connection.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Builds a configuration pointing at `path` with the default busy
    /// timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS }
    }
}

/// A durable [`RunStore`] backed by a single `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteRunStore {
    config: SqliteStoreConfig,
}

impl SqliteRunStore {
    /// Opens (creating if necessary) the database at `config.path`, applies
    /// WAL pragmas, and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`RunStoreError`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, RunStoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| RunStoreError::Io(err.to_string()))?;
        }
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { config })
    }

    fn connection(&self) -> Result<Connection, RunStoreError> {
        open_connection(&self.config)
    }
}

impl RunStore for SqliteRunStore {
    fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError> {
        let connection = self.connection()?;
        let row: Option<RunRow> = connection
            .query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| RunRow::from_row(row))
            .optional()
            .map_err(|err| RunStoreError::Store(err.to_string()))?;
        row.map(RunRow::into_record).transpose()
    }

    fn load_all(&self) -> Result<Vec<RunRecord>, RunStoreError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare("SELECT * FROM runs ORDER BY created_at ASC").map_err(|err| RunStoreError::Store(err.to_string()))?;
        let rows = statement
            .query_map(params![], RunRow::from_row)
            .map_err(|err| RunStoreError::Store(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| RunStoreError::Store(err.to_string()))?;
        rows.into_iter().map(RunRow::into_record).collect()
    }

    fn save(&self, record: &RunRecord) -> Result<(), RunStoreError> {
        let connection = self.connection()?;
        let row = RunRow::from_record(record).map_err(|err| RunStoreError::Corrupt(err.to_string()))?;
        connection
            .execute(
                "INSERT OR REPLACE INTO runs (
                    run_id, script, argv, status, pid, return_code,
                    created_at, started_at, finished_at, stdout_path, stderr_path, error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.run_id,
                    row.script,
                    row.argv,
                    row.status,
                    row.pid,
                    row.return_code,
                    row.created_at,
                    row.started_at,
                    row.finished_at,
                    row.stdout_path,
                    row.stderr_path,
                    row.error,
                ],
            )
            .map_err(|err| RunStoreError::Store(err.to_string()))?;
        Ok(())
    }
}

/// Flat row shape mirroring the `runs` table exactly.
struct RunRow {
    run_id: String,
    script: String,
    argv: String,
    status: String,
    pid: Option<i64>,
    return_code: Option<i64>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    stdout_path: String,
    stderr_path: String,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get("run_id")?,
            script: row.get("script")?,
            argv: row.get("argv")?,
            status: row.get("status")?,
            pid: row.get("pid")?,
            return_code: row.get("return_code")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            stdout_path: row.get("stdout_path")?,
            stderr_path: row.get("stderr_path")?,
            error: row.get("error")?,
        })
    }

    fn from_record(record: &RunRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            run_id: record.run_id.as_str(),
            script: record.script.clone(),
            argv: serde_json::to_string(&record.argv)?,
            status: status_to_str(record.status).to_string(),
            pid: record.pid.map(i64::from),
            return_code: record.return_code.map(i64::from),
            created_at: record.created_at.clone(),
            started_at: record.started_at.clone(),
            finished_at: record.finished_at.clone(),
            stdout_path: record.stdout_path.clone(),
            stderr_path: record.stderr_path.clone(),
            error: record.error.clone(),
        })
    }

    fn into_record(self) -> Result<RunRecord, RunStoreError> {
        let run_id = RunId::try_from(self.run_id.as_str()).map_err(|err| RunStoreError::Corrupt(err.to_string()))?;
        let argv: Vec<String> = serde_json::from_str(&self.argv).map_err(|err| RunStoreError::Corrupt(err.to_string()))?;
        let status = str_to_status(&self.status).ok_or_else(|| RunStoreError::Corrupt(format!("unknown run status {:?}", self.status)))?;
        Ok(RunRecord {
            run_id,
            script: self.script,
            argv,
            status,
            pid: self.pid.map(|value| u32::try_from(value).unwrap_or_default()),
            return_code: self.return_code.map(|value| i32::try_from(value).unwrap_or_default()),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            stdout_path: self.stdout_path,
            stderr_path: self.stderr_path,
            error: self.error,
        })
    }
}

fn status_to_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Starting => "starting",
        RunStatus::Running => "running",
        RunStatus::Stopping => "stopping",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
        RunStatus::Stopped => "stopped",
        RunStatus::Terminated => "terminated",
    }
}

fn str_to_status(value: &str) -> Option<RunStatus> {
    Some(match value {
        "starting" => RunStatus::Starting,
        "running" => RunStatus::Running,
        "stopping" => RunStatus::Stopping,
        "succeeded" => RunStatus::Succeeded,
        "failed" => RunStatus::Failed,
        "stopped" => RunStatus::Stopped,
        "terminated" => RunStatus::Terminated,
        _ => return None,
    })
}

/// Opens an `SQLite` connection with WAL pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, RunStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(|err| RunStoreError::Io(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies the `SQLite` pragmas required for durability under concurrent
/// short-lived connections.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), RunStoreError> {
    connection.execute_batch("PRAGMA journal_mode = WAL;").map_err(|err| RunStoreError::Io(err.to_string()))?;
    connection.execute_batch("PRAGMA synchronous = NORMAL;").map_err(|err| RunStoreError::Io(err.to_string()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(|err| RunStoreError::Io(err.to_string()))?;
    Ok(())
}

/// Creates the `runs` table if absent; records the schema version once.
fn initialize_schema(connection: &mut Connection) -> Result<(), RunStoreError> {
    let tx = connection.transaction().map_err(|err| RunStoreError::Io(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);").map_err(|err| RunStoreError::Io(err.to_string()))?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0)).optional().map_err(|err| RunStoreError::Io(err.to_string()))?;
    if version.is_none() {
        tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION]).map_err(|err| RunStoreError::Io(err.to_string()))?;
    }
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            script TEXT NOT NULL,
            argv TEXT NOT NULL,
            status TEXT NOT NULL,
            pid INTEGER,
            return_code INTEGER,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            stdout_path TEXT NOT NULL,
            stderr_path TEXT NOT NULL,
            error TEXT
        );",
    )
    .map_err(|err| RunStoreError::Io(err.to_string()))?;
    tx.commit().map_err(|err| RunStoreError::Io(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RunRecord {
        RunRecord {
            run_id: RunId::new(),
            script: "jobs/nightly.py".to_string(),
            argv: vec!["python3".to_string(), "-u".to_string(), "/scripts/jobs/nightly.py".to_string()],
            status: RunStatus::Running,
            pid: Some(4242),
            return_code: None,
            created_at: "2026-07-28T00:00:00Z".to_string(),
            started_at: Some("2026-07-28T00:00:01Z".to_string()),
            finished_at: None,
            stdout_path: "/state/logs/run.stdout.log".to_string(),
            stderr_path: "/state/logs/run.stderr.log".to_string(),
            error: None,
        }
    }

    #[test]
    fn round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::open(SqliteStoreConfig::new(dir.path().join("runs.db"))).unwrap();
        let record = sample_record();
        store.save(&record).unwrap();
        let loaded = store.load(&record.run_id).unwrap().unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert_eq!(loaded.argv, record.argv);
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.pid, Some(4242));
    }

    #[test]
    fn save_is_an_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::open(SqliteStoreConfig::new(dir.path().join("runs.db"))).unwrap();
        let mut record = sample_record();
        store.save(&record).unwrap();
        record.status = RunStatus::Succeeded;
        record.return_code = Some(0);
        record.finished_at = Some("2026-07-28T00:05:00Z".to_string());
        store.save(&record).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, RunStatus::Succeeded);
        assert_eq!(all[0].return_code, Some(0));
    }

    #[test]
    fn reopening_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("runs.db");
        let record = sample_record();
        {
            let store = SqliteRunStore::open(SqliteStoreConfig::new(db_path.clone())).unwrap();
            store.save(&record).unwrap();
        }
        let reopened = SqliteRunStore::open(SqliteStoreConfig::new(db_path)).unwrap();
        assert_eq!(reopened.load_all().unwrap().len(), 1);
    }

    #[test]
    fn missing_run_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::open(SqliteStoreConfig::new(dir.path().join("runs.db"))).unwrap();
        assert!(store.load(&RunId::new()).unwrap().is_none());
    }
}
