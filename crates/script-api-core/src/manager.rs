// script-api-core/src/manager.rs
// ============================================================================
// Module: Run Manager
// Description: Child-process lifecycle, durable mirror, and concurrency.
// Purpose: Own every state transition a run can make: spawn, watch/reap,
//          stop, and startup reconciliation.
// Dependencies: tokio, nix, crate::{run, run_id, store, audit, process}
// ============================================================================

//! ## Overview
//! A single registry mutex guards all in-memory mutation of the run map.
//! It is released across I/O (spawn, wait, signal syscalls) — every code
//! path that resumes after an `await` re-checks status under the lock
//! before mutating, so a racing `stop` and `watch` can never both claim to
//! be the writer of a terminal status. The child handle itself is owned
//! exclusively by the watcher task spawned at start time, not by the
//! registry; `stop` never takes it, it only signals the process and then
//! waits on a `watch` channel the watcher publishes the final record to,
//! so the watcher stays the only writer of a terminal status for runs this
//! process spawned directly.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::fs::File;
use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::io::SeekFrom;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::audit::RunAuditEvent;
use crate::audit::RunAuditKind;
use crate::audit::RunAuditSink;
use crate::process;
use crate::run::RunRecord;
use crate::run::RunStatus;
use crate::run::now_rfc3339;
use crate::run_id::RunId;
use crate::store::RunStore;
use crate::store::SharedRunStore;
use crate::store::StoreError;

/// Which log stream(s) a caller wants tailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// Standard output only.
    Stdout,
    /// Standard error only.
    Stderr,
    /// Both streams.
    Both,
}

/// Errors raised by the Run Manager itself (not recorded on a run).
///
/// These are reserved for failures the manager cannot attribute to a
/// specific run — durable-store I/O during construction, or a poisoned
/// in-process lock. Spawn and wait failures are recorded on the
/// [`RunRecord`] instead, per the "the run exists, here is its state"
/// contract.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The durable store failed.
    #[error("run store error: {0}")]
    Store(#[from] StoreError),
    /// The in-process registry lock was poisoned.
    #[error("run registry lock poisoned")]
    LockPoisoned,
}

struct ManagedRun {
    record: RunRecord,
    /// Set only for runs whose child this process spawned directly; `stop`
    /// clones it to wait for the watcher's final record instead of
    /// touching the child itself. `None` for adopted orphans reconciled
    /// from the durable store, which have no live handle in this process.
    done_rx: Option<watch::Receiver<Option<RunRecord>>>,
}

/// Fixed settings the Run Manager needs at construction.
#[derive(Debug, Clone)]
pub struct RunManagerConfig {
    /// Root directory scripts are launched from by default.
    pub scripts_root: PathBuf,
    /// Directory stdout/stderr log files are written under.
    pub logs_dir: PathBuf,
    /// Interpreter binary used to launch scripts (`argv[0]`).
    pub interpreter: String,
    /// Grace window between SIGTERM and SIGKILL in the stop protocol.
    pub terminate_timeout: Duration,
}

/// Owns child-process lifecycle and its durable mirror.
pub struct RunManager {
    config: RunManagerConfig,
    registry: Mutex<HashMap<RunId, ManagedRun>>,
    store: SharedRunStore,
    audit: Arc<dyn RunAuditSink>,
}

impl RunManager {
    /// Constructs a Run Manager, reconciling in-flight runs from the
    /// durable store against the live process table.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] if the durable store cannot be read.
    pub async fn new(
        config: RunManagerConfig,
        store: SharedRunStore,
        audit: Arc<dyn RunAuditSink>,
    ) -> Result<Arc<Self>, ManagerError> {
        let persisted = store.load_all()?;
        let manager = Arc::new(Self {
            config,
            registry: Mutex::new(HashMap::new()),
            store,
            audit,
        });

        {
            let mut guard = manager.registry.lock().await;
            for record in persisted {
                guard.insert(record.run_id, ManagedRun { record, done_rx: None });
            }
        }

        manager.clone().reconcile_active().await?;
        Ok(manager)
    }

    async fn reconcile_active(self: Arc<Self>) -> Result<(), ManagerError> {
        let active: Vec<(RunId, Option<u32>)> = {
            let guard = self.registry.lock().await;
            guard
                .values()
                .filter(|m| m.record.status.is_active())
                .map(|m| (m.record.run_id, m.record.pid))
                .collect()
        };

        for (run_id, pid) in active {
            match pid {
                Some(pid) if process::is_alive(pid) => {
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move { manager.poll_orphan(run_id, pid).await });
                }
                _ => {
                    self.mark_terminated_unreachable(run_id, "Server restarted and process not found")
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn mark_terminated_unreachable(&self, run_id: RunId, reason: &str) -> Result<(), ManagerError> {
        let record = {
            let mut guard = self.registry.lock().await;
            let Some(managed) = guard.get_mut(&run_id) else {
                return Ok(());
            };
            if managed.record.status.is_terminal() {
                return Ok(());
            }
            managed.record.status = RunStatus::Terminated;
            if managed.record.finished_at.is_none() {
                managed.record.finished_at = Some(now_rfc3339());
            }
            managed.record.push_error(reason);
            managed.record.clone()
        };
        self.store.save(&record)?;
        self.audit.record(&RunAuditEvent {
            kind: RunAuditKind::Reconciled,
            run_id,
            script: record.script.clone(),
            status: Some(record.status),
            detail: Some(reason.to_string()),
        });
        Ok(())
    }

    async fn poll_orphan(self: Arc<Self>, run_id: RunId, pid: u32) {
        loop {
            sleep(Duration::from_millis(1_000)).await;
            if !process::is_alive(pid) {
                let _ = self.mark_terminated_unreachable(run_id, "adopted process exited").await;
                return;
            }
            let still_tracked = {
                let guard = self.registry.lock().await;
                guard.get(&run_id).is_some_and(|m| m.record.status.is_active())
            };
            if !still_tracked {
                return;
            }
        }
    }

    /// Starts a new run.
    ///
    /// Takes `manager` as an explicit `&Arc<Self>` (rather than as a
    /// receiver) because a successful spawn hands an owned clone of the
    /// `Arc` to the `'static` watcher task it spawns.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] only for durable-store failures; a failed
    /// spawn is recorded on the returned [`RunRecord`] instead.
    pub async fn start(
        manager: &Arc<Self>,
        script: &str,
        absolute_script_path: &Path,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
        cwd: Option<PathBuf>,
    ) -> Result<RunRecord, ManagerError> {
        tokio::fs::create_dir_all(&manager.config.logs_dir)
            .await
            .map_err(|e| ManagerError::Store(StoreError::Io(e.to_string())))?;

        let run_id = RunId::new();
        let mut argv = vec![manager.config.interpreter.clone(), "-u".to_string()];
        argv.push(absolute_script_path.to_string_lossy().to_string());
        argv.extend(args);

        let stdout_path = manager.config.logs_dir.join(format!("{run_id}.stdout.log"));
        let stderr_path = manager.config.logs_dir.join(format!("{run_id}.stderr.log"));

        let mut record = RunRecord {
            run_id,
            script: script.to_string(),
            argv: argv.clone(),
            status: RunStatus::Starting,
            pid: None,
            return_code: None,
            created_at: now_rfc3339(),
            started_at: None,
            finished_at: None,
            stdout_path: stdout_path.to_string_lossy().to_string(),
            stderr_path: stderr_path.to_string_lossy().to_string(),
            error: None,
        };

        {
            let mut guard = manager.registry.lock().await;
            guard.insert(
                run_id,
                ManagedRun {
                    record: record.clone(),
                    done_rx: None,
                },
            );
        }
        manager.store.save(&record)?;

        let run_cwd = cwd.unwrap_or_else(|| manager.config.scripts_root.clone());

        let stdout_file = open_append(&stdout_path).await;
        let stderr_file = open_append(&stderr_path).await;
        let (stdout_file, stderr_file) = match (stdout_file, stderr_file) {
            (Ok(o), Ok(e)) => (o, e),
            (Err(e), _) | (_, Err(e)) => {
                manager.finish_spawn_failure(run_id, &mut record, e.to_string()).await?;
                return Ok(record);
            }
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&run_cwd)
            .stdin(Stdio::null())
            .stdout(stdout_file.into_std().await)
            .stderr(stderr_file.into_std().await);
        if let Some(env) = env {
            cmd.envs(env);
        }
        cmd.env("PYTHONUNBUFFERED", "1");
        process::set_new_process_group(&mut cmd);

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                record.pid = pid;
                record.status = RunStatus::Running;
                record.started_at = Some(now_rfc3339());

                let (done_tx, done_rx) = watch::channel(None);
                let still_registered = {
                    let mut guard = manager.registry.lock().await;
                    match guard.get_mut(&run_id) {
                        Some(managed) => {
                            managed.record = record.clone();
                            managed.done_rx = Some(done_rx);
                            true
                        }
                        None => false,
                    }
                };
                if !still_registered {
                    let _ = child.start_kill();
                    return Ok(record);
                }

                manager.store.save(&record)?;
                manager.audit.record(&RunAuditEvent {
                    kind: RunAuditKind::Started,
                    run_id,
                    script: record.script.clone(),
                    status: Some(record.status),
                    detail: record.pid.map(|p| p.to_string()),
                });

                let watcher = Arc::clone(manager);
                tokio::spawn(async move { watcher.watch(run_id, child, done_tx).await });
                Ok(record)
            }
            Err(e) => {
                manager.finish_spawn_failure(run_id, &mut record, e.to_string()).await?;
                Ok(record)
            }
        }
    }

    async fn finish_spawn_failure(
        &self,
        run_id: RunId,
        record: &mut RunRecord,
        reason: String,
    ) -> Result<(), ManagerError> {
        record.status = RunStatus::Failed;
        record.error = Some(reason.clone());
        record.finished_at = Some(now_rfc3339());
        {
            let mut guard = self.registry.lock().await;
            if let Some(managed) = guard.get_mut(&run_id) {
                managed.record = record.clone();
            }
        }
        self.store.save(record)?;
        self.audit.record(&RunAuditEvent {
            kind: RunAuditKind::SpawnFailed,
            run_id,
            script: record.script.clone(),
            status: Some(record.status),
            detail: Some(reason),
        });
        Ok(())
    }

    async fn watch(self: Arc<Self>, run_id: RunId, mut child: Child, done_tx: watch::Sender<Option<RunRecord>>) {
        let wait_result = child.wait().await;

        let record = {
            let mut guard = self.registry.lock().await;
            let Some(managed) = guard.get_mut(&run_id) else {
                return;
            };
            match wait_result {
                Ok(status) => {
                    managed.record.return_code = status.code();
                    managed.record.finished_at = Some(now_rfc3339());
                    managed.record.status = match managed.record.status {
                        RunStatus::Stopping | RunStatus::Stopped => RunStatus::Stopped,
                        _ if status.success() => RunStatus::Succeeded,
                        _ => RunStatus::Failed,
                    };
                }
                Err(e) => {
                    managed.record.status = RunStatus::Failed;
                    managed.record.push_error(e.to_string());
                    managed.record.finished_at = Some(now_rfc3339());
                }
            }
            managed.record.clone()
        };

        let _ = self.store.save(&record);
        self.audit.record(&RunAuditEvent {
            kind: RunAuditKind::Terminal,
            run_id,
            script: record.script.clone(),
            status: Some(record.status),
            detail: record.return_code.map(|c| c.to_string()),
        });
        let _ = done_tx.send(Some(record));
    }

    /// Requests that a run stop: SIGTERM the process group, wait the grace
    /// window, then SIGKILL if still alive.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] only for durable-store failures.
    pub async fn stop(&self, run_id: RunId) -> Result<Option<RunRecord>, ManagerError> {
        let (record, pid, done_rx) = {
            let mut guard = self.registry.lock().await;
            let Some(managed) = guard.get_mut(&run_id) else {
                return Ok(None);
            };
            if !matches!(managed.record.status, RunStatus::Running | RunStatus::Starting) {
                return Ok(Some(managed.record.clone()));
            }
            managed.record.status = RunStatus::Stopping;
            (managed.record.clone(), managed.record.pid, managed.done_rx.clone())
        };
        self.store.save(&record)?;
        self.audit.record(&RunAuditEvent {
            kind: RunAuditKind::StopRequested,
            run_id,
            script: record.script.clone(),
            status: Some(RunStatus::Stopping),
            detail: None,
        });

        let Some(pid) = pid else {
            return Ok(Some(record));
        };

        if let Err(e) = process::signal_group(pid, Signal::SIGTERM) {
            let mut guard = self.registry.lock().await;
            if let Some(managed) = guard.get_mut(&run_id) {
                managed.record.status = RunStatus::Failed;
                managed.record.push_error(e.to_string());
                let updated = managed.record.clone();
                drop(guard);
                self.store.save(&updated)?;
                return Ok(Some(updated));
            }
            return Ok(Some(record));
        }

        match done_rx {
            Some(done_rx) => Ok(self.await_grace_then_kill(pid, done_rx).await),
            None => self.poll_until_dead_then_finalize(run_id, pid).await,
        }
    }

    /// Waits for the watcher to publish the reaped record, escalating to
    /// `SIGKILL` if it has not done so within the grace window. The watcher
    /// remains the sole writer of the terminal record; this only observes it.
    async fn await_grace_then_kill(
        &self,
        pid: u32,
        mut done_rx: watch::Receiver<Option<RunRecord>>,
    ) -> Option<RunRecord> {
        if let Some(record) = done_rx.borrow().clone() {
            return Some(record);
        }
        match timeout(self.config.terminate_timeout, done_rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return None,
            Err(_) => {
                let _ = process::signal_group(pid, Signal::SIGKILL);
                let _ = done_rx.changed().await;
            }
        }
        done_rx.borrow().clone()
    }

    async fn poll_until_dead_then_finalize(
        &self,
        run_id: RunId,
        pid: u32,
    ) -> Result<Option<RunRecord>, ManagerError> {
        let grace = self.config.terminate_timeout;
        let mut waited = Duration::ZERO;
        let mut killed = false;

        while process::is_alive(pid) {
            if !killed && waited >= grace {
                let _ = process::signal_group(pid, Signal::SIGKILL);
                killed = true;
            }
            sleep(Duration::from_millis(100)).await;
            waited += Duration::from_millis(100);
        }

        let record = {
            let mut guard = self.registry.lock().await;
            let Some(managed) = guard.get_mut(&run_id) else {
                return Ok(None);
            };
            if managed.record.status.is_terminal() {
                return Ok(Some(managed.record.clone()));
            }
            managed.record.status = RunStatus::Stopped;
            managed.record.finished_at = Some(now_rfc3339());
            managed.record.clone()
        };
        self.store.save(&record)?;
        Ok(Some(record))
    }

    /// Returns every run known to the manager, in unspecified order.
    pub async fn list_all(&self) -> Vec<RunRecord> {
        self.registry.lock().await.values().map(|m| m.record.clone()).collect()
    }

    /// Returns every run whose status is active.
    pub async fn list_active(&self) -> Vec<RunRecord> {
        self.registry
            .lock()
            .await
            .values()
            .filter(|m| m.record.status.is_active())
            .map(|m| m.record.clone())
            .collect()
    }

    /// Looks up a single run by id.
    pub async fn get(&self, run_id: RunId) -> Option<RunRecord> {
        self.registry.lock().await.get(&run_id).map(|m| m.record.clone())
    }

    /// Reads a byte-bounded tail of the requested log stream(s).
    pub async fn read_logs(&self, run_id: RunId, stream: LogStream, tail_bytes: u64) -> Option<HashMap<String, String>> {
        let record = self.get(run_id).await?;
        let mut out = HashMap::new();
        if matches!(stream, LogStream::Stdout | LogStream::Both) {
            out.insert("stdout".to_string(), tail_text_file(Path::new(&record.stdout_path), tail_bytes).await);
        }
        if matches!(stream, LogStream::Stderr | LogStream::Both) {
            out.insert("stderr".to_string(), tail_text_file(Path::new(&record.stderr_path), tail_bytes).await);
        }
        Some(out)
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn tail_text_file(path: &Path, tail_bytes: u64) -> String {
    let Ok(mut file) = File::open(path).await else {
        return String::new();
    };
    let Ok(metadata) = file.metadata().await else {
        return String::new();
    };
    let size = metadata.len();
    if tail_bytes > 0 {
        let start = size.saturating_sub(tail_bytes);
        if file.seek(SeekFrom::Start(start)).await.is_err() {
            return String::new();
        }
    } else {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).await.is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopRunAuditSink;
    use crate::store::InMemoryRunStore;

    async fn test_manager(terminate_timeout: Duration) -> (Arc<RunManager>, tempfile::TempDir, tempfile::TempDir) {
        let scripts_root = tempfile::tempdir().unwrap();
        let logs_dir = tempfile::tempdir().unwrap();
        let config = RunManagerConfig {
            scripts_root: scripts_root.path().to_path_buf(),
            logs_dir: logs_dir.path().to_path_buf(),
            interpreter: "python3".to_string(),
            terminate_timeout,
        };
        let store = SharedRunStore::from_store(InMemoryRunStore::new());
        let manager = RunManager::new(config, store, Arc::new(NoopRunAuditSink)).await.unwrap();
        (manager, scripts_root, logs_dir)
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn start_marks_a_clean_exit_succeeded() {
        let (manager, scripts_root, _logs_dir) = test_manager(Duration::from_secs(1)).await;
        let script = write_script(scripts_root.path(), "ok.py", "print('fine')\n");

        let record = RunManager::start(&manager, "ok.py", &script, vec![], None, None).await.unwrap();
        assert_eq!(record.status, RunStatus::Running);

        for _ in 0..50 {
            if manager.get(record.run_id).await.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let finished = manager.get(record.run_id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.return_code, Some(0));
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn start_marks_a_nonzero_exit_failed() {
        let (manager, scripts_root, _logs_dir) = test_manager(Duration::from_secs(1)).await;
        let script = write_script(scripts_root.path(), "bad.py", "import sys\nsys.exit(3)\n");

        let record = RunManager::start(&manager, "bad.py", &script, vec![], None, None).await.unwrap();

        for _ in 0..50 {
            if manager.get(record.run_id).await.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let finished = manager.get(record.run_id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Failed);
        assert_eq!(finished.return_code, Some(3));
    }

    #[tokio::test]
    async fn stop_transitions_a_running_script_to_stopped() {
        let (manager, scripts_root, _logs_dir) = test_manager(Duration::from_millis(500)).await;
        let script = write_script(scripts_root.path(), "loop.py", "import time\nwhile True:\n    time.sleep(0.1)\n");

        let record = RunManager::start(&manager, "loop.py", &script, vec![], None, None).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let stopped = manager.stop(record.run_id).await.unwrap().unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);
        assert!(stopped.finished_at.is_some());
    }

    #[tokio::test]
    async fn stop_on_an_already_terminal_run_is_a_no_op() {
        let (manager, scripts_root, _logs_dir) = test_manager(Duration::from_secs(1)).await;
        let script = write_script(scripts_root.path(), "ok.py", "print('fine')\n");

        let record = RunManager::start(&manager, "ok.py", &script, vec![], None, None).await.unwrap();
        for _ in 0..50 {
            if manager.get(record.run_id).await.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let before = manager.get(record.run_id).await.unwrap();
        let after = manager.stop(record.run_id).await.unwrap().unwrap();
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn stop_on_an_unknown_run_id_returns_none() {
        let (manager, _scripts_root, _logs_dir) = test_manager(Duration::from_secs(1)).await;
        assert!(manager.stop(RunId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_runs() {
        let (manager, scripts_root, _logs_dir) = test_manager(Duration::from_secs(1)).await;
        let done = write_script(scripts_root.path(), "ok.py", "print('fine')\n");
        let loop_script = write_script(scripts_root.path(), "loop.py", "import time\nwhile True:\n    time.sleep(0.1)\n");

        let finished_record = RunManager::start(&manager, "ok.py", &done, vec![], None, None).await.unwrap();
        let active_record = RunManager::start(&manager, "loop.py", &loop_script, vec![], None, None).await.unwrap();

        for _ in 0..50 {
            if manager.get(finished_record.run_id).await.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let active = manager.list_active().await;
        assert!(active.iter().any(|r| r.run_id == active_record.run_id));
        assert!(active.iter().all(|r| r.run_id != finished_record.run_id));

        manager.stop(active_record.run_id).await.unwrap();
    }
}
