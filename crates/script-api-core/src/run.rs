// script-api-core/src/run.rs
// ============================================================================
// Module: Run Record
// Description: The durable, serializable unit the Run Manager tracks.
// Purpose: Represent a single script execution attempt and its lifecycle.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A `RunRecord` is created by `start` and mutated only by the Run Manager:
//! the spawn path, the watcher, the stop path, and the startup reconciler.
//! Ephemeral fields (the child handle, open log file handles) never leave
//! the manager's in-memory registry; they are not part of this type.

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::run_id::RunId;

/// Lifecycle status of a run.
///
/// # Invariants
/// - `Succeeded | Failed | Stopped | Terminated` are the only terminal
///   statuses; a record in one of them always has `finished_at` set.
/// - `Terminated` is reserved for adopted orphans whose exit code was never
///   observed by this process; it is distinct from `Stopped`/`Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Spawn has been requested but the child has not yet been observed running.
    Starting,
    /// The child is alive and under direct supervision.
    Running,
    /// A stop has been requested; awaiting grace-period exit or SIGKILL.
    Stopping,
    /// The child exited cleanly (exit code 0) without an intervening stop.
    Succeeded,
    /// The child exited with a non-zero code without an intervening stop.
    Failed,
    /// The child exited as a direct result of a stop request.
    Stopped,
    /// The process is no longer alive but was not reaped by this process
    /// (an adopted orphan after restart, or an unreachable liveness probe).
    Terminated,
}

impl RunStatus {
    /// Returns true for the three statuses considered "active" for queries
    /// and duplicate detection.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Returns true for any of the four terminal statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// The unit the Run Manager tracks: one execution attempt of one script.
///
/// # Invariants
/// 1. `status` terminal ⇒ `finished_at` is set and the child is not alive.
/// 2. `status == Starting` ⇒ `pid` is `None` and `started_at` is `None`.
/// 3. `status == Running` ⇒ `pid` is `Some` and `started_at` is `Some` and
///    `return_code` is `None`.
/// 4. `return_code` is `Some` ⇒ the child has been reaped at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Opaque unique identifier for this run.
    pub run_id: RunId,
    /// The relative script path as requested by the caller.
    pub script: String,
    /// The exact command vector used to launch the child. `argv[2]` is the
    /// canonical resolved-script key used for duplicate detection.
    pub argv: Vec<String>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// OS process id once spawned.
    pub pid: Option<u32>,
    /// Child exit code once reaped.
    pub return_code: Option<i32>,
    /// RFC 3339 UTC timestamp of record creation.
    pub created_at: String,
    /// RFC 3339 UTC timestamp set on successful spawn.
    pub started_at: Option<String>,
    /// RFC 3339 UTC timestamp set on any terminal transition.
    pub finished_at: Option<String>,
    /// Absolute path to the captured stdout log.
    pub stdout_path: String,
    /// Absolute path to the captured stderr log.
    pub stderr_path: String,
    /// Human-readable last error, accumulated with a newline separator.
    pub error: Option<String>,
}

impl RunRecord {
    /// Appends a line to `error`, separating from any existing content with
    /// a newline (used by reconciliation to annotate adopted records).
    pub fn push_error(&mut self, line: impl AsRef<str>) {
        match &mut self.error {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(line.as_ref());
            }
            None => self.error = Some(line.as_ref().to_string()),
        }
    }
}

/// Returns the current time as an RFC 3339 UTC timestamp string.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string())
}
