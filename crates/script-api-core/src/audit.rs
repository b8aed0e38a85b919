// script-api-core/src/audit.rs
// ============================================================================
// Module: Run Audit
// Description: Structured lifecycle events for the Run Manager.
// Purpose: Give deployments a dependency-light observability seam without a
//          hard logging-crate dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The Run Manager never writes ad-hoc log lines. Every state transition it
//! makes is expressed as a [`RunAuditEvent`] and handed to a [`RunAuditSink`],
//! so a deployment can route events to stderr, a metrics backend, or nowhere
//! at all without the core depending on any of those concretely.

use std::io::Write;

use serde::Serialize;

use crate::run::RunStatus;
use crate::run_id::RunId;

/// Kind of lifecycle event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAuditKind {
    /// A run was successfully spawned.
    Started,
    /// A run failed to spawn.
    SpawnFailed,
    /// A run reached a terminal status.
    Terminal,
    /// A stop was requested for a run.
    StopRequested,
    /// A run was adopted during startup reconciliation.
    Reconciled,
}

/// A single structured Run Manager lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct RunAuditEvent {
    /// Event kind.
    pub kind: RunAuditKind,
    /// The run this event concerns.
    pub run_id: RunId,
    /// The script path involved.
    pub script: String,
    /// Status at the time of the event, if applicable.
    pub status: Option<RunStatus>,
    /// A short human-readable detail (error text, signal sent, etc.).
    pub detail: Option<String>,
}

/// Sink for [`RunAuditEvent`]s.
pub trait RunAuditSink: Send + Sync {
    /// Records an event. Must not panic or block meaningfully; sinks are
    /// called from inside the Run Manager's hot paths.
    fn record(&self, event: &RunAuditEvent);
}

/// Sink that writes one JSON line per event to stderr.
pub struct StderrRunAuditSink;

impl RunAuditSink for StderrRunAuditSink {
    fn record(&self, event: &RunAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that discards every event; used in unit tests.
pub struct NoopRunAuditSink;

impl RunAuditSink for NoopRunAuditSink {
    fn record(&self, _event: &RunAuditEvent) {}
}
