// script-api-server/src/audit.rs
// ============================================================================
// Module: HTTP Audit Logging
// Description: Structured audit events for authentication decisions made at
//              the HTTP boundary.
// Purpose: Emit a redacted log line per auth decision without coupling to a
//          specific logging pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Run lifecycle events are audited by [`script_api_core::RunAuditSink`]; this
//! module covers the narrower surface of auth decisions (token accepted or
//! rejected, scope checks, admin-token issuance) so a 401/403 is visible in
//! the log without the run manager needing to know about HTTP concepts.

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

/// Outcome of a single auth decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    /// Auth was disabled; the caller was admitted unconditionally.
    Bypassed,
    /// The caller presented a valid token with sufficient scopes.
    Allowed,
    /// No token, or the token failed to verify.
    Unauthenticated,
    /// A valid token lacked a required scope.
    InsufficientScopes,
    /// The admin token exchange rejected the request.
    AdminExchangeRejected,
    /// The admin token exchange succeeded.
    AdminExchangeIssued,
}

/// A single auth-decision audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuthAuditEvent {
    /// Route the decision was made for.
    pub route: &'static str,
    /// The decision reached.
    pub outcome: AuthOutcome,
    /// Authenticated subject, when known.
    pub subject: Option<String>,
    /// Free-form detail (e.g. which scope was missing).
    pub detail: Option<Value>,
}

/// Sink for [`AuthAuditEvent`]s.
pub trait AuthAuditSink: Send + Sync {
    /// Records an auth-decision audit event.
    fn record(&self, event: &AuthAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuthAuditSink;

impl AuthAuditSink for StderrAuthAuditSink {
    fn record(&self, event: &AuthAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// No-op audit sink.
pub struct NoopAuthAuditSink;

impl AuthAuditSink for NoopAuthAuditSink {
    fn record(&self, _event: &AuthAuditEvent) {}
}
