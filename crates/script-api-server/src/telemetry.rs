// script-api-server/src/telemetry.rs
// ============================================================================
// Module: HTTP Telemetry
// Description: Observability hooks for the REST surface's request handling.
// Purpose: Provide request counters and latency observations without a
//          hard dependency on any specific metrics backend.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A thin metrics interface, mirroring the shape of an MCP-style telemetry
//! sink but labeled by HTTP route instead of JSON-RPC method. Dependency-light
//! so a deployment can plug in Prometheus or `OpenTelemetry` without redesign.

use std::io::Write;
use std::time::Duration;

use serde::Serialize;

/// Route classification used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `GET /health`.
    Health,
    /// `GET /scripts`.
    ListScripts,
    /// `POST /scripts/rescan`.
    RescanScripts,
    /// `GET /runs`.
    ListRuns,
    /// `GET /runs/active`.
    ListActiveRuns,
    /// `POST /runs`.
    StartRun,
    /// `POST /runs/all`.
    StartAllRuns,
    /// `POST /runs/stop_all`.
    StopAllRuns,
    /// `GET /runs/{id}`.
    GetRun,
    /// `POST /runs/{id}/stop`.
    StopRun,
    /// `GET /runs/{id}/logs`.
    ReadLogs,
    /// `POST /auth/admin/token`.
    IssueAdminToken,
}

impl Route {
    /// Returns a stable label for the route.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::ListScripts => "list_scripts",
            Self::RescanScripts => "rescan_scripts",
            Self::ListRuns => "list_runs",
            Self::ListActiveRuns => "list_active_runs",
            Self::StartRun => "start_run",
            Self::StartAllRuns => "start_all_runs",
            Self::StopAllRuns => "stop_all_runs",
            Self::GetRun => "get_run",
            Self::StopRun => "stop_run",
            Self::ReadLogs => "read_logs",
            Self::IssueAdminToken => "issue_admin_token",
        }
    }
}

/// Request outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The handler returned a 2xx response.
    Ok,
    /// The handler returned an error response.
    Error,
}

/// A single request's metric event payload.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RequestEvent {
    /// Which route served the request.
    pub route: Route,
    /// How the request concluded.
    pub outcome: Outcome,
}

/// Metrics sink for HTTP requests and latencies.
pub trait HttpMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: RequestEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: RequestEvent, latency: Duration);
}

/// A latency observation, logged as its own JSON line alongside the request
/// counter event.
#[derive(Debug, Clone, Copy, Serialize)]
struct LatencyPayload {
    route: Route,
    outcome: Outcome,
    latency_ms: u128,
}

/// Metrics sink that logs one JSON line per event to stderr.
pub struct StderrMetrics;

impl HttpMetrics for StderrMetrics {
    fn record_request(&self, event: RequestEvent) {
        if let Ok(payload) = serde_json::to_string(&event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }

    fn record_latency(&self, event: RequestEvent, latency: Duration) {
        let payload = LatencyPayload { route: event.route, outcome: event.outcome, latency_ms: latency.as_millis() };
        if let Ok(payload) = serde_json::to_string(&payload) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// No-op metrics sink; used in unit tests.
pub struct NoopMetrics;

impl HttpMetrics for NoopMetrics {
    fn record_request(&self, _event: RequestEvent) {}

    fn record_latency(&self, _event: RequestEvent, _latency: Duration) {}
}
