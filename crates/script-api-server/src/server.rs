// script-api-server/src/server.rs
// ============================================================================
// Module: HTTP Surface
// Description: Route wiring and handlers for the script execution control
//              plane's REST API.
// Purpose: Translate HTTP requests into Script Registry / Run Manager / Auth
//          Gate operations and back into JSON responses.
// Dependencies: axum, script-api-auth, script-api-core, tokio
// ============================================================================

//! ## Overview
//! Every handler follows the same shape: check the Auth Gate for the route's
//! required scopes, do the operation, map any error through [`ApiError`].
//! Validation and auth failures never touch the Run Manager; spawn and stop
//! failures are recorded on the run itself and returned as a 200 describing
//! a failed run, per the "the run exists, here is its state" contract.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::Path as AxumPath;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::routing::post;
use script_api_auth::AuthError;
use script_api_auth::issue_admin_token;
use script_api_auth::require_scopes;
use script_api_core::LogStream;
use script_api_core::RunId;
use script_api_core::RunManager;
use script_api_core::RunRecord;
use script_api_core::RunStatus;
use script_api_core::ScriptInfo;
use script_api_core::resolve_script;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuthAuditEvent;
use crate::audit::AuthOutcome;
use crate::error::ApiError;
use crate::state::AppState;
use crate::telemetry::Outcome;
use crate::telemetry::RequestEvent;
use crate::telemetry::Route;

/// Default number of trailing bytes returned by a log read when the caller
/// does not specify `tail_bytes`.
const DEFAULT_TAIL_BYTES: u64 = 8 * 1024;

/// Builds the full router, nested under the configured API prefix.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.api_prefix.clone();
    let api = Router::new()
        .route("/health", get(health))
        .route("/scripts", get(list_scripts))
        .route("/scripts/rescan", post(rescan_scripts))
        .route("/runs", get(list_runs).post(start_run))
        .route("/runs/active", get(list_active_runs))
        .route("/runs/all", post(start_all_runs))
        .route("/runs/stop_all", post(stop_all_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/stop", post(stop_run))
        .route("/runs/{id}/logs", get(read_logs))
        .route("/auth/admin/token", post(issue_token))
        .with_state(state);

    Router::new().nest(&prefix, api)
}

/// Binds `config.host:config.port` and serves `router` until the process
/// is signalled to stop.
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let address = format!("{}:{}", state.config.host, state.config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, router).await
}

/// Checks `headers` against `required` scopes for `route`, recording the
/// decision to the audit sink.
fn authorize(state: &AppState, route: Route, headers: &HeaderMap, required: &[&str]) -> Result<(), ApiError> {
    let required_scopes: BTreeSet<String> = required.iter().map(|scope| (*scope).to_string()).collect();
    let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());

    match require_scopes(&state.auth, header, &required_scopes) {
        Ok(None) => {
            state.audit.record(&AuthAuditEvent {
                route: route.as_str(),
                outcome: AuthOutcome::Bypassed,
                subject: None,
                detail: None,
            });
            Ok(())
        }
        Ok(Some(caller)) => {
            state.audit.record(&AuthAuditEvent {
                route: route.as_str(),
                outcome: AuthOutcome::Allowed,
                subject: caller.subject,
                detail: None,
            });
            Ok(())
        }
        Err(err) => {
            let outcome = if matches!(err, AuthError::InsufficientScopes) {
                AuthOutcome::InsufficientScopes
            } else {
                AuthOutcome::Unauthenticated
            };
            state.audit.record(&AuthAuditEvent {
                route: route.as_str(),
                outcome,
                subject: None,
                detail: None,
            });
            Err(err.into())
        }
    }
}

/// Records a request-completion metric and its latency for `route`.
fn record_outcome(state: &AppState, route: Route, result: &Result<impl Serialize, ApiError>, started: Instant) {
    let outcome = if result.is_ok() { Outcome::Ok } else { Outcome::Error };
    let event = RequestEvent { route, outcome };
    state.metrics.record_request(event);
    state.metrics.record_latency(event, started.elapsed());
}

/// `GET /health` response body.
#[derive(Debug, Serialize)]
struct HealthResponse {
    /// Always `"ok"`; the endpoint itself being reachable is the signal.
    status: &'static str,
    /// The configured scripts root, as a display string.
    scripts_root: String,
    /// Whether bearer-token auth is currently enforced.
    jwt_auth: bool,
}

/// `GET /health` — no auth required.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let started = Instant::now();
    let body = HealthResponse {
        status: "ok",
        scripts_root: state.config.scripts_root.display().to_string(),
        jwt_auth: state.config.jwt_auth,
    };
    let event = RequestEvent { route: Route::Health, outcome: Outcome::Ok };
    state.metrics.record_request(event);
    state.metrics.record_latency(event, started.elapsed());
    Json(body)
}

/// Response body shared by `GET /scripts` and `POST /scripts/rescan`.
#[derive(Debug, Serialize)]
struct ScriptsResponse {
    /// Number of scripts in `scripts`.
    count: usize,
    /// The scanned scripts, sorted by relative path.
    scripts: Vec<ScriptInfo>,
}

impl ScriptsResponse {
    /// Builds a response body from a scan result.
    fn from_scripts(scripts: Vec<ScriptInfo>) -> Self {
        Self { count: scripts.len(), scripts }
    }
}

/// `GET /scripts` — scope `scripts:read`. Returns the cached scan result.
async fn list_scripts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ScriptsResponse>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::ListScripts, &headers, &["scripts:read"])?;
    let scripts = state.scripts.read().await.clone();
    let result: Result<ScriptsResponse, ApiError> = Ok(ScriptsResponse::from_scripts(scripts));
    record_outcome(&state, Route::ListScripts, &result, started);
    result.map(Json)
}

/// `POST /scripts/rescan` — scope `scripts:read`. Replaces the cache.
async fn rescan_scripts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ScriptsResponse>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::RescanScripts, &headers, &["scripts:read"])?;
    let scripts = state.rescan().await;
    let result: Result<ScriptsResponse, ApiError> = Ok(ScriptsResponse::from_scripts(scripts));
    record_outcome(&state, Route::RescanScripts, &result, started);
    result.map(Json)
}

/// Response body shared by `GET /runs` and `GET /runs/active`.
#[derive(Debug, Serialize)]
struct RunsResponse {
    /// Number of runs in `runs`.
    count: usize,
    /// The matching runs, in unspecified order.
    runs: Vec<RunRecord>,
}

/// `GET /runs` — scope `scripts:read`.
async fn list_runs(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<RunsResponse>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::ListRuns, &headers, &["scripts:read"])?;
    let runs = state.manager.list_all().await;
    let result: Result<RunsResponse, ApiError> = Ok(RunsResponse { count: runs.len(), runs });
    record_outcome(&state, Route::ListRuns, &result, started);
    result.map(Json)
}

/// `GET /runs/active` — scope `scripts:read`.
async fn list_active_runs(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<RunsResponse>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::ListActiveRuns, &headers, &["scripts:read"])?;
    let runs = state.manager.list_active().await;
    let result: Result<RunsResponse, ApiError> = Ok(RunsResponse { count: runs.len(), runs });
    record_outcome(&state, Route::ListActiveRuns, &result, started);
    result.map(Json)
}

/// Request body for `POST /runs`.
#[derive(Debug, Deserialize)]
struct StartRunRequest {
    /// Script path, relative to the scripts root.
    script: String,
    /// Extra arguments appended after the script path.
    #[serde(default)]
    args: Vec<String>,
    /// Extra environment variables applied to the child.
    env: Option<HashMap<String, String>>,
    /// Working directory for the child; must lie under the scripts root.
    cwd: Option<String>,
    /// Whether to allow a second active run of the same script. Default
    /// `false`.
    #[serde(default)]
    duplicate: bool,
}

/// Resolves and validates a requested `cwd` against the scripts root.
fn validate_cwd(state: &AppState, requested: &str) -> Result<std::path::PathBuf, ApiError> {
    let root = std::fs::canonicalize(&state.config.scripts_root).map_err(|err| ApiError::ServerMisconfigured(err.to_string()))?;
    let candidate = root.join(requested);
    let canonical = std::fs::canonicalize(&candidate).map_err(|_| ApiError::BadRequest(format!("cwd not found: {requested}")))?;
    if !canonical.starts_with(&root) {
        return Err(ApiError::BadRequest("cwd must lie under the scripts root".to_string()));
    }
    if !canonical.is_dir() {
        return Err(ApiError::BadRequest("cwd must be a directory".to_string()));
    }
    Ok(canonical)
}

/// Returns `true` if any currently active run's resolved script
/// (`argv[2]`) equals `resolved_absolute`.
async fn has_active_duplicate(state: &AppState, resolved_absolute: &str) -> bool {
    state.manager.list_active().await.iter().any(|run| run.argv.get(2).is_some_and(|path| path == resolved_absolute))
}

/// Does the actual work of `POST /runs`, after auth has been checked.
async fn start_run_inner(state: &AppState, body: StartRunRequest) -> Result<RunRecord, ApiError> {
    let resolved = resolve_script(&state.config.scripts_root, &body.script)?;
    let resolved_str = resolved.to_string_lossy().to_string();

    let cwd = body.cwd.as_deref().map(|raw| validate_cwd(state, raw)).transpose()?;

    if !body.duplicate && has_active_duplicate(state, &resolved_str).await {
        return Err(ApiError::Conflict);
    }

    let record = RunManager::start(&state.manager, &body.script, &resolved, body.args, body.env, cwd).await?;
    Ok(record)
}

/// `POST /runs` — scope `scripts:run`.
async fn start_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartRunRequest>,
) -> Result<Json<RunRecord>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::StartRun, &headers, &["scripts:run"])?;
    let result = start_run_inner(&state, body).await;
    record_outcome(&state, Route::StartRun, &result, started);
    result.map(Json)
}

/// Outcome of one script's attempt in `POST /runs/all`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum StartAllStatus {
    /// The run was started.
    Started,
    /// The run was skipped (an active duplicate already exists).
    Skipped,
    /// The script could not be resolved.
    Error,
}

/// Per-script result row for `POST /runs/all`.
#[derive(Debug, Serialize)]
struct StartAllResult {
    /// The script path attempted.
    script: String,
    /// What happened for this script.
    status: StartAllStatus,
    /// The started run's id, when `status == started`.
    run_id: Option<RunId>,
    /// Why the script was skipped, when `status == skipped`.
    reason: Option<String>,
    /// The resolution error, when `status == error`.
    error: Option<String>,
}

/// `POST /runs/all` — scope `scripts:run`. Attempts a start for every known
/// script under the same rules as `POST /runs`.
async fn start_all_runs(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<StartAllResult>>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::StartAllRuns, &headers, &["scripts:run"])?;

    let scripts = state.scripts.read().await.clone();
    let mut results = Vec::with_capacity(scripts.len());

    for info in scripts {
        let resolved_str = info.absolute_path.to_string_lossy().to_string();
        if has_active_duplicate(&state, &resolved_str).await {
            results.push(StartAllResult {
                script: info.path,
                status: StartAllStatus::Skipped,
                run_id: None,
                reason: Some("an active run for this script already exists".to_string()),
                error: None,
            });
            continue;
        }

        match RunManager::start(&state.manager, &info.path, &info.absolute_path, Vec::new(), None, None).await {
            Ok(record) => results.push(StartAllResult {
                script: info.path,
                status: StartAllStatus::Started,
                run_id: Some(record.run_id),
                reason: None,
                error: None,
            }),
            Err(err) => results.push(StartAllResult {
                script: info.path,
                status: StartAllStatus::Error,
                run_id: None,
                reason: None,
                error: Some(err.to_string()),
            }),
        }
    }

    let result: Result<Vec<StartAllResult>, ApiError> = Ok(results);
    record_outcome(&state, Route::StartAllRuns, &result, started);
    result.map(Json)
}

/// Per-run result row for `POST /runs/stop_all`.
#[derive(Debug, Serialize)]
struct StopAllResult {
    /// The run that was asked to stop.
    run_id: RunId,
    /// Its status immediately after the stop attempt.
    status: RunStatus,
}

/// Does the actual work of `POST /runs/stop_all`, after auth has been checked.
async fn stop_all_runs_inner(state: &AppState) -> Result<Vec<StopAllResult>, ApiError> {
    let active = state.manager.list_active().await;
    let mut results = Vec::with_capacity(active.len());
    for run in active {
        if let Some(record) = state.manager.stop(run.run_id).await? {
            results.push(StopAllResult { run_id: record.run_id, status: record.status });
        }
    }
    Ok(results)
}

/// `POST /runs/stop_all` — scope `scripts:run`. Stops every active run.
async fn stop_all_runs(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<StopAllResult>>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::StopAllRuns, &headers, &["scripts:run"])?;
    let result = stop_all_runs_inner(&state).await;
    record_outcome(&state, Route::StopAllRuns, &result, started);
    result.map(Json)
}

/// Parses a `{id}` path parameter into a [`RunId`].
fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    RunId::try_from(raw).map_err(|_| ApiError::NotFound(format!("run not found: {raw}")))
}

/// `GET /runs/{id}` — scope `scripts:read`.
async fn get_run(State(state): State<Arc<AppState>>, headers: HeaderMap, AxumPath(id): AxumPath<String>) -> Result<Json<RunRecord>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::GetRun, &headers, &["scripts:read"])?;
    let result = async {
        let run_id = parse_run_id(&id)?;
        state.manager.get(run_id).await.ok_or_else(|| ApiError::NotFound(format!("run not found: {id}")))
    }
    .await;
    record_outcome(&state, Route::GetRun, &result, started);
    result.map(Json)
}

/// `POST /runs/{id}/stop` — scope `scripts:run`.
async fn stop_run(State(state): State<Arc<AppState>>, headers: HeaderMap, AxumPath(id): AxumPath<String>) -> Result<Json<RunRecord>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::StopRun, &headers, &["scripts:run"])?;
    let result = async {
        let run_id = parse_run_id(&id)?;
        state.manager.stop(run_id).await?.ok_or_else(|| ApiError::NotFound(format!("run not found: {id}")))
    }
    .await;
    record_outcome(&state, Route::StopRun, &result, started);
    result.map(Json)
}

/// Query parameters for `GET /runs/{id}/logs`.
#[derive(Debug, Deserialize)]
struct LogsQuery {
    /// Which stream(s) to return: `stdout`, `stderr`, or `both`. Default
    /// `both`.
    stream: Option<String>,
    /// Trailing byte count to return per stream. Default 8 KiB.
    tail_bytes: Option<u64>,
}

/// Errors raised while parsing log-query parameters.
#[derive(Debug, Error)]
enum LogsQueryError {
    /// `stream` was not one of `stdout`, `stderr`, `both`.
    #[error("stream must be one of stdout, stderr, both")]
    InvalidStream,
}

impl From<LogsQueryError> for ApiError {
    fn from(err: LogsQueryError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// Parses the `stream` query parameter into a [`LogStream`].
fn parse_stream(raw: Option<&str>) -> Result<LogStream, LogsQueryError> {
    match raw.unwrap_or("both") {
        "stdout" => Ok(LogStream::Stdout),
        "stderr" => Ok(LogStream::Stderr),
        "both" => Ok(LogStream::Both),
        _ => Err(LogsQueryError::InvalidStream),
    }
}

/// Does the actual work of `GET /runs/{id}/logs`, after auth has been checked.
async fn read_logs_inner(state: &AppState, id: &str, query: &LogsQuery) -> Result<HashMap<String, String>, ApiError> {
    let run_id = parse_run_id(id)?;
    let stream = parse_stream(query.stream.as_deref())?;
    let tail_bytes = query.tail_bytes.unwrap_or(DEFAULT_TAIL_BYTES);

    state
        .manager
        .read_logs(run_id, stream, tail_bytes)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("run not found: {id}")))
}

/// `GET /runs/{id}/logs?stream=stdout|stderr|both&tail_bytes=N` — scope
/// `logs:read`.
async fn read_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let started = Instant::now();
    authorize(&state, Route::ReadLogs, &headers, &["logs:read"])?;
    let result = read_logs_inner(&state, &id, &query).await;
    record_outcome(&state, Route::ReadLogs, &result, started);
    result.map(Json)
}

/// Request body for `POST /auth/admin/token`.
#[derive(Debug, Deserialize)]
struct AdminTokenRequest {
    /// The shared admin secret.
    secret: String,
}

/// `POST /auth/admin/token` — no auth; body `{secret}`.
async fn issue_token(State(state): State<Arc<AppState>>, Json(body): Json<AdminTokenRequest>) -> Result<Json<script_api_auth::AdminToken>, ApiError> {
    let started = Instant::now();
    let result = issue_admin_token(&state.auth, &body.secret).map_err(ApiError::from);
    match &result {
        Ok(_) => state.audit.record(&AuthAuditEvent {
            route: Route::IssueAdminToken.as_str(),
            outcome: AuthOutcome::AdminExchangeIssued,
            subject: Some("admin".to_string()),
            detail: None,
        }),
        Err(_) => state.audit.record(&AuthAuditEvent {
            route: Route::IssueAdminToken.as_str(),
            outcome: AuthOutcome::AdminExchangeRejected,
            subject: None,
            detail: None,
        }),
    }
    record_outcome(&state, Route::IssueAdminToken, &result, started);
    result.map(Json)
}
