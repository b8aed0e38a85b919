// script-api-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Shared application state and startup wiring.
// Purpose: Bundle the Run Manager, config, auth policy, and script cache
//          behind one handle every handler borrows.
// Dependencies: script-api-auth, script-api-config, script-api-core,
//               script-api-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! [`AppState::bootstrap`] is the one place a binary needs to call to go from
//! a loaded [`Config`] to a servable state: it opens the durable store,
//! constructs the Run Manager (which reconciles any in-flight runs left over
//! from a prior process), and performs the initial script scan.

use std::sync::Arc;
use std::time::Duration;

use script_api_auth::AuthGateConfig;
use script_api_config::Config;
use script_api_core::RunManager;
use script_api_core::RunManagerConfig;
use script_api_core::RunStoreError;
use script_api_core::ScriptInfo;
use script_api_core::SharedRunStore;
use script_api_core::StderrRunAuditSink;
use script_api_core::scan_scripts;
use script_api_core::ManagerError;
use script_api_store_sqlite::SqliteRunStore;
use script_api_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::audit::AuthAuditSink;
use crate::audit::StderrAuthAuditSink;
use crate::telemetry::HttpMetrics;
use crate::telemetry::StderrMetrics;

/// Errors raised while assembling [`AppState`].
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The durable run store could not be opened.
    #[error("failed to open run store: {0}")]
    Store(#[from] RunStoreError),
    /// The Run Manager failed to reconcile on startup.
    #[error("run manager failed to start: {0}")]
    Manager(#[from] ManagerError),
}

/// Shared state handed to every HTTP handler.
pub struct AppState {
    /// The loaded, validated server configuration.
    pub config: Config,
    /// Auth Gate policy derived from `config`.
    pub auth: AuthGateConfig,
    /// Owns child-process lifecycle and the durable store.
    pub manager: Arc<RunManager>,
    /// Cached result of the last script scan.
    pub scripts: RwLock<Vec<ScriptInfo>>,
    /// Sink for authentication-decision audit events.
    pub audit: Arc<dyn AuthAuditSink>,
    /// Sink for HTTP request metrics.
    pub metrics: Arc<dyn HttpMetrics>,
}

impl AppState {
    /// Builds the application state from a loaded configuration: opens the
    /// durable store, reconciles the Run Manager, and performs the initial
    /// script scan.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the durable store cannot be opened or
    /// the Run Manager fails to reconcile.
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>, BootstrapError> {
        let store = SqliteRunStore::open(SqliteStoreConfig::new(config.run_store_path()))?;
        let manager_config = RunManagerConfig {
            scripts_root: config.scripts_root.clone(),
            logs_dir: config.logs_dir.clone(),
            interpreter: config.python_interpreter.clone(),
            terminate_timeout: Duration::from_secs(config.terminate_timeout_seconds),
        };
        let manager = RunManager::new(manager_config, SharedRunStore::from_store(store), Arc::new(StderrRunAuditSink)).await?;

        let auth = AuthGateConfig {
            jwt_auth_enabled: config.jwt_auth,
            jwt_secret: config.jwt_secret.clone(),
            jwt_iss: config.jwt_iss.clone(),
            jwt_aud: config.jwt_aud.clone(),
            jwt_leeway_seconds: config.jwt_leeway_seconds,
            jwt_expire_seconds: config.jwt_expire_seconds,
            jwt_admin_secret: config.jwt_admin_secret.clone(),
        };

        let scripts = scan_scripts(&config.scripts_root);

        Ok(Arc::new(Self {
            config,
            auth,
            manager,
            scripts: RwLock::new(scripts),
            audit: Arc::new(StderrAuthAuditSink),
            metrics: Arc::new(StderrMetrics),
        }))
    }

    /// Rescans the scripts root, replaces the cached result, and returns it.
    pub async fn rescan(&self) -> Vec<ScriptInfo> {
        let scanned = scan_scripts(&self.config.scripts_root);
        let mut guard = self.scripts.write().await;
        guard.clone_from(&scanned);
        scanned
    }
}
