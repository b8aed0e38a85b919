// script-api-server/src/lib.rs
// ============================================================================
// Module: Script API Server Library
// Description: Public API surface for the script execution control plane's
//              HTTP layer: router construction, state bootstrap, and the
//              auth/telemetry seams handlers call into.
// Purpose: Give a thin binary (the CLI) one call to bootstrap state and one
//          to serve it.
// Dependencies: crate::{audit, error, server, state, telemetry}
// ============================================================================

//! ## Overview
//! `script-api-server` wires [`script_api_core::RunManager`] and
//! [`script_api_auth`]'s Auth Gate to a plain REST surface over `axum`. A
//! binary needs only [`AppState::bootstrap`] and [`serve`] (or
//! [`build_router`] to embed the router elsewhere, e.g. in tests).

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod error;
pub mod server;
pub mod state;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuthAuditSink;
pub use audit::AuthOutcome;
pub use audit::NoopAuthAuditSink;
pub use audit::StderrAuthAuditSink;
pub use error::ApiError;
pub use server::build_router;
pub use server::serve;
pub use state::AppState;
pub use state::BootstrapError;
pub use telemetry::HttpMetrics;
pub use telemetry::NoopMetrics;
pub use telemetry::Route;
pub use telemetry::StderrMetrics;
