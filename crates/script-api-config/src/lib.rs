// script-api-config/src/lib.rs
// ============================================================================
// Module: Script API Config Library
// Description: Canonical, environment-driven configuration model.
// Purpose: Single source of truth for the server's env-var surface.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! `script-api-config` loads [`Config`] once from the process environment at
//! startup, validates it, and hands callers a `Clone`-able, immutable-in-
//! practice struct. There is no config file: every setting is an environment
//! variable with a documented default.

pub mod config;

pub use config::Config;
pub use config::ConfigError;
