// script-api-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunStore backend using SQLite WAL.
// Purpose: Provide file-backed persistence for run records across restarts.
// Dependencies: script-api-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides the `SQLite`-backed [`RunStore`] implementation used
//! in production; [`script_api_core::InMemoryRunStore`] covers tests and the
//! no-persistence case.

pub mod store;

pub use store::SqliteRunStore;
pub use store::SqliteStoreConfig;
