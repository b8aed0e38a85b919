// script-api-core/src/run_id.rs
// ============================================================================
// Module: Run Identifier
// Description: Opaque, random identifier for a single script execution.
// Purpose: Provide a strongly typed identifier with a stable textual wire form.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! A `RunId` is generated once per `start` call and never reused. It is the
//! primary key of both the in-memory registry and the durable store.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Opaque identifier for a single run, backed by a random 128-bit value.
///
/// # Invariants
/// - Textual form is a lowercase hyphenated UUID; collisions are treated as
///   impossible under correct random generation (see the store's upsert
///   semantics, which make a collision merely overwrite rather than corrupt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh, random run identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the identifier's textual form.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<&str> for RunId {
    type Error = uuid::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

impl TryFrom<String> for RunId {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}
