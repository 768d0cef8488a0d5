//! Core type definitions for deltasync.

use crate::id::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-record logical clock.
///
/// Bumped on every local mutation. Revisions are the only thing conflict
/// detection compares; wall-clock time is never trusted for ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Revision of a record that has never been written.
    pub const ZERO: Revision = Revision(0);

    /// Creates a new revision.
    #[must_use]
    pub const fn new(rev: u64) -> Self {
        Self(rev)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Largest representable revision; it has no successor.
    pub const MAX: Revision = Revision(u64::MAX);

    /// Returns the next revision, or `None` at [`Revision::MAX`].
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(rev) => Some(Self(rev)),
            None => None,
        }
    }

    /// Returns true if a later revision exists.
    #[must_use]
    pub const fn has_successor(self) -> bool {
        self.0 < u64::MAX
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

/// Name of a registered record type (e.g. `"Book"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(String);

impl RecordType {
    /// Creates a record type name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Fully qualified record address: type plus identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record type.
    pub record_type: RecordType,
    /// Record identity.
    pub id: RecordId,
}

impl RecordKey {
    /// Creates a record key.
    pub fn new(record_type: impl Into<RecordType>, id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used for informational timestamps only.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
