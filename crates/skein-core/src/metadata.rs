use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Version and timing metadata of a state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMetadata")]
pub struct StateMetadata {
    version: u64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawMetadata {
    version: u64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl TryFrom<RawMetadata> for StateMetadata {
    type Error = WorkflowError;

    fn try_from(raw: RawMetadata) -> Result<Self> {
        Self::with_version(raw.version, raw.created_at, raw.last_modified)
    }
}

impl StateMetadata {
    /// Fresh metadata at version 1.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: 1,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn with_version(
        version: u64,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) -> Result<Self> {
        if version < 1 {
            return Err(WorkflowError::InvalidMetadata(format!(
                "version must be >= 1, got {}",
                version
            )));
        }
        if last_modified < created_at {
            return Err(WorkflowError::InvalidMetadata(
                "last_modified precedes created_at".into(),
            ));
        }
        Ok(Self {
            version,
            created_at,
            last_modified,
        })
    }

    /// Next version. `last_modified` never moves backwards even if the clock does.
    pub fn advance(&self) -> Self {
        Self {
            version: self.version + 1,
            created_at: self.created_at,
            last_modified: self.last_modified.max(Utc::now()),
        }
    }

    /// Advance to one past the larger of this version and `floor`.
    ///
    /// Used when several derived snapshots are reconciled into one.
    pub fn advance_past(&self, floor: u64) -> Self {
        let mut next = self.advance();
        next.version = self.version.max(floor) + 1;
        next
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

impl Default for StateMetadata {
    fn default() -> Self {
        Self::new()
    }
}
