//! Storage provider seam.
//!
//! A provider hands out leases (handles) on the persistence layer. A handle
//! resolves to the storage instance of one profile; the provider owns the
//! instances, callers only borrow them for the life of the lease.

mod lease;
mod sqlite;

pub use lease::StorageLease;
pub use sqlite::{SqliteStorage, SqliteStorageProvider, STORAGE_FILENAME};

use crate::context::ExecutionContext;
use healthreport_common::{ReportError, ReportResult};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque lease token. Not `Clone`: releasing consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StorageHandle {
    id: u64,
}

impl StorageHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub trait StorageProvider: Send + Sync {
    /// Lease the persistence layer; `None` when it is unavailable
    fn acquire(&self, context: &ExecutionContext) -> Option<StorageHandle>;

    /// Storage instance for `profile_path` reachable through `handle`
    fn resolve(&self, handle: &StorageHandle, profile_path: &Path) -> Option<Arc<dyn ReportStorage>>;

    /// End the lease. Called exactly once per acquired handle.
    fn release(&self, handle: StorageHandle);
}

/// Read side of the per-profile record store
pub trait ReportStorage: Send + Sync {
    /// Environment new records are attributed to, if one was ever recorded
    fn current_environment(&self) -> ReportResult<Option<EnvironmentRecord>>;

    fn environments(&self) -> ReportResult<Vec<EnvironmentRecord>>;

    /// Daily values on or after `since_day`, ordered by day then insertion
    fn values_since(&self, since_day: i64) -> ReportResult<Vec<DailyValue>>;
}

/// Snapshot of the application environment records are attributed to
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentRecord {
    pub id: i64,
    pub hash: String,
    pub attributes: Map<String, Value>,
}

/// How values of a field combine within a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Summed
    Counter,
    /// Latest value wins
    Last,
    /// Every value kept
    Discrete,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Counter => "counter",
            FieldKind::Last => "last",
            FieldKind::Discrete => "discrete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(FieldKind::Counter),
            "last" => Some(FieldKind::Last),
            "discrete" => Some(FieldKind::Discrete),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded value for a day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyValue {
    /// Days since the epoch
    pub day: i64,
    pub env_id: i64,
    pub measurement: String,
    pub measurement_version: u32,
    pub field: String,
    pub kind: FieldKind,
    pub value: Value,
}

pub(crate) fn storage_err(e: impl fmt::Display) -> ReportError {
    ReportError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_labels() {
        for kind in [FieldKind::Counter, FieldKind::Last, FieldKind::Discrete] {
            assert_eq!(FieldKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FieldKind::parse("histogram"), None);
        assert_eq!(FieldKind::Counter.to_string(), "counter");
    }
}
