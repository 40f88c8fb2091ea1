//! Error types for report generation.

use crate::time::Timestamp;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("No execution context available")]
    NoExecutionContext,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not enough profile information to generate report")]
    InsufficientData,

    #[error("Report generation failed: {0}")]
    GenerationFailure(String),

    #[error("No active profile: {0}")]
    NoActiveProfile(String),

    #[error("Invalid report window (since={since}, last_ping_time={last_ping_time}, now={now})")]
    InvalidWindow {
        since: Timestamp,
        last_ping_time: Timestamp,
        now: Timestamp,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    /// Stable label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::NoExecutionContext => "no_execution_context",
            ReportError::StorageUnavailable(_) => "storage_unavailable",
            ReportError::InsufficientData => "insufficient_data",
            ReportError::NoActiveProfile(_) => "no_active_profile",
            ReportError::InvalidWindow { .. } => "invalid_window",
            ReportError::GenerationFailure(_)
            | ReportError::Storage(_)
            | ReportError::Json(_) => "generation_failure",
        }
    }
}

pub type ReportResult<T> = Result<T, ReportError>;
