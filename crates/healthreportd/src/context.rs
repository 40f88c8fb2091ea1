//! Execution context handed to the report service at construction.

use healthreport_common::{ReportError, ReportResult};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

/// Runtime and application directory the service operates in
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    runtime: Handle,
    app_dir: PathBuf,
}

impl ExecutionContext {
    pub fn new(runtime: Handle, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            app_dir: app_dir.into(),
        }
    }

    /// Capture the runtime of the calling thread
    pub fn current(app_dir: impl Into<PathBuf>) -> ReportResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ReportError::NoExecutionContext)?;
        Ok(Self::new(runtime, app_dir))
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }
}
