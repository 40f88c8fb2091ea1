//! Scoped storage lease.

use super::{ReportStorage, StorageHandle, StorageProvider};
use crate::context::ExecutionContext;
use healthreport_common::{ReportError, ReportResult};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Storage handle that is released when the lease drops.
///
/// Every exit path of a generation (success, early `?` return, panic unwind)
/// drops the lease, so the provider sees exactly one release per acquisition.
pub struct StorageLease<'a> {
    provider: &'a dyn StorageProvider,
    handle: Option<StorageHandle>,
}

impl<'a> StorageLease<'a> {
    /// Acquire a handle. No handle means nothing to release later.
    pub fn acquire(provider: &'a dyn StorageProvider, context: &ExecutionContext) -> ReportResult<Self> {
        let handle = provider.acquire(context).ok_or_else(|| {
            ReportError::StorageUnavailable("could not acquire storage handle".to_string())
        })?;
        debug!("Acquired storage lease {}", handle.id());
        Ok(Self {
            provider,
            handle: Some(handle),
        })
    }

    /// Storage instance for a profile, borrowed for the life of the lease
    pub fn storage(&self, profile_path: &Path) -> ReportResult<Arc<dyn ReportStorage>> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| ReportError::StorageUnavailable("storage lease already released".to_string()))?;

        self.provider.resolve(handle, profile_path).ok_or_else(|| {
            ReportError::StorageUnavailable(format!("no storage for profile {}", profile_path.display()))
        })
    }
}

impl Drop for StorageLease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Releasing storage lease {}", handle.id());
            self.provider.release(handle);
        }
    }
}
