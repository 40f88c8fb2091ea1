//! Synchronous report generation core.
//!
//! Everything here blocks on I/O and is meant to run on a background worker.
//! Failures propagate to the caller; turning them into an empty report is the
//! reporter's job.

use crate::context::ExecutionContext;
use crate::generator::DocumentGenerator;
use crate::profile::ProfileResolver;
use crate::storage::{StorageLease, StorageProvider};
use healthreport_common::{
    Clock, PrefsStore, ReportDocument, ReportError, ReportRequest, ReportResult, ReportWindow,
    Timestamp, WindowPolicy, PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Collaborators the engine is built from
pub struct EngineParts {
    pub storage: Arc<dyn StorageProvider>,
    pub generator: Arc<dyn DocumentGenerator>,
    pub prefs: Arc<dyn PrefsStore>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub clock: Arc<dyn Clock>,
    pub policy: WindowPolicy,
}

pub struct ReportEngine {
    context: ExecutionContext,
    storage: Arc<dyn StorageProvider>,
    generator: Arc<dyn DocumentGenerator>,
    prefs: Arc<dyn PrefsStore>,
    profiles: Arc<dyn ProfileResolver>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
}

impl ReportEngine {
    pub fn new(context: ExecutionContext, parts: EngineParts) -> Self {
        Self {
            context,
            storage: parts.storage,
            generator: parts.generator,
            prefs: parts.prefs,
            profiles: parts.profiles,
            clock: parts.clock,
            policy: parts.policy,
        }
    }

    /// Generate a report for `profile_path` covering `[since, last_ping_time]`.
    ///
    /// The storage lease is released before this returns, on every path.
    pub fn generate_report(
        &self,
        since: Timestamp,
        last_ping_time: Timestamp,
        profile_path: &Path,
    ) -> ReportResult<ReportDocument> {
        let lease = StorageLease::acquire(self.storage.as_ref(), &self.context)?;
        let storage = lease.storage(profile_path)?;

        let report = self
            .generator
            .generate_document(storage.as_ref(), since, last_ping_time, profile_path)
            .map_err(|e| match e {
                ReportError::Storage(msg) => ReportError::GenerationFailure(msg),
                other => other,
            })?;

        // Drop the storage reference before the lease so nothing outlives it
        drop(storage);
        drop(lease);

        report.ok_or(ReportError::InsufficientData)
    }

    /// Generate a report for the active profile over the default window
    pub fn generate_current_report(&self) -> ReportResult<ReportDocument> {
        self.generate_for_request(&ReportRequest::default())
    }

    /// Generate a report honoring any override timestamps in the request.
    /// Supplied timestamps must not be after now; when both are supplied
    /// they must also be ordered.
    pub fn generate_for_request(&self, request: &ReportRequest) -> ReportResult<ReportDocument> {
        let profile_path = self.profiles.active_profile_path()?;
        let window = self.window_for(request)?;
        debug!(
            "Report window since={} last_ping_time={} profile={}",
            window.since,
            window.last_ping_time,
            profile_path.display()
        );
        self.generate_report(window.since, window.last_ping_time, &profile_path)
    }

    /// Last successful upload, or 0 if there never was one
    pub fn last_upload_local_time(&self) -> Timestamp {
        self.prefs.read_i64(PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME, 0)
    }

    /// Default window at the current instant
    pub fn current_window(&self) -> ReportWindow {
        ReportWindow::compute(
            self.clock.now_millis(),
            self.last_upload_local_time(),
            &self.policy,
        )
    }

    fn window_for(&self, request: &ReportRequest) -> ReportResult<ReportWindow> {
        let computed = self.current_window();
        if !request.has_overrides() {
            return Ok(computed);
        }

        computed.with_overrides(request.since, request.last_ping_time, self.clock.now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::HealthReportGenerator;
    use crate::profile::DirectoryProfile;
    use crate::storage::{SqliteStorage, SqliteStorageProvider};
    use healthreport_common::{FixedClock, MemoryPrefs, EARLIEST_LAST_PING, MILLISECONDS_PER_DAY};
    use serde_json::json;
    use tempfile::TempDir;

    const NOW: Timestamp = 1_792_195_200_000;

    struct Fixture {
        _temp: TempDir,
        profile: std::path::PathBuf,
        provider: Arc<SqliteStorageProvider>,
        prefs: Arc<MemoryPrefs>,
        engine: ReportEngine,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let profile = temp.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();

        let provider = Arc::new(SqliteStorageProvider::new());
        let prefs = Arc::new(MemoryPrefs::new());
        let clock = Arc::new(FixedClock::new(NOW));
        let engine = ReportEngine::new(
            ExecutionContext::current(temp.path()).unwrap(),
            EngineParts {
                storage: provider.clone(),
                generator: Arc::new(HealthReportGenerator::new(clock.clone())),
                prefs: prefs.clone(),
                profiles: Arc::new(DirectoryProfile::new(&profile)),
                clock,
                policy: WindowPolicy::default(),
            },
        );

        Fixture {
            _temp: temp,
            profile,
            provider,
            prefs,
            engine,
        }
    }

    fn seed_environment(profile: &Path) {
        let storage = SqliteStorage::open_for_profile(profile).unwrap();
        let env = json!({"os": "Linux"}).as_object().cloned().unwrap();
        let id = storage.register_environment(&env).unwrap();
        storage.set_current_environment(id).unwrap();
    }

    #[tokio::test]
    async fn test_generates_and_releases() {
        let f = fixture();
        seed_environment(&f.profile);

        let doc = f.engine.generate_current_report().unwrap();
        assert_eq!(doc.get("version").unwrap(), &json!(2));
        assert_eq!(f.provider.active_leases(), 0);
        assert_eq!(f.provider.open_storages(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_data_after_release() {
        let f = fixture();
        let err = f.engine.generate_current_report().unwrap_err();
        assert!(matches!(err, ReportError::InsufficientData));
        assert_eq!(f.provider.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_missing_profile_is_reported() {
        let f = fixture();
        std::fs::remove_dir_all(&f.profile).unwrap();
        let err = f.engine.generate_current_report().unwrap_err();
        assert!(matches!(err, ReportError::NoActiveProfile(_)));
    }

    #[tokio::test]
    async fn test_closed_provider_is_storage_unavailable() {
        let f = fixture();
        f.provider.close();
        let err = f.engine.generate_report(0, 0, &f.profile).unwrap_err();
        assert!(matches!(err, ReportError::StorageUnavailable(_)));
        assert_eq!(f.provider.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_last_upload_defaults_to_zero() {
        let f = fixture();
        assert_eq!(f.engine.last_upload_local_time(), 0);
        f.prefs.set_i64(PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME, 1_700_000_000_000);
        assert_eq!(f.engine.last_upload_local_time(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_current_window() {
        let f = fixture();
        let window = f.engine.current_window();
        assert_eq!(window.since, NOW - 180 * MILLISECONDS_PER_DAY);
        assert_eq!(window.last_ping_time, EARLIEST_LAST_PING);

        f.prefs.set_i64(PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME, NOW - 1_000);
        assert_eq!(f.engine.current_window().last_ping_time, NOW - 1_000);
    }

    #[tokio::test]
    async fn test_request_overrides() {
        let f = fixture();
        seed_environment(&f.profile);

        let request = ReportRequest {
            since: Some(NOW - 2 * MILLISECONDS_PER_DAY),
            last_ping_time: Some(NOW - MILLISECONDS_PER_DAY),
        };
        let doc = f.engine.generate_for_request(&request).unwrap();
        assert_eq!(doc.get("lastPingDate").unwrap(), &json!("2026-10-16"));

        let backwards = ReportRequest {
            since: Some(NOW),
            last_ping_time: Some(NOW - MILLISECONDS_PER_DAY),
        };
        assert!(matches!(
            f.engine.generate_for_request(&backwards),
            Err(ReportError::InvalidWindow { .. })
        ));
        assert_eq!(f.provider.active_leases(), 0);
    }
}
