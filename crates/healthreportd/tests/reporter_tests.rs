//! Health Reporter Tests
//!
//! Drives the request/response signal flow end to end with scripted storage
//! and generator fakes.

use healthreport_common::{
    FixedClock, MemoryPrefs, ReportDocument, ReportError, ReportResult, Timestamp, WindowPolicy,
    EARLIEST_LAST_PING, EVENT_REQUEST, EVENT_RESPONSE, MILLISECONDS_PER_DAY,
    MILLISECONDS_PER_SIX_MONTHS, PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME,
};
use healthreportd::bridge::{EventBridge, EventListener, LocalBridge};
use healthreportd::context::ExecutionContext;
use healthreportd::engine::EngineParts;
use healthreportd::generator::DocumentGenerator;
use healthreportd::profile::DirectoryProfile;
use healthreportd::reporter::{HealthReporter, ReporterSettings};
use healthreportd::storage::{
    DailyValue, EnvironmentRecord, ReportStorage, StorageHandle, StorageProvider,
};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const NOW: Timestamp = 1_792_195_200_000;
const WAIT: Duration = Duration::from_secs(5);

/// Shared ordering log of provider and bridge activity
type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

struct NoRecords;

impl ReportStorage for NoRecords {
    fn current_environment(&self) -> ReportResult<Option<EnvironmentRecord>> {
        Ok(None)
    }

    fn environments(&self) -> ReportResult<Vec<EnvironmentRecord>> {
        Ok(Vec::new())
    }

    fn values_since(&self, _since_day: i64) -> ReportResult<Vec<DailyValue>> {
        Ok(Vec::new())
    }
}

struct FakeProvider {
    available: bool,
    next_id: AtomicU64,
    journal: Journal,
}

impl FakeProvider {
    fn new(available: bool, journal: Journal) -> Self {
        Self {
            available,
            next_id: AtomicU64::new(1),
            journal,
        }
    }
}

impl StorageProvider for FakeProvider {
    fn acquire(&self, _context: &ExecutionContext) -> Option<StorageHandle> {
        if !self.available {
            note(&self.journal, "acquire:none");
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        note(&self.journal, format!("acquire:{}", id));
        Some(StorageHandle::new(id))
    }

    fn resolve(&self, _handle: &StorageHandle, _profile_path: &Path) -> Option<Arc<dyn ReportStorage>> {
        Some(Arc::new(NoRecords))
    }

    fn release(&self, handle: StorageHandle) {
        note(&self.journal, format!("release:{}", handle.id()));
    }
}

/// What the scripted generator does when called
enum Script {
    Document(serde_json::Value),
    Nothing,
    Fail,
    Sleep(Duration),
}

struct FakeGenerator {
    script: Script,
    windows: Mutex<Vec<(Timestamp, Timestamp)>>,
    /// Signals entry, then waits for the gate before returning
    gate: Option<(Mutex<std_mpsc::Receiver<()>>, mpsc::UnboundedSender<()>)>,
}

impl FakeGenerator {
    fn new(script: Script) -> Self {
        Self {
            script,
            windows: Mutex::new(Vec::new()),
            gate: None,
        }
    }
}

impl DocumentGenerator for FakeGenerator {
    fn generate_document(
        &self,
        _storage: &dyn ReportStorage,
        since: Timestamp,
        last_ping_time: Timestamp,
        _profile_path: &Path,
    ) -> ReportResult<Option<ReportDocument>> {
        self.windows.lock().unwrap().push((since, last_ping_time));

        if let Some((gate, entered)) = &self.gate {
            let _ = entered.send(());
            let _ = gate.lock().unwrap().recv();
        }

        match &self.script {
            Script::Document(value) => ReportDocument::from_value(value.clone()).map(Some),
            Script::Nothing => Ok(None),
            Script::Fail => Err(ReportError::GenerationFailure("scripted".to_string())),
            Script::Sleep(duration) => {
                std::thread::sleep(*duration);
                Ok(Some(ReportDocument::empty()))
            }
        }
    }
}

/// Forwards response payloads into a channel
struct ResponseTap {
    journal: Journal,
    sender: mpsc::UnboundedSender<String>,
}

impl EventListener for ResponseTap {
    fn handle_message(&self, _event: &str, payload: Option<&str>) {
        note(&self.journal, "response");
        let _ = self.sender.send(payload.unwrap_or_default().to_string());
    }
}

struct Harness {
    _temp: TempDir,
    journal: Journal,
    bridge: Arc<LocalBridge>,
    prefs: Arc<MemoryPrefs>,
    generator: Arc<FakeGenerator>,
    reporter: Arc<HealthReporter>,
    responses: mpsc::UnboundedReceiver<String>,
    _tap: healthreportd::bridge::Subscription,
}

fn harness(available: bool, generator: FakeGenerator, settings: ReporterSettings) -> Harness {
    let temp = TempDir::new().unwrap();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let bridge = Arc::new(LocalBridge::new());
    let prefs = Arc::new(MemoryPrefs::new());
    let generator = Arc::new(generator);

    let parts = EngineParts {
        storage: Arc::new(FakeProvider::new(available, journal.clone())),
        generator: generator.clone(),
        prefs: prefs.clone(),
        profiles: Arc::new(DirectoryProfile::new(temp.path())),
        clock: Arc::new(FixedClock::new(NOW)),
        policy: WindowPolicy::default(),
    };

    let reporter = Arc::new(
        HealthReporter::new(
            Some(ExecutionContext::current(temp.path()).unwrap()),
            parts,
            bridge.clone(),
            settings,
        )
        .unwrap(),
    );
    reporter.start();

    let (sender, responses) = mpsc::unbounded_channel();
    let tap = bridge.subscribe(
        EVENT_RESPONSE,
        Arc::new(ResponseTap {
            journal: journal.clone(),
            sender,
        }),
    );

    Harness {
        _temp: temp,
        journal,
        bridge,
        prefs,
        generator,
        reporter,
        responses,
        _tap: tap,
    }
}

impl Harness {
    fn request(&self, payload: Option<&str>) {
        assert_eq!(self.bridge.dispatch(EVENT_REQUEST, payload), 1);
    }

    async fn next_response(&mut self) -> String {
        tokio::time::timeout(WAIT, self.responses.recv())
            .await
            .expect("no response in time")
            .expect("response channel closed")
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn releases(&self) -> usize {
        self.journal()
            .iter()
            .filter(|e| e.starts_with("release:"))
            .count()
    }
}

fn days_document() -> serde_json::Value {
    json!({"days": {"2026-10-17": {"org.example.sessions": {"_v": 1, "normal": 3}}}})
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storage_unavailable_responds_empty() {
    let mut h = harness(
        false,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    h.request(None);
    assert_eq!(h.next_response().await, "{}");
    assert_eq!(h.releases(), 0);
    assert!(h.generator.windows.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_document_released_before_response() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    h.request(None);
    let payload = h.next_response().await;
    let expected = ReportDocument::from_value(days_document()).unwrap().to_payload();
    assert_eq!(payload, expected);

    assert_eq!(h.journal(), vec!["acquire:1", "release:1", "response"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_window_without_prior_upload() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    h.request(None);
    h.next_response().await;

    let windows = h.generator.windows.lock().unwrap().clone();
    assert_eq!(windows, vec![(NOW - MILLISECONDS_PER_SIX_MONTHS, EARLIEST_LAST_PING)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_window_uses_last_upload() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );
    let uploaded = NOW - 3_600_000;
    h.prefs.set_i64(PREFS_BRANCH, PREF_LAST_UPLOAD_LOCAL_TIME, uploaded);

    h.request(None);
    h.next_response().await;

    let windows = h.generator.windows.lock().unwrap().clone();
    assert_eq!(windows, vec![(NOW - MILLISECONDS_PER_SIX_MONTHS, uploaded)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_overrides_window() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    let since = NOW - 10_000;
    let last_ping = NOW - 5_000;
    h.request(Some(&format!(r#"{{"since":{},"lastPingTime":{}}}"#, since, last_ping)));
    assert_ne!(h.next_response().await, "{}");
    assert_eq!(h.generator.windows.lock().unwrap().clone(), vec![(since, last_ping)]);

    // Inverted window never reaches storage
    h.request(Some(&format!(r#"{{"since":{},"lastPingTime":{}}}"#, last_ping, since)));
    assert_eq!(h.next_response().await, "{}");
    assert_eq!(h.generator.windows.lock().unwrap().len(), 1);
    assert_eq!(h.releases(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_since_only_override_without_upload() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    let since = NOW - 7 * MILLISECONDS_PER_DAY;
    h.request(Some(&format!(r#"{{"since":{}}}"#, since)));
    let expected = ReportDocument::from_value(days_document()).unwrap().to_payload();
    assert_eq!(h.next_response().await, expected);

    let windows = h.generator.windows.lock().unwrap().clone();
    assert_eq!(windows, vec![(since, EARLIEST_LAST_PING)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_ping_only_override_without_upload() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    let last_ping = NOW - MILLISECONDS_PER_DAY;
    h.request(Some(&format!(r#"{{"lastPingTime":{}}}"#, last_ping)));
    let expected = ReportDocument::from_value(days_document()).unwrap().to_payload();
    assert_eq!(h.next_response().await, expected);

    let windows = h.generator.windows.lock().unwrap().clone();
    assert_eq!(windows, vec![(NOW - MILLISECONDS_PER_SIX_MONTHS, last_ping)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_future_override_responds_empty() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    h.request(Some(&format!(r#"{{"since":{}}}"#, NOW + 1)));
    assert_eq!(h.next_response().await, "{}");
    assert!(h.generator.windows.lock().unwrap().is_empty());
    assert_eq!(h.releases(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_request_gets_one_response() {
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Document(days_document())),
        ReporterSettings::default(),
    );

    h.request(None);
    h.request(Some("not json"));
    h.next_response().await;
    h.next_response().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.responses.try_recv().is_err());
    assert_eq!(h.releases(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_document_releases_once() {
    let mut h = harness(true, FakeGenerator::new(Script::Nothing), ReporterSettings::default());

    h.request(None);
    assert_eq!(h.next_response().await, "{}");
    assert_eq!(h.journal(), vec!["acquire:1", "release:1", "response"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_generator_failure_responds_empty() {
    let mut h = harness(true, FakeGenerator::new(Script::Fail), ReporterSettings::default());

    h.request(None);
    assert_eq!(h.next_response().await, "{}");
    assert_eq!(h.releases(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_responds_empty_then_releases() {
    let settings = ReporterSettings {
        generation_timeout: Duration::from_millis(100),
        ..ReporterSettings::default()
    };
    let mut h = harness(
        true,
        FakeGenerator::new(Script::Sleep(Duration::from_millis(500))),
        settings,
    );

    h.request(None);
    assert_eq!(h.next_response().await, "{}");
    assert_eq!(h.releases(), 0);

    // The late generation still gives its lease back and sends nothing
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(h.releases(), 1);
    assert!(h.responses.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_responds_empty_immediately() {
    let (open, gate) = std_mpsc::channel();
    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let mut generator = FakeGenerator::new(Script::Document(days_document()));
    generator.gate = Some((Mutex::new(gate), entered_tx));

    let settings = ReporterSettings {
        workers: 1,
        queue_capacity: 1,
        generation_timeout: Duration::from_secs(30),
    };
    let mut h = harness(true, generator, settings);

    // First request occupies the only worker
    h.request(None);
    tokio::time::timeout(WAIT, entered.recv()).await.unwrap();

    // Second fills the queue, third is rejected
    h.request(None);
    h.request(None);
    assert_eq!(h.next_response().await, "{}");

    open.send(()).unwrap();
    open.send(()).unwrap();
    assert_ne!(h.next_response().await, "{}");
    assert_ne!(h.next_response().await, "{}");
    assert_eq!(h.releases(), 2);
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_unsubscribes() {
    let h = harness(true, FakeGenerator::new(Script::Nothing), ReporterSettings::default());
    assert!(h.reporter.is_started());

    h.reporter.start();
    assert_eq!(h.bridge.listener_count(EVENT_REQUEST), 1);

    h.reporter.stop();
    assert!(!h.reporter.is_started());
    assert_eq!(h.bridge.listener_count(EVENT_REQUEST), 0);
    assert_eq!(h.bridge.dispatch(EVENT_REQUEST, None), 0);

    // Stopping again is harmless
    h.reporter.stop();
}

#[tokio::test]
async fn test_dropped_reporter_stops_listening() {
    let h = harness(true, FakeGenerator::new(Script::Nothing), ReporterSettings::default());
    let Harness { reporter, bridge, .. } = h;

    drop(reporter);
    assert_eq!(bridge.listener_count(EVENT_REQUEST), 0);
}

#[test]
fn test_requires_execution_context() {
    let bridge = Arc::new(LocalBridge::new());
    let temp = TempDir::new().unwrap();
    let parts = EngineParts {
        storage: Arc::new(FakeProvider::new(true, Arc::new(Mutex::new(Vec::new())))),
        generator: Arc::new(FakeGenerator::new(Script::Nothing)),
        prefs: Arc::new(MemoryPrefs::new()),
        profiles: Arc::new(DirectoryProfile::new(temp.path())),
        clock: Arc::new(FixedClock::new(NOW)),
        policy: WindowPolicy::default(),
    };

    let result = HealthReporter::new(None, parts, bridge, ReporterSettings::default());
    assert!(matches!(result, Err(ReportError::NoExecutionContext)));
}
