//! Health report service.
//!
//! Bridges `HealthReport:Request` signals to `HealthReport:Response` signals.
//! Requests are queued onto the worker pool and answered from there; every
//! accepted request gets exactly one response, and any failure is answered
//! with an empty document.

use crate::bridge::{EventBridge, EventListener, Subscription};
use crate::config::ReportConfig;
use crate::context::ExecutionContext;
use crate::engine::{EngineParts, ReportEngine};
use crate::pool::WorkerPool;
use healthreport_common::{
    ReportDocument, ReportError, ReportRequest, ReportResult, EVENT_REQUEST, EVENT_RESPONSE,
};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pool and deadline settings
#[derive(Debug, Clone, Copy)]
pub struct ReporterSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub generation_timeout: Duration,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self::from(&ReportConfig::default())
    }
}

impl From<&ReportConfig> for ReporterSettings {
    fn from(config: &ReportConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            generation_timeout: config.generation_timeout(),
        }
    }
}

/// One queued request; carries only what generation needs
struct ReportTask {
    id: Uuid,
    request: ReportRequest,
}

pub struct HealthReporter {
    engine: Arc<ReportEngine>,
    bridge: Arc<dyn EventBridge>,
    pool: WorkerPool<ReportTask>,
    subscription: Mutex<Option<Subscription>>,
}

impl HealthReporter {
    /// Build the service. Without an execution context there is nowhere to
    /// run generation, so construction fails.
    pub fn new(
        context: Option<ExecutionContext>,
        parts: EngineParts,
        bridge: Arc<dyn EventBridge>,
        settings: ReporterSettings,
    ) -> ReportResult<Self> {
        let context = context.ok_or(ReportError::NoExecutionContext)?;
        let runtime = context.runtime().clone();
        let engine = Arc::new(ReportEngine::new(context, parts));

        let pool = {
            let engine = Arc::clone(&engine);
            let bridge = Arc::clone(&bridge);
            let timeout = settings.generation_timeout;
            WorkerPool::spawn(&runtime, settings.workers, settings.queue_capacity, move |task| {
                run_task(Arc::clone(&engine), Arc::clone(&bridge), timeout, task)
            })
        };

        info!(
            "Health reporter ready ({} workers, queue {}, timeout {:?})",
            pool.workers(),
            settings.queue_capacity,
            settings.generation_timeout
        );

        Ok(Self {
            engine,
            bridge,
            pool,
            subscription: Mutex::new(None),
        })
    }

    /// Register for the request signal. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            debug!("Health reporter already started");
            return;
        }

        let listener = Arc::new(RequestListener {
            reporter: Arc::downgrade(self),
        });
        *slot = Some(self.bridge.subscribe(EVENT_REQUEST, listener));
        info!("Listening for {}", EVENT_REQUEST);
    }

    /// Unregister the request signal. Generations already queued still run
    /// and still respond.
    pub fn stop(&self) {
        let taken = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut subscription) = taken {
            subscription.cancel();
            info!("Stopped listening for {}", EVENT_REQUEST);
        }
    }

    /// Stop and refuse further queueing; queued work drains
    pub fn shutdown(&self) {
        self.stop();
        self.pool.close();
    }

    pub fn is_started(&self) -> bool {
        self.subscription
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Entry point for a request signal. Never blocks on I/O: the work is
    /// queued and this returns immediately.
    pub fn on_request(&self, payload: Option<&str>) {
        let task = ReportTask {
            id: Uuid::new_v4(),
            request: ReportRequest::parse(payload),
        };
        debug!("Queueing report request {}", task.id);

        if let Err(rejected) = self.pool.try_submit(task) {
            let reason = rejected.reason();
            let task = rejected.into_inner();
            error!(
                "Report request {} not queued ({}); responding with empty report",
                task.id, reason
            );
            respond(self.bridge.as_ref(), &ReportDocument::empty());
        }
    }
}

struct RequestListener {
    reporter: Weak<HealthReporter>,
}

impl EventListener for RequestListener {
    fn handle_message(&self, event: &str, payload: Option<&str>) {
        match self.reporter.upgrade() {
            Some(reporter) => reporter.on_request(payload),
            None => warn!("Dropping {}: reporter is gone", event),
        }
    }
}

async fn run_task(
    engine: Arc<ReportEngine>,
    bridge: Arc<dyn EventBridge>,
    timeout: Duration,
    task: ReportTask,
) {
    let ReportTask { id, request } = task;
    let started = Instant::now();

    // The blocking generation owns its own lease; if the deadline passes it
    // keeps running to completion and releases it there.
    let work = tokio::task::spawn_blocking(move || engine.generate_for_request(&request));

    let document = match tokio::time::timeout(timeout, work).await {
        Ok(Ok(Ok(document))) => {
            info!(
                "Report {} generated in {}ms",
                id,
                started.elapsed().as_millis()
            );
            document
        }
        Ok(Ok(Err(e))) => {
            error!(
                "Generating report {} failed [{}]; responding with empty report: {}",
                id,
                e.kind(),
                e
            );
            ReportDocument::empty()
        }
        Ok(Err(e)) => {
            error!(
                "Report {} generation task aborted; responding with empty report: {}",
                id, e
            );
            ReportDocument::empty()
        }
        Err(_) => {
            warn!(
                "Report {} exceeded {:?}; responding with empty report",
                id, timeout
            );
            ReportDocument::empty()
        }
    };

    respond(bridge.as_ref(), &document);
}

fn respond(bridge: &dyn EventBridge, document: &ReportDocument) {
    if document.is_empty() {
        debug!("Sending empty {}", EVENT_RESPONSE);
    }
    bridge.send_event(EVENT_RESPONSE, document.to_payload());
}
