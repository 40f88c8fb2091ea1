//! Shared types for the health report service.
//!
//! Error taxonomy, report window arithmetic, the report document, wire
//! messages and the persisted preferences store live here so the daemon and
//! any client agree on names and formats.

pub mod document;
pub mod error;
pub mod prefs;
pub mod request;
pub mod time;
pub mod window;

pub use document::ReportDocument;
pub use error::{ReportError, ReportResult};
pub use prefs::{JsonPrefsStore, MemoryPrefs, PrefsStore};
pub use request::{BridgeMessage, ReportRequest};
pub use time::{Clock, FixedClock, SystemClock, Timestamp};
pub use window::{ReportWindow, WindowPolicy};

/// Inbound signal asking for a report
pub const EVENT_REQUEST: &str = "HealthReport:Request";

/// Outbound signal carrying the serialized report
pub const EVENT_RESPONSE: &str = "HealthReport:Response";

/// Preferences branch holding uploader bookkeeping
pub const PREFS_BRANCH: &str = "background";

/// Last successful upload, milliseconds since epoch (written by the uploader)
pub const PREF_LAST_UPLOAD_LOCAL_TIME: &str = "healthreport_last_upload_local_time";

pub const MILLISECONDS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
pub const MILLISECONDS_PER_SIX_MONTHS: i64 = 180 * MILLISECONDS_PER_DAY;

/// Floor for `lastPingTime` (2013-05-02T13:06:40Z)
pub const EARLIEST_LAST_PING: Timestamp = 1_367_500_000_000;

/// Version stamped into every generated document
pub const PAYLOAD_VERSION: u32 = 2;
