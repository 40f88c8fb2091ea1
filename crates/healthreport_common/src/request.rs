//! Request payloads and socket frames.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Body of a `HealthReport:Request` signal.
///
/// Both timestamps are optional overrides; absent fields fall back to the
/// computed window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ping_time: Option<Timestamp>,
}

impl ReportRequest {
    /// Parse a request payload. No payload is required, so an absent, blank
    /// or `null` body is the default request. A malformed body is logged and
    /// also treated as the default request.
    pub fn parse(payload: Option<&str>) -> Self {
        let body = match payload.map(str::trim) {
            None | Some("") | Some("null") => return Self::default(),
            Some(body) => body,
        };

        match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed report request payload: {}", e);
                Self::default()
            }
        }
    }

    pub fn has_overrides(&self) -> bool {
        self.since.is_some() || self.last_ping_time.is_some()
    }
}

/// One line on the socket transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl BridgeMessage {
    pub fn new(event: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}
