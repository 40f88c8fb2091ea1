//! Reporting time window.
//!
//! A report covers `[since, last_ping_time]`. By default `since` sits six
//! months before now and `last_ping_time` is the last upload, floored at the
//! earliest allowed ping and never later than now.

use crate::error::{ReportError, ReportResult};
use crate::time::Timestamp;
use crate::{EARLIEST_LAST_PING, MILLISECONDS_PER_SIX_MONTHS};
use serde::{Deserialize, Serialize};

/// Knobs for computing the default window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Width of the lookback, in milliseconds
    pub window_ms: i64,
    /// Floor for `last_ping_time`
    pub earliest_last_ping: Timestamp,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            window_ms: MILLISECONDS_PER_SIX_MONTHS,
            earliest_last_ping: EARLIEST_LAST_PING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWindow {
    pub since: Timestamp,
    pub last_ping_time: Timestamp,
}

impl ReportWindow {
    /// Default window for a report generated at `now`.
    ///
    /// `since` is exact to the millisecond. A persisted upload time in the
    /// future (clock skew) is clamped to `now`.
    pub fn compute(now: Timestamp, last_upload: Timestamp, policy: &WindowPolicy) -> Self {
        let since = now.saturating_sub(policy.window_ms);
        let last_ping_time = last_upload.max(policy.earliest_last_ping).min(now);
        Self {
            since,
            last_ping_time,
        }
    }

    /// Apply caller overrides to a computed window.
    ///
    /// Supplied timestamps may not lie after `now`. Ordering is only
    /// enforced when both are supplied; a single override keeps the other
    /// bound from `self` as is, like the computed window itself.
    pub fn with_overrides(
        self,
        since: Option<Timestamp>,
        last_ping_time: Option<Timestamp>,
        now: Timestamp,
    ) -> ReportResult<Self> {
        match (since, last_ping_time) {
            (Some(since), Some(last_ping_time)) => Self::checked(since, last_ping_time, now),
            (since, last_ping_time) => {
                let window = Self {
                    since: since.unwrap_or(self.since),
                    last_ping_time: last_ping_time.unwrap_or(self.last_ping_time),
                };
                if window.since > now || window.last_ping_time > now {
                    return Err(ReportError::InvalidWindow {
                        since: window.since,
                        last_ping_time: window.last_ping_time,
                        now,
                    });
                }
                Ok(window)
            }
        }
    }

    /// Window supplied by a caller; must satisfy `since <= last_ping_time <= now`
    pub fn checked(since: Timestamp, last_ping_time: Timestamp, now: Timestamp) -> ReportResult<Self> {
        if since > last_ping_time || last_ping_time > now {
            return Err(ReportError::InvalidWindow {
                since,
                last_ping_time,
                now,
            });
        }
        Ok(Self {
            since,
            last_ping_time,
        })
    }
}
