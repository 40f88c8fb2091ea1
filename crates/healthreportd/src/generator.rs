//! Report document generation.
//!
//! Pure read over one storage instance. Produces
//! `{version, thisPingDate, lastPingDate?, environments, data: {last, days}}`
//! or nothing when the profile has no current environment yet.

use crate::storage::{DailyValue, EnvironmentRecord, FieldKind, ReportStorage};
use healthreport_common::time::{date_string, day_number, day_to_date_string};
use healthreport_common::{
    Clock, ReportDocument, ReportError, ReportResult, Timestamp, EARLIEST_LAST_PING,
    PAYLOAD_VERSION,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub trait DocumentGenerator: Send + Sync {
    /// `Ok(None)` means there is not enough profile data for a report
    fn generate_document(
        &self,
        storage: &dyn ReportStorage,
        since: Timestamp,
        last_ping_time: Timestamp,
        profile_path: &Path,
    ) -> ReportResult<Option<ReportDocument>>;
}

pub struct HealthReportGenerator {
    clock: Arc<dyn Clock>,
    earliest_last_ping: Timestamp,
}

impl HealthReportGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            earliest_last_ping: EARLIEST_LAST_PING,
        }
    }

    /// Pings before this floor are not reported as `lastPingDate`
    pub fn with_earliest_last_ping(mut self, earliest_last_ping: Timestamp) -> Self {
        self.earliest_last_ping = earliest_last_ping;
        self
    }
}

impl DocumentGenerator for HealthReportGenerator {
    fn generate_document(
        &self,
        storage: &dyn ReportStorage,
        since: Timestamp,
        last_ping_time: Timestamp,
        profile_path: &Path,
    ) -> ReportResult<Option<ReportDocument>> {
        let Some(current) = storage.current_environment()? else {
            info!("No current environment for {}", profile_path.display());
            return Ok(None);
        };

        let environments = storage.environments()?;
        let values = storage.values_since(day_number(since))?;
        debug!(
            "Generating report for {}: {} environments, {} values",
            profile_path.display(),
            environments.len(),
            values.len()
        );

        let mut document = ReportDocument::empty();
        document.insert("version", json!(PAYLOAD_VERSION));
        document.insert("thisPingDate", json!(date_string(self.clock.now_millis())));
        if last_ping_time >= self.earliest_last_ping {
            document.insert("lastPingDate", json!(date_string(last_ping_time)));
        }
        document.insert("environments", environments_json(&current, &environments));
        document.insert(
            "data",
            json!({
                "last": {},
                "days": days_json(&values, &environments)?,
            }),
        );

        Ok(Some(document))
    }
}

/// Current environment in full, every other one as a diff against it
fn environments_json(current: &EnvironmentRecord, all: &[EnvironmentRecord]) -> Value {
    let mut out = Map::new();

    let mut full = current.attributes.clone();
    full.insert("hash".to_string(), json!(current.hash));
    out.insert("current".to_string(), Value::Object(full));

    for env in all.iter().filter(|e| e.id != current.id) {
        let mut diff: Map<String, Value> = env
            .attributes
            .iter()
            .filter(|(key, value)| current.attributes.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        diff.insert("hash".to_string(), json!(env.hash));
        out.insert(env.hash.clone(), Value::Object(diff));
    }

    Value::Object(out)
}

/// `{date: {envHash: {measurement: {"_v": n, field: value}}}}`
fn days_json(values: &[DailyValue], environments: &[EnvironmentRecord]) -> ReportResult<Value> {
    let hashes: HashMap<i64, &str> = environments.iter().map(|e| (e.id, e.hash.as_str())).collect();
    let mut days = Map::new();

    for value in values {
        let Some(hash) = hashes.get(&value.env_id) else {
            warn!("Skipping value for unknown environment {}", value.env_id);
            continue;
        };

        let measurement = object_entry(
            object_entry(
                object_entry(&mut days, day_to_date_string(value.day)),
                (*hash).to_string(),
            ),
            value.measurement.clone(),
        );
        measurement.insert("_v".to_string(), json!(value.measurement_version));

        match value.kind {
            FieldKind::Counter => {
                let previous = measurement.get(&value.field).and_then(Value::as_i64).unwrap_or(0);
                let added = value.value.as_i64().unwrap_or(0);
                let total = previous.checked_add(added).ok_or_else(|| {
                    ReportError::GenerationFailure(format!(
                        "counter {}.{} overflows on day {}",
                        value.measurement, value.field, value.day
                    ))
                })?;
                measurement.insert(value.field.clone(), json!(total));
            }
            FieldKind::Last => {
                measurement.insert(value.field.clone(), value.value.clone());
            }
            FieldKind::Discrete => {
                let slot = measurement
                    .entry(value.field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = slot {
                    items.push(value.value.clone());
                }
            }
        }
    }

    Ok(Value::Object(days))
}

fn object_entry(map: &mut Map<String, Value>, key: String) -> &mut Map<String, Value> {
    let slot = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just made an object"),
    }
}
