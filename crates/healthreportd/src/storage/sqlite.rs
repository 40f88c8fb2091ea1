//! SQLite-backed record storage and its lease-counting provider.
//!
//! Schema:
//! - environments: one row per distinct environment, keyed by content hash
//! - daily_values: per-day field values attributed to an environment
//! - storage_meta: key-value metadata (current environment id)

use super::{storage_err, DailyValue, EnvironmentRecord, FieldKind, ReportStorage, StorageHandle, StorageProvider};
use crate::context::ExecutionContext;
use healthreport_common::ReportResult;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Database file inside a profile directory
pub const STORAGE_FILENAME: &str = "healthreport.db";

const META_CURRENT_ENVIRONMENT: &str = "current_environment";

pub struct SqliteStorage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the store at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> ReportResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(storage_err)?;

        // WAL lets the recorder keep writing while a report reads
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(storage_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day INTEGER NOT NULL,
                env INTEGER NOT NULL REFERENCES environments(id),
                measurement TEXT NOT NULL,
                version INTEGER NOT NULL,
                field TEXT NOT NULL,
                kind TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_values_day ON daily_values(day);
            CREATE INDEX IF NOT EXISTS idx_values_slot
                ON daily_values(day, env, measurement, field);

            CREATE TABLE IF NOT EXISTS storage_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(storage_err)?;

        debug!("Opened record storage at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Open the store belonging to a profile directory
    pub fn open_for_profile(profile_path: &Path) -> ReportResult<Self> {
        Self::open_at(profile_path.join(STORAGE_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> ReportResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| storage_err("storage connection lock poisoned"))
    }

    /// Record an environment, returning its id. Identical environments share
    /// one row.
    pub fn register_environment(&self, attributes: &Map<String, Value>) -> ReportResult<i64> {
        let body = serde_json::to_string(attributes)?;
        let hash = environment_hash(&body);
        let conn = self.conn()?;

        conn.execute(
            "INSERT OR IGNORE INTO environments (hash, body) VALUES (?1, ?2)",
            params![hash, body],
        )
        .map_err(storage_err)?;

        let id = conn
            .query_row("SELECT id FROM environments WHERE hash = ?1", params![hash], |row| {
                row.get(0)
            })
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Attribute subsequent records to `env_id`
    pub fn set_current_environment(&self, env_id: i64) -> ReportResult<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO storage_meta (key, value) VALUES (?1, ?2)",
                params![META_CURRENT_ENVIRONMENT, env_id.to_string()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Add `by` to a counter field for the day
    pub fn increment_counter(
        &self,
        day: i64,
        env_id: i64,
        measurement: &str,
        version: u32,
        field: &str,
        by: i64,
    ) -> ReportResult<()> {
        let conn = self.conn()?;
        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, value FROM daily_values
                 WHERE day = ?1 AND env = ?2 AND measurement = ?3 AND field = ?4 AND kind = ?5",
                params![day, env_id, measurement, field, FieldKind::Counter.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)?;

        match existing {
            Some((id, value)) => {
                let current = serde_json::from_str::<Value>(&value)?.as_i64().unwrap_or(0);
                let total = current.checked_add(by).ok_or_else(|| {
                    storage_err(format!("counter {}.{} overflows on day {}", measurement, field, day))
                })?;
                conn.execute(
                    "UPDATE daily_values SET value = ?1 WHERE id = ?2",
                    params![total.to_string(), id],
                )
                .map_err(storage_err)?;
            }
            None => {
                insert_value(&conn, day, env_id, measurement, version, field, FieldKind::Counter, &Value::from(by))?;
            }
        }
        Ok(())
    }

    /// Replace the day's value of a last-value field
    pub fn record_last(
        &self,
        day: i64,
        env_id: i64,
        measurement: &str,
        version: u32,
        field: &str,
        value: &Value,
    ) -> ReportResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM daily_values
             WHERE day = ?1 AND env = ?2 AND measurement = ?3 AND field = ?4 AND kind = ?5",
            params![day, env_id, measurement, field, FieldKind::Last.as_str()],
        )
        .map_err(storage_err)?;
        insert_value(&conn, day, env_id, measurement, version, field, FieldKind::Last, value)
    }

    /// Append one value of a discrete field
    pub fn record_discrete(
        &self,
        day: i64,
        env_id: i64,
        measurement: &str,
        version: u32,
        field: &str,
        value: &Value,
    ) -> ReportResult<()> {
        let conn = self.conn()?;
        insert_value(&conn, day, env_id, measurement, version, field, FieldKind::Discrete, value)
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_value(
    conn: &Connection,
    day: i64,
    env_id: i64,
    measurement: &str,
    version: u32,
    field: &str,
    kind: FieldKind,
    value: &Value,
) -> ReportResult<()> {
    conn.execute(
        "INSERT INTO daily_values (day, env, measurement, version, field, kind, value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![day, env_id, measurement, version, field, kind.as_str(), value.to_string()],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn environment_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_environment(id: i64, hash: String, body: &str) -> ReportResult<EnvironmentRecord> {
    let attributes = match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => map,
        _ => return Err(storage_err(format!("environment {} is not an object", id))),
    };
    Ok(EnvironmentRecord { id, hash, attributes })
}

impl ReportStorage for SqliteStorage {
    fn current_environment(&self) -> ReportResult<Option<EnvironmentRecord>> {
        let conn = self.conn()?;
        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT e.id, e.hash, e.body FROM environments e
                 JOIN storage_meta m ON m.key = ?1 AND CAST(m.value AS INTEGER) = e.id",
                params![META_CURRENT_ENVIRONMENT],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(storage_err)?;

        row.map(|(id, hash, body)| parse_environment(id, hash, &body))
            .transpose()
    }

    fn environments(&self) -> ReportResult<Vec<EnvironmentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, hash, body FROM environments ORDER BY id")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, String>(2)?)))
            .map_err(storage_err)?;

        let mut environments = Vec::new();
        for row in rows {
            let (id, hash, body) = row.map_err(storage_err)?;
            environments.push(parse_environment(id, hash, &body)?);
        }
        Ok(environments)
    }

    fn values_since(&self, since_day: i64) -> ReportResult<Vec<DailyValue>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT day, env, measurement, version, field, kind, value FROM daily_values
                 WHERE day >= ?1 ORDER BY day, id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![since_day], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(storage_err)?;

        let mut values = Vec::new();
        for row in rows {
            let (day, env_id, measurement, measurement_version, field, kind, value) =
                row.map_err(storage_err)?;
            let Some(kind) = FieldKind::parse(&kind) else {
                warn!("Skipping {}.{} with unknown field kind {}", measurement, field, kind);
                continue;
            };
            values.push(DailyValue {
                day,
                env_id,
                measurement,
                measurement_version,
                field,
                kind,
                value: serde_json::from_str(&value)?,
            });
        }
        Ok(values)
    }
}

#[derive(Default)]
struct ProviderState {
    closed: bool,
    next_id: u64,
    leases: HashSet<u64>,
    storages: HashMap<PathBuf, Arc<SqliteStorage>>,
}

/// Provider owning one `SqliteStorage` per profile.
///
/// Instances are opened on first resolve and kept while any lease is live;
/// releasing the last lease closes them.
#[derive(Default)]
pub struct SqliteStorageProvider {
    state: Mutex<ProviderState>,
}

impl SqliteStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leases not yet released
    pub fn active_leases(&self) -> usize {
        self.state.lock().map(|s| s.leases.len()).unwrap_or(0)
    }

    /// Number of storage instances currently open
    pub fn open_storages(&self) -> usize {
        self.state.lock().map(|s| s.storages.len()).unwrap_or(0)
    }

    /// Refuse new leases; live leases stay valid until released
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            info!("Storage provider closed ({} leases live)", state.leases.len());
        }
    }
}

impl StorageProvider for SqliteStorageProvider {
    fn acquire(&self, context: &ExecutionContext) -> Option<StorageHandle> {
        let mut state = self.state.lock().ok()?;
        if state.closed {
            warn!("Storage provider is closed; refusing lease");
            return None;
        }

        let id = state.next_id;
        state.next_id += 1;
        state.leases.insert(id);
        debug!(
            "Storage lease {} granted under {} ({} live)",
            id,
            context.app_dir().display(),
            state.leases.len()
        );
        Some(StorageHandle::new(id))
    }

    fn resolve(&self, handle: &StorageHandle, profile_path: &Path) -> Option<Arc<dyn ReportStorage>> {
        {
            let state = self.state.lock().ok()?;
            if !state.leases.contains(&handle.id()) {
                warn!("Storage lease {} is not live", handle.id());
                return None;
            }
            if let Some(storage) = state.storages.get(profile_path) {
                return Some(Arc::clone(storage) as Arc<dyn ReportStorage>);
            }
        }

        // Opened without the state lock held; acquires and releases proceed
        let opened = match SqliteStorage::open_for_profile(profile_path) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                warn!("Failed to open storage for {}: {}", profile_path.display(), e);
                return None;
            }
        };

        // A concurrent resolve may have cached the profile first; keep that one
        let mut state = self.state.lock().ok()?;
        let storage = state
            .storages
            .entry(profile_path.to_path_buf())
            .or_insert(opened);
        Some(Arc::clone(storage) as Arc<dyn ReportStorage>)
    }

    fn release(&self, handle: StorageHandle) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !state.leases.remove(&handle.id()) {
            warn!("Release of unknown storage lease {}", handle.id());
            return;
        }
        if state.leases.is_empty() && !state.storages.is_empty() {
            for storage in state.storages.values() {
                debug!("Last lease released; closing {}", storage.path().display());
            }
            state.storages.clear();
        }
    }
}
