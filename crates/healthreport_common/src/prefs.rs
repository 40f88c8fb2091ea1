//! Persisted scalar preferences.
//!
//! The uploader owns the write path; the report service only reads. Reads
//! never fail: a missing file, unreadable file or wrong-typed value yields
//! the caller's default.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

pub trait PrefsStore: Send + Sync {
    fn read_i64(&self, branch: &str, key: &str, default: i64) -> i64;
}

/// JSON file laid out as `{"<branch>": {"<key>": <value>}}`
#[derive(Debug, Clone)]
pub struct JsonPrefsStore {
    path: PathBuf,
}

impl JsonPrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Option<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No prefs file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read prefs {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(root)) => Some(root),
            Ok(_) => {
                warn!("Prefs {} is not a JSON object", self.path.display());
                None
            }
            Err(e) => {
                warn!("Failed to parse prefs {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Write a value, creating the file and branch as needed
    pub fn write_i64(&self, branch: &str, key: &str, value: i64) -> io::Result<()> {
        let mut root = self.load().unwrap_or_default();
        let section = root
            .entry(branch.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Value::Object(section) = section {
            section.insert(key.to_string(), Value::from(value));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so readers never observe a torn file
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&Value::Object(root))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)
    }
}

impl PrefsStore for JsonPrefsStore {
    fn read_i64(&self, branch: &str, key: &str, default: i64) -> i64 {
        let Some(root) = self.load() else {
            return default;
        };

        match root.get(branch).and_then(|section| section.get(key)) {
            None => default,
            Some(value) => value.as_i64().unwrap_or_else(|| {
                warn!("Pref {}.{} is not an integer: {}", branch, key, value);
                default
            }),
        }
    }
}

/// In-memory store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_i64(&self, branch: &str, key: &str, value: i64) {
        if let Ok(mut values) = self.values.lock() {
            values.insert((branch.to_string(), key.to_string()), value);
        }
    }
}

impl PrefsStore for MemoryPrefs {
    fn read_i64(&self, branch: &str, key: &str, default: i64) -> i64 {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(&(branch.to_string(), key.to_string())).copied())
            .unwrap_or(default)
    }
}
