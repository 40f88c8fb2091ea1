//! Active profile resolution.

use healthreport_common::{ReportError, ReportResult};
use std::path::PathBuf;

pub trait ProfileResolver: Send + Sync {
    /// Absolute path of the profile reports are generated for
    fn active_profile_path(&self) -> ReportResult<PathBuf>;
}

/// Profile living in a configured directory
#[derive(Debug, Clone)]
pub struct DirectoryProfile {
    dir: PathBuf,
}

impl DirectoryProfile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ProfileResolver for DirectoryProfile {
    fn active_profile_path(&self) -> ReportResult<PathBuf> {
        if !self.dir.is_dir() {
            return Err(ReportError::NoActiveProfile(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        self.dir
            .canonicalize()
            .map_err(|e| ReportError::NoActiveProfile(format!("{}: {}", self.dir.display(), e)))
    }
}
