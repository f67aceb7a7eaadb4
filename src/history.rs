//! On-disk history of past runs.
//!
//! Every run log is written to its own file named after the local time the run
//! finished, e.g. `meshbook_run_2024_05_01_14_03_59.log`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::RunLog;

/// File name prefix of history entries
pub const FILE_PREFIX: &str = "meshbook_run_";

/// File name suffix of history entries
pub const FILE_SUFFIX: &str = ".log";

/// A directory of run logs
#[derive(Debug, Clone)]
pub struct History {
    dir: PathBuf,
}

impl History {
    /// Open (and create if needed) the history directory.
    ///
    /// With `flush` set, every existing entry is deleted first.
    pub fn open(dir: impl Into<PathBuf>, flush: bool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::history(&dir, e.to_string()))?;
        let history = Self { dir };

        let entries = history.entries()?;
        debug!(dir = %history.dir.display(), count = entries.len(), "Opened history");
        if flush {
            for entry in &entries {
                std::fs::remove_file(entry).map_err(|e| Error::history(entry, e.to_string()))?;
            }
            info!(removed = entries.len(), "Flushed history");
        }
        Ok(history)
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Existing history files, sorted by name (and so by time)
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let read = std::fs::read_dir(&self.dir).map_err(|e| Error::history(&self.dir, e.to_string()))?;
        let mut entries = Vec::new();
        for entry in read {
            let path = entry?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX));
            if is_entry && path.is_file() {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Write a run log stamped with the current local time
    pub fn write(&self, log: &RunLog) -> Result<PathBuf> {
        self.write_at(log, Local::now())
    }

    /// Write a run log stamped with `at`.
    ///
    /// Fails rather than overwrite an existing entry.
    pub fn write_at(&self, log: &RunLog, at: DateTime<Local>) -> Result<PathBuf> {
        let path = self.dir.join(file_name(at));
        let content = log.to_json(true)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::history(&path, e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Error::history(&path, e.to_string()))?;
        info!(path = %path.display(), "Saved run history");
        Ok(path)
    }
}

/// History file name for a timestamp
pub fn file_name(at: DateTime<Local>) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", at.format("%Y_%m_%d_%H_%M_%S"))
}
