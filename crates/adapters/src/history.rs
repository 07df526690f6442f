use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_core::services::{HistoryRecord, HistoryService, TransportError};
use thiserror::Error;
use tracing::debug;

pub const HISTORY_FILE_NAME: &str = "history.ndjson";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid history path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append history record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read history file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed history line {line} in {path}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only query history, one JSON record per line.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| HistoryError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered =
            serde_json::to_string(record).map_err(|source| HistoryError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Every stored record, oldest first.
    pub fn records(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| HistoryError::Read {
            path: self.path.clone(),
            source,
        })?;

        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| HistoryError::Parse {
                    path: self.path.clone(),
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}

#[async_trait]
impl HistoryService for FileHistoryStore {
    async fn create_history(&self, record: &HistoryRecord) -> Result<(), TransportError> {
        self.append(record)
            .map_err(|error| TransportError::new(error.to_string()))?;
        debug!(name = %record.name, path = %self.path.display(), "history recorded");
        Ok(())
    }
}
