use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use quarry_core::connection::DataSourceId;
use quarry_core::services::TableParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PINS_FILE_NAME: &str = "pins.toml";

/// A pinned table, scoped by everything above it in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PinnedTable {
    pub data_source_id: DataSourceId,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    pub table_name: String,
}

impl PinnedTable {
    /// `None` when the params carry no data source.
    #[must_use]
    pub fn from_params(params: &TableParams) -> Option<Self> {
        Some(Self {
            data_source_id: params.data_source_id?,
            database_name: params.database_name.clone(),
            schema_name: params.schema_name.clone(),
            table_name: params.table_name.clone(),
        })
    }
}

#[derive(Debug, Error)]
pub enum PinsError {
    #[error("table `{0}` has no data source to pin it under")]
    MissingDataSource(String),
    #[error("failed to read pins file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pins file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create pins directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize pins: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write pins file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PinsDocument {
    #[serde(default)]
    pins: Vec<PinnedTable>,
}

#[derive(Debug, Clone)]
pub struct FilePinStore {
    path: PathBuf,
    pins: BTreeSet<PinnedTable>,
}

impl FilePinStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, PinsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                pins: BTreeSet::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| PinsError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                pins: BTreeSet::new(),
            });
        }

        let doc: PinsDocument = toml::from_str(&raw).map_err(|source| PinsError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            pins: doc.pins.into_iter().collect(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_pinned(&self, pin: &PinnedTable) -> bool {
        self.pins.contains(pin)
    }

    /// Pins and persists. Pinning twice is not an error.
    pub fn pin(&mut self, params: &TableParams) -> Result<(), PinsError> {
        let pin = PinnedTable::from_params(params)
            .ok_or_else(|| PinsError::MissingDataSource(params.table_name.clone()))?;
        if self.pins.insert(pin) {
            self.persist()?;
        }
        Ok(())
    }

    pub fn unpin(&mut self, params: &TableParams) -> Result<(), PinsError> {
        let pin = PinnedTable::from_params(params)
            .ok_or_else(|| PinsError::MissingDataSource(params.table_name.clone()))?;
        if self.pins.remove(&pin) {
            self.persist()?;
        }
        Ok(())
    }

    pub fn persist(&self) -> Result<(), PinsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| PinsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = PinsDocument {
            pins: self.pins.iter().cloned().collect(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| PinsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| PinsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::connection::DatabaseType;
    use quarry_core::services::TableParams;
    use tempfile::TempDir;

    use super::{FilePinStore, PinnedTable, PinsError};

    fn params(table_name: &str) -> TableParams {
        TableParams {
            data_source_id: Some(1),
            database_type: Some(DatabaseType::Mysql),
            database_name: Some("app".to_string()),
            schema_name: None,
            table_name: table_name.to_string(),
        }
    }

    #[test]
    fn pins_survive_a_reload() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("pins.toml");

        let mut store = FilePinStore::load_from_path(&path).expect("store should load");
        store.pin(&params("users")).expect("pin should succeed");
        store.pin(&params("users")).expect("second pin is a no-op");
        store.pin(&params("orders")).expect("pin should succeed");

        let reloaded = FilePinStore::load_from_path(&path).expect("store should reload");
        let users = PinnedTable::from_params(&params("users")).expect("params have a source");
        assert!(reloaded.is_pinned(&users));

        let mut other_database = users.clone();
        other_database.database_name = Some("billing".to_string());
        assert!(!reloaded.is_pinned(&other_database));
    }

    #[test]
    fn unpin_removes_only_the_named_table() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("pins.toml");

        let mut store = FilePinStore::load_from_path(&path).expect("store should load");
        store.pin(&params("users")).expect("pin should succeed");
        store.pin(&params("orders")).expect("pin should succeed");
        store.unpin(&params("users")).expect("unpin should succeed");
        store.unpin(&params("missing")).expect("unpinning an unknown table is a no-op");

        let reloaded = FilePinStore::load_from_path(&path).expect("store should reload");
        let orders = PinnedTable::from_params(&params("orders")).expect("params have a source");
        let users = PinnedTable::from_params(&params("users")).expect("params have a source");
        assert!(reloaded.is_pinned(&orders));
        assert!(!reloaded.is_pinned(&users));
    }

    #[test]
    fn pinning_without_a_data_source_fails() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut store =
            FilePinStore::load_from_path(temp_dir.path().join("pins.toml")).expect("store");

        let mut orphan = params("users");
        orphan.data_source_id = None;
        assert!(matches!(
            store.pin(&orphan),
            Err(PinsError::MissingDataSource(table)) if table == "users"
        ));
    }
}
