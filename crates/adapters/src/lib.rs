pub mod connections;
pub mod history;
pub mod mysql;
pub mod pins;

use std::path::Path;
use std::sync::Arc;

use quarry_core::config::{StorageSettings, WorkspaceSettings};
use quarry_core::profiles::{FileProfilesStore, ProfilesError, PROFILES_FILE_NAME};
use quarry_core::WorkspaceServices;
use thiserror::Error;
use tracing::debug;

use crate::connections::ProfileConnectionService;
use crate::history::{FileHistoryStore, HISTORY_FILE_NAME};
use crate::mysql::MysqlWorkspaceBackend;
use crate::pins::{FilePinStore, PinsError, PINS_FILE_NAME};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Profiles(#[from] ProfilesError),
    #[error(transparent)]
    Pins(#[from] PinsError),
}

/// The file-backed stores and the MySQL backend, wired together.
#[derive(Debug, Clone)]
pub struct LocalAdapters {
    pub connections: Arc<ProfileConnectionService>,
    pub backend: Arc<MysqlWorkspaceBackend>,
    pub history: Arc<FileHistoryStore>,
}

impl LocalAdapters {
    pub fn open(config_dir: &Path, storage: &StorageSettings) -> Result<Self, AdapterError> {
        let profiles_path = WorkspaceSettings::resolve_path(
            config_dir,
            storage.profiles_path.as_deref(),
            PROFILES_FILE_NAME,
        );
        let pins_path =
            WorkspaceSettings::resolve_path(config_dir, storage.pins_path.as_deref(), PINS_FILE_NAME);
        let history_path = WorkspaceSettings::resolve_path(
            config_dir,
            storage.history_path.as_deref(),
            HISTORY_FILE_NAME,
        );
        debug!(
            profiles = %profiles_path.display(),
            pins = %pins_path.display(),
            history = %history_path.display(),
            "opening local stores"
        );

        let connections = Arc::new(ProfileConnectionService::new(
            FileProfilesStore::load_from_path(profiles_path)?,
        ));
        let backend = Arc::new(MysqlWorkspaceBackend::new(
            Arc::clone(&connections),
            FilePinStore::load_from_path(pins_path)?,
        ));

        Ok(Self {
            connections,
            backend,
            history: Arc::new(FileHistoryStore::from_path(history_path)),
        })
    }

    #[must_use]
    pub fn services(&self) -> WorkspaceServices {
        WorkspaceServices {
            connections: self.backend.clone(),
            tree: self.backend.clone(),
            sql: self.backend.clone(),
            history: self.history.clone(),
        }
    }
}
