use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use quarry_core::connection::{Connection, DataSourceId};
use quarry_core::profiles::{ConnectionProfile, FileProfilesStore, ProfilesError};
use quarry_core::services::{ConnectionService, TransportError};
use tracing::{debug, info};

/// Serves the connection list from the local profile file.
#[derive(Debug)]
pub struct ProfileConnectionService {
    store: Mutex<FileProfilesStore>,
}

impl ProfileConnectionService {
    #[must_use]
    pub fn new(store: FileProfilesStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    #[must_use]
    pub fn profile(&self, id: DataSourceId) -> Option<ConnectionProfile> {
        self.lock().profile(id).cloned()
    }

    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.lock().connections()
    }

    pub fn reload(&self) -> Result<(), TransportError> {
        self.lock().reload().map_err(to_transport_error)
    }

    fn lock(&self) -> MutexGuard<'_, FileProfilesStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConnectionService for ProfileConnectionService {
    async fn list_connections(&self, refresh: bool) -> Result<Vec<Connection>, TransportError> {
        let mut store = self.lock();
        if refresh {
            store.reload().map_err(to_transport_error)?;
            debug!(path = %store.path().display(), "profiles reloaded");
        }
        Ok(store.connections())
    }

    async fn remove_connection(&self, id: DataSourceId) -> Result<(), TransportError> {
        let mut store = self.lock();
        if !store.delete_profile(id) {
            return Err(TransportError::new(format!("connection {id} does not exist")));
        }
        store.persist().map_err(to_transport_error)?;
        info!(data_source_id = id, "profile removed");
        Ok(())
    }
}

fn to_transport_error(error: ProfilesError) -> TransportError {
    TransportError::new(error.to_string())
}
