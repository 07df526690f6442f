use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{default_config_dir, ConfigError};
use crate::connection::{Connection, DataSourceId, DatabaseType, Environment};

pub const PROFILES_FILE_NAME: &str = "profiles.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

/// A stored connection definition. The workspace only ever sees the
/// [`Connection`] projection; host and credentials stay with the adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: DataSourceId,
    pub alias: String,
    #[serde(default = "default_db_type")]
    pub db_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default)]
    pub tls_accept_invalid_certs: bool,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
    #[serde(default)]
    pub environment: Option<Environment>,
}

fn default_db_type() -> DatabaseType {
    DatabaseType::Mysql
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(
        id: DataSourceId,
        alias: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id,
            alias: alias.into(),
            db_type: DatabaseType::Mysql,
            host: host.into(),
            port: 3306,
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            tls_ca_cert_path: None,
            tls_accept_invalid_certs: false,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
            environment: None,
        }
    }

    #[must_use]
    pub fn to_connection(&self) -> Connection {
        Connection {
            id: self.id,
            alias: self.alias.clone(),
            db_type: self.db_type,
            environment: self.environment.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("failed to resolve config directory: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read profiles file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profiles file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize profiles: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write profiles file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesDocument {
    #[serde(default)]
    profiles: Vec<ConnectionProfile>,
}

impl ProfilesDocument {
    fn normalize(&mut self) {
        let mut by_id = std::collections::BTreeMap::new();
        for profile in self.profiles.drain(..) {
            by_id.insert(profile.id, profile);
        }
        self.profiles = by_id.into_values().collect();
    }
}

#[derive(Debug, Clone)]
pub struct FileProfilesStore {
    path: PathBuf,
    profiles: Vec<ConnectionProfile>,
}

impl FileProfilesStore {
    pub fn load_default() -> Result<Self, ProfilesError> {
        Self::load_from_path(default_profiles_path()?)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ProfilesError> {
        let path = path.into();
        let profiles = read_profiles(&path)?;
        Ok(Self { path, profiles })
    }

    /// Re-reads the backing file, replacing the in-memory list wholesale.
    pub fn reload(&mut self) -> Result<(), ProfilesError> {
        self.profiles = read_profiles(&self.path)?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn profile(&self, id: DataSourceId) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.profiles
            .iter()
            .map(ConnectionProfile::to_connection)
            .collect()
    }

    pub fn upsert_profile(&mut self, profile: ConnectionProfile) {
        if let Some(existing) = self
            .profiles
            .iter_mut()
            .find(|existing| existing.id == profile.id)
        {
            *existing = profile;
        } else {
            self.profiles.push(profile);
            self.profiles.sort_unstable_by_key(|profile| profile.id);
        }
    }

    #[must_use]
    pub fn delete_profile(&mut self, id: DataSourceId) -> bool {
        let original_len = self.profiles.len();
        self.profiles.retain(|profile| profile.id != id);
        self.profiles.len() != original_len
    }

    pub fn persist(&self) -> Result<(), ProfilesError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ProfilesError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = ProfilesDocument {
            profiles: self.profiles.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| ProfilesError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ProfilesError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn read_profiles(path: &Path) -> Result<Vec<ConnectionProfile>, ProfilesError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path).map_err(|source| ProfilesError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut doc: ProfilesDocument = toml::from_str(&raw).map_err(|source| ProfilesError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    doc.normalize();
    Ok(doc.profiles)
}

pub fn default_profiles_path() -> Result<PathBuf, ProfilesError> {
    Ok(default_config_dir()?.join(PROFILES_FILE_NAME))
}
