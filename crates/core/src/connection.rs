use std::fmt;

use serde::{Deserialize, Serialize};

pub type DataSourceId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabaseType {
    Mysql,
    Postgresql,
    Oracle,
    Sqlserver,
    Sqlite,
    H2,
    AdbPostgresql,
    Clickhouse,
    Dm,
    Db2,
    Mariadb,
    Oceanbase,
    Hive,
    Kingbase,
    Mongodb,
    Redis,
    Presto,
}

impl DatabaseType {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Mysql => "MYSQL",
            Self::Postgresql => "POSTGRESQL",
            Self::Oracle => "ORACLE",
            Self::Sqlserver => "SQLSERVER",
            Self::Sqlite => "SQLITE",
            Self::H2 => "H2",
            Self::AdbPostgresql => "ADB_POSTGRESQL",
            Self::Clickhouse => "CLICKHOUSE",
            Self::Dm => "DM",
            Self::Db2 => "DB2",
            Self::Mariadb => "MARIADB",
            Self::Oceanbase => "OCEANBASE",
            Self::Hive => "HIVE",
            Self::Kingbase => "KINGBASE",
            Self::Mongodb => "MONGODB",
            Self::Redis => "REDIS",
            Self::Presto => "PRESTO",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Deployment tag shown next to the active connection (e.g. `PROD` in red).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub short_name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// A listed connection. Lists are replaced wholesale on refetch, so a
/// `Connection` is never mutated in place; identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub id: DataSourceId,
    pub alias: String,
    pub db_type: DatabaseType,
    #[serde(default)]
    pub environment: Option<Environment>,
}

impl Connection {
    #[must_use]
    pub fn new(id: DataSourceId, alias: impl Into<String>, db_type: DatabaseType) -> Self {
        Self {
            id,
            alias: alias.into(),
            db_type,
            environment: None,
        }
    }
}

#[must_use]
pub fn find_connection(connections: &[Connection], id: DataSourceId) -> Option<&Connection> {
    connections.iter().find(|connection| connection.id == id)
}
