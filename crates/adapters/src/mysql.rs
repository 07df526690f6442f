use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Pool, Row, SslOpts, Value};
use quarry_core::connection::{Connection, DataSourceId};
use quarry_core::execution::CancellationToken;
use quarry_core::profiles::{ConnectionProfile, PasswordSource, TlsMode};
use quarry_core::results::StatementResult;
use quarry_core::services::{
    ChildrenParams, ConnectionService, ExecutionRequest, SqlService, TableParams, TransportError,
    TreeService,
};
use quarry_core::sql_text::{
    drop_table_sql, quote_identifier, show_create_table_sql, split_statements,
};
use quarry_core::tree::{ExtraParams, TreeNode, TreeNodeType};
use tracing::{debug, info, warn};

use crate::connections::ProfileConnectionService;
use crate::pins::{FilePinStore, PinnedTable};

pub const PASSWORD_ENV: &str = "QUARRY_DB_PASSWORD";
const DEFAULT_KEYRING_SERVICE: &str = "quarry";

const DATABASE_FOLDERS: [(&str, &str, TreeNodeType); 5] = [
    ("tables", "Tables", TreeNodeType::Tables),
    ("views", "Views", TreeNodeType::Views),
    ("functions", "Functions", TreeNodeType::Functions),
    ("procedures", "Procedures", TreeNodeType::Procedures),
    ("triggers", "Triggers", TreeNodeType::Triggers),
];

const TABLE_FOLDERS: [(&str, &str, TreeNodeType); 3] = [
    ("columns", "Columns", TreeNodeType::Columns),
    ("keys", "Keys", TreeNodeType::Keys),
    ("indexes", "Indexes", TreeNodeType::Indexes),
];

/// Tree browsing and SQL execution against MySQL, one pool per data source.
#[derive(Debug)]
pub struct MysqlWorkspaceBackend {
    profiles: Arc<ProfileConnectionService>,
    pins: Mutex<FilePinStore>,
    pools: Mutex<HashMap<DataSourceId, Pool>>,
}

impl MysqlWorkspaceBackend {
    #[must_use]
    pub fn new(profiles: Arc<ProfileConnectionService>, pins: FilePinStore) -> Self {
        Self {
            profiles,
            pins: Mutex::new(pins),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub async fn disconnect_all(&self) {
        let pools = self
            .lock_pools()
            .drain()
            .collect::<Vec<(DataSourceId, Pool)>>();
        for (data_source_id, pool) in pools {
            close_pool(data_source_id, pool).await;
        }
    }

    async fn disconnect(&self, data_source_id: DataSourceId) {
        let pool = self.lock_pools().remove(&data_source_id);
        if let Some(pool) = pool {
            close_pool(data_source_id, pool).await;
        }
    }

    fn lock_pools(&self) -> MutexGuard<'_, HashMap<DataSourceId, Pool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pins(&self) -> MutexGuard<'_, FilePinStore> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self, data_source_id: DataSourceId) -> Result<Pool, TransportError> {
        let mut pools = self.lock_pools();
        if let Some(pool) = pools.get(&data_source_id) {
            return Ok(pool.clone());
        }

        let profile = self.profiles.profile(data_source_id).ok_or_else(|| {
            TransportError::new(format!("connection {data_source_id} does not exist"))
        })?;
        let pool = Pool::new(opts_from_profile(&profile));
        debug!(data_source_id, host = %profile.host, "connection pool opened");
        pools.insert(data_source_id, pool.clone());
        Ok(pool)
    }

    async fn conn(&self, data_source_id: Option<DataSourceId>) -> Result<Conn, TransportError> {
        let data_source_id = data_source_id
            .ok_or_else(|| TransportError::new("no data source selected"))?;
        let pool = self.pool(data_source_id)?;
        pool.get_conn().await.map_err(to_transport_error)
    }

    async fn query_names(
        &self,
        params: &ChildrenParams,
        sql: &'static str,
        args: Vec<String>,
    ) -> Result<Vec<String>, TransportError> {
        let mut conn = self.conn(params.data_source_id).await?;
        conn.exec_map(sql, args, |name: String| name)
            .await
            .map_err(to_transport_error)
    }

    /// A refresh re-reads the profiles, so pools built from the old settings
    /// are closed.
    async fn data_source_nodes(&self, refresh: bool) -> Result<Vec<TreeNode>, TransportError> {
        if refresh {
            self.profiles.reload()?;
            self.disconnect_all().await;
        }
        Ok(self
            .profiles
            .connections()
            .iter()
            .map(data_source_node)
            .collect())
    }

    async fn database_nodes(&self, params: &ChildrenParams) -> Result<Vec<TreeNode>, TransportError> {
        let mut conn = self.conn(params.data_source_id).await?;
        let databases = conn
            .query_map("SHOW DATABASES", |database: String| database)
            .await
            .map_err(to_transport_error)?;
        Ok(databases
            .into_iter()
            .map(|database| {
                TreeNode::new(database, TreeNodeType::Database)
                    .with_extra_params(params.extra_params.clone())
            })
            .collect())
    }

    async fn table_nodes(&self, params: &ChildrenParams) -> Result<Vec<TreeNode>, TransportError> {
        let database = require_database(params)?;
        let names = self
            .query_names(
                params,
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                vec![database.to_string()],
            )
            .await?;
        let pins = self.lock_pins();
        Ok(pinned_first(names, params, &pins))
    }

    async fn column_nodes(&self, params: &ChildrenParams) -> Result<Vec<TreeNode>, TransportError> {
        let (database, table) = require_table(params)?;
        let mut conn = self.conn(params.data_source_id).await?;
        let columns = conn
            .exec_map(
                "SELECT COLUMN_NAME, COLUMN_TYPE FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (database.to_string(), table.to_string()),
                |(name, column_type): (String, String)| (name, column_type),
            )
            .await
            .map_err(to_transport_error)?;
        Ok(columns
            .into_iter()
            .map(|(name, column_type)| {
                let mut node = TreeNode::new(name, TreeNodeType::Column)
                    .with_extra_params(params.extra_params.clone());
                node.name = format!("{} {column_type}", node.key);
                node
            })
            .collect())
    }

    async fn leaf_nodes(
        &self,
        params: &ChildrenParams,
        leaf_type: TreeNodeType,
        sql: &'static str,
        args: Vec<String>,
    ) -> Result<Vec<TreeNode>, TransportError> {
        let names = self.query_names(params, sql, args).await?;
        Ok(names
            .into_iter()
            .map(|name| TreeNode::new(name, leaf_type).with_extra_params(params.extra_params.clone()))
            .collect())
    }
}

/// Connection listing comes from the profiles; removal also closes the pool.
#[async_trait]
impl ConnectionService for MysqlWorkspaceBackend {
    async fn list_connections(&self, refresh: bool) -> Result<Vec<Connection>, TransportError> {
        self.profiles.list_connections(refresh).await
    }

    async fn remove_connection(&self, id: DataSourceId) -> Result<(), TransportError> {
        self.profiles.remove_connection(id).await?;
        self.disconnect(id).await;
        Ok(())
    }
}

#[async_trait]
impl TreeService for MysqlWorkspaceBackend {
    async fn list_children(
        &self,
        node_type: TreeNodeType,
        params: &ChildrenParams,
    ) -> Result<Vec<TreeNode>, TransportError> {
        debug!(?node_type, data_source_id = ?params.data_source_id, "listing children");
        match node_type {
            TreeNodeType::DataSources => self.data_source_nodes(params.refresh).await,
            TreeNodeType::DataSource => self.database_nodes(params).await,
            TreeNodeType::Database => {
                require_database(params)?;
                Ok(folder_nodes(&DATABASE_FOLDERS, &params.extra_params))
            }
            TreeNodeType::Tables => self.table_nodes(params).await,
            TreeNodeType::Table => {
                require_table(params)?;
                Ok(folder_nodes(&TABLE_FOLDERS, &params.extra_params))
            }
            TreeNodeType::Columns => self.column_nodes(params).await,
            TreeNodeType::Keys => {
                let (database, table) = require_table(params)?;
                self.leaf_nodes(
                    params,
                    TreeNodeType::Key,
                    "SELECT CONSTRAINT_NAME FROM information_schema.TABLE_CONSTRAINTS \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                     ORDER BY CONSTRAINT_NAME",
                    vec![database.to_string(), table.to_string()],
                )
                .await
            }
            TreeNodeType::Indexes => {
                let (database, table) = require_table(params)?;
                self.leaf_nodes(
                    params,
                    TreeNodeType::Index,
                    "SELECT DISTINCT INDEX_NAME FROM information_schema.STATISTICS \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                     ORDER BY INDEX_NAME",
                    vec![database.to_string(), table.to_string()],
                )
                .await
            }
            TreeNodeType::Views => {
                let database = require_database(params)?;
                self.leaf_nodes(
                    params,
                    TreeNodeType::View,
                    "SELECT TABLE_NAME FROM information_schema.VIEWS \
                     WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
                    vec![database.to_string()],
                )
                .await
            }
            TreeNodeType::Functions | TreeNodeType::Procedures => {
                let database = require_database(params)?;
                let (leaf_type, routine_type) = if node_type == TreeNodeType::Functions {
                    (TreeNodeType::Function, "FUNCTION")
                } else {
                    (TreeNodeType::Procedure, "PROCEDURE")
                };
                self.leaf_nodes(
                    params,
                    leaf_type,
                    "SELECT ROUTINE_NAME FROM information_schema.ROUTINES \
                     WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = ? \
                     ORDER BY ROUTINE_NAME",
                    vec![database.to_string(), routine_type.to_string()],
                )
                .await
            }
            TreeNodeType::Triggers => {
                let database = require_database(params)?;
                self.leaf_nodes(
                    params,
                    TreeNodeType::Trigger,
                    "SELECT TRIGGER_NAME FROM information_schema.TRIGGERS \
                     WHERE TRIGGER_SCHEMA = ? ORDER BY TRIGGER_NAME",
                    vec![database.to_string()],
                )
                .await
            }
            // MySQL has no schema level; leaves have no children.
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SqlService for MysqlWorkspaceBackend {
    async fn execute_sql(
        &self,
        request: &ExecutionRequest,
        cancellation: &CancellationToken,
    ) -> Result<Vec<StatementResult>, TransportError> {
        let mut conn = self.conn(request.data_source_id).await?;
        if let Some(database) = non_empty(request.database_name.as_deref()) {
            conn.query_drop(format!("USE {}", quote_identifier(database)))
                .await
                .map_err(to_transport_error)?;
        }

        let window = PageWindow::new(request.page_no, request.page_size);
        let mut results = Vec::new();
        for statement in split_statements(&request.sql) {
            if cancellation.is_cancelled() {
                debug!(token = cancellation.id(), "execution cancelled between statements");
                break;
            }

            let started = Instant::now();
            match run_statement(&mut conn, &statement, window, cancellation).await {
                Ok(mut result) => {
                    result.duration_ms = u64::try_from(started.elapsed().as_millis()).ok();
                    results.push(result);
                }
                Err(error) => {
                    warn!(%error, "statement failed; skipping the rest of the batch");
                    results.push(StatementResult::failed(statement, error.to_string()));
                    break;
                }
            }
        }
        Ok(results)
    }

    async fn delete_table(&self, params: &TableParams) -> Result<(), TransportError> {
        let mut conn = self.conn(params.data_source_id).await?;
        conn.query_drop(drop_table_sql(params))
            .await
            .map_err(to_transport_error)?;
        info!(table = %params.table_name, database = ?params.database_name, "table dropped");

        if let Err(error) = self.lock_pins().unpin(params) {
            warn!(%error, "failed to clear pin of dropped table");
        }
        Ok(())
    }

    async fn pin_table(&self, params: &TableParams) -> Result<(), TransportError> {
        self.lock_pins()
            .pin(params)
            .map_err(|error| TransportError::new(error.to_string()))
    }

    async fn unpin_table(&self, params: &TableParams) -> Result<(), TransportError> {
        self.lock_pins()
            .unpin(params)
            .map_err(|error| TransportError::new(error.to_string()))
    }

    async fn export_create_table_sql(
        &self,
        params: &TableParams,
    ) -> Result<String, TransportError> {
        let mut conn = self.conn(params.data_source_id).await?;
        let row = conn
            .query_first::<(String, String), _>(show_create_table_sql(params))
            .await
            .map_err(to_transport_error)?;
        row.map(|(_, ddl)| ddl).ok_or_else(|| {
            TransportError::new(format!("no DDL returned for `{}`", params.table_name))
        })
    }
}

/// Offset paging over a streamed result: rows before `offset` are skipped and
/// one row past the page is read to learn whether another page exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageWindow {
    offset: u64,
    page_size: u64,
}

impl PageWindow {
    fn new(page_no: u32, page_size: u32) -> Self {
        let page_size = u64::from(page_size.max(1));
        Self {
            offset: u64::from(page_no.saturating_sub(1)) * page_size,
            page_size,
        }
    }

    fn end(self) -> u64 {
        self.offset + self.page_size
    }

    fn contains(self, index: u64) -> bool {
        index >= self.offset && index < self.end()
    }

    fn read_limit(self) -> u64 {
        self.end() + 1
    }

    fn has_next_page(self, rows_seen: u64) -> bool {
        rows_seen > self.end()
    }
}

async fn run_statement(
    conn: &mut Conn,
    statement: &str,
    window: PageWindow,
    cancellation: &CancellationToken,
) -> Result<StatementResult, mysql_async::Error> {
    let mut result = conn.query_iter(statement).await?;
    let mut statement_result = StatementResult::new(statement);

    if result.columns_ref().is_empty() {
        statement_result.message = Some(format!("{} row(s) affected", result.affected_rows()));
        result.drop_result().await?;
        return Ok(statement_result);
    }

    statement_result.headers = result
        .columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect();

    let mut rows_seen = 0_u64;
    while rows_seen < window.read_limit() {
        if cancellation.is_cancelled() {
            break;
        }
        let Some(row) = result.next().await? else {
            break;
        };
        if window.contains(rows_seen) {
            statement_result.rows.push(row_to_cells(row));
        }
        rows_seen += 1;
    }
    result.drop_result().await?;

    statement_result.has_next_page = window.has_next_page(rows_seen);
    if !statement_result.has_next_page {
        statement_result.fuzzy_total = Some(rows_seen);
    }
    Ok(statement_result)
}

fn data_source_node(connection: &Connection) -> TreeNode {
    let mut node = TreeNode::new(connection.id.to_string(), TreeNodeType::DataSource)
        .with_extra_params(ExtraParams {
            data_source_id: Some(connection.id),
            data_source_name: Some(connection.alias.clone()),
            database_type: Some(connection.db_type),
            ..ExtraParams::default()
        });
    node.name.clone_from(&connection.alias);
    node
}

fn folder_nodes(folders: &[(&str, &str, TreeNodeType)], extra_params: &ExtraParams) -> Vec<TreeNode> {
    folders
        .iter()
        .map(|&(key, name, folder_type)| {
            let mut node = TreeNode::new(key, folder_type).with_extra_params(extra_params.clone());
            node.name = name.to_string();
            node
        })
        .collect()
}

/// Table nodes with pinned tables moved to the front; order within each group
/// is kept.
fn pinned_first(names: Vec<String>, params: &ChildrenParams, pins: &FilePinStore) -> Vec<TreeNode> {
    let mut nodes = names
        .into_iter()
        .map(|name| {
            let pinned = params.data_source_id.is_some_and(|data_source_id| {
                pins.is_pinned(&PinnedTable {
                    data_source_id,
                    database_name: params.database_name.clone(),
                    schema_name: params.schema_name.clone(),
                    table_name: name.clone(),
                })
            });
            TreeNode::new(name, TreeNodeType::Table)
                .with_extra_params(params.extra_params.clone())
                .with_pinned(pinned)
        })
        .collect::<Vec<_>>();
    nodes.sort_by_key(|node| !node.pinned);
    nodes
}

fn require_database(params: &ChildrenParams) -> Result<&str, TransportError> {
    non_empty(params.database_name.as_deref())
        .ok_or_else(|| TransportError::new("no database in scope"))
}

fn require_table(params: &ChildrenParams) -> Result<(&str, &str), TransportError> {
    let database = require_database(params)?;
    let table = non_empty(params.extra_params.table_name.as_deref())
        .ok_or_else(|| TransportError::new("no table in scope"))?;
    Ok((database, table))
}

async fn close_pool(data_source_id: DataSourceId, pool: Pool) {
    match pool.disconnect().await {
        Ok(()) => debug!(data_source_id, "connection pool closed"),
        Err(error) => warn!(data_source_id, %error, "failed to close connection pool"),
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = non_empty(profile.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    if matches!(profile.tls_mode, TlsMode::Disabled) {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            let password = env_password?;
            store_keyring_password(profile, &password);
            Some(password)
        }
    }
}

fn ssl_opts_from_profile(profile: &ConnectionProfile) -> Option<SslOpts> {
    if !profile_requests_tls(profile) {
        return None;
    }

    let mut ssl_opts =
        SslOpts::default().with_danger_accept_invalid_certs(profile.tls_accept_invalid_certs);
    if let Some(ca_cert_path) = non_empty(profile.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }
    Some(ssl_opts)
}

fn profile_requests_tls(profile: &ConnectionProfile) -> bool {
    match profile.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => {
            non_empty(profile.tls_ca_cert_path.as_deref()).is_some()
                || profile.tls_accept_invalid_certs
        }
        TlsMode::Require => true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let entry = keyring_entry(profile)?;
    entry.get_password().ok().filter(|password| !password.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &ConnectionProfile, password: &str) {
    if let Some(entry) = keyring_entry(profile) {
        if let Err(error) = entry.set_password(password) {
            warn!(data_source_id = profile.id, %error, "failed to store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &ConnectionProfile, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &ConnectionProfile) -> Option<keyring::Entry> {
    let service =
        non_empty(profile.keyring_service.as_deref()).unwrap_or(DEFAULT_KEYRING_SERVICE);
    let account = non_empty(profile.keyring_account.as_deref()).unwrap_or(profile.alias.as_str());
    keyring::Entry::new(service, account).ok()
}

fn row_to_cells(row: Row) -> Vec<Option<String>> {
    row.unwrap().into_iter().map(mysql_value_to_cell).collect()
}

fn mysql_value_to_cell(value: Value) -> Option<String> {
    let rendered = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            format!("{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    };
    Some(rendered)
}

fn to_transport_error(error: mysql_async::Error) -> TransportError {
    TransportError::new(error.to_string())
}
