use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{Connection, DataSourceId, DatabaseType};
use crate::context::WorkspaceContext;
use crate::execution::CancellationToken;
use crate::results::{StatementResult, DEFAULT_PAGE_NO};
use crate::tree::{ExtraParams, TreeNode, TreeNodeType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildrenParams {
    pub data_source_id: Option<DataSourceId>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub refresh: bool,
    pub extra_params: ExtraParams,
}

impl ChildrenParams {
    /// Scope of `node`'s children: the node's own extra params, with its key
    /// filling in the level it represents.
    #[must_use]
    pub fn for_node(node: &TreeNode, refresh: bool) -> Self {
        let mut extra_params = node.extra_params.clone();
        match node.tree_node_type {
            TreeNodeType::DataSource => {
                if extra_params.data_source_id.is_none() {
                    extra_params.data_source_id = node.key.parse().ok();
                }
            }
            TreeNodeType::Database => {
                extra_params.database_name = Some(node.key.clone());
            }
            TreeNodeType::Schema => {
                extra_params.schema_name = Some(node.key.clone());
            }
            TreeNodeType::Table => {
                extra_params.table_name = Some(node.key.clone());
            }
            _ => {}
        }

        Self {
            data_source_id: extra_params.data_source_id,
            database_name: extra_params.database_name.clone(),
            schema_name: extra_params.schema_name.clone(),
            refresh,
            extra_params,
        }
    }

    #[must_use]
    pub fn for_context(context: &WorkspaceContext, refresh: bool) -> Self {
        Self {
            data_source_id: context.data_source_id,
            database_name: context.database_name.clone(),
            schema_name: context.schema_name.clone(),
            refresh,
            extra_params: ExtraParams::from_context(context),
        }
    }
}

/// Target of a table-level mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableParams {
    pub data_source_id: Option<DataSourceId>,
    pub database_type: Option<DatabaseType>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: String,
}

impl TableParams {
    #[must_use]
    pub fn from_extra_params(extra_params: &ExtraParams, table_name: impl Into<String>) -> Self {
        Self {
            data_source_id: extra_params.data_source_id,
            database_type: extra_params.database_type,
            database_name: extra_params.database_name.clone(),
            schema_name: extra_params.schema_name.clone(),
            table_name: table_name.into(),
        }
    }

    #[must_use]
    pub fn from_context(context: &WorkspaceContext, table_name: impl Into<String>) -> Self {
        Self {
            data_source_id: context.data_source_id,
            database_type: context.database_type,
            database_name: context.database_name.clone(),
            schema_name: context.schema_name.clone(),
            table_name: table_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub sql: String,
    pub data_source_id: Option<DataSourceId>,
    pub database_type: Option<DatabaseType>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub page_no: u32,
    pub page_size: u32,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(sql: impl Into<String>, context: &WorkspaceContext, page_size: u32) -> Self {
        Self {
            sql: sql.into(),
            data_source_id: context.data_source_id,
            database_type: context.database_type,
            database_name: context.database_name.clone(),
            schema_name: context.schema_name.clone(),
            page_no: DEFAULT_PAGE_NO,
            page_size,
        }
    }

    #[must_use]
    pub fn with_page(mut self, page_no: u32, page_size: u32) -> Self {
        self.page_no = page_no;
        self.page_size = page_size;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub data_source_id: Option<DataSourceId>,
    pub data_source_name: Option<String>,
    pub database_type: Option<DatabaseType>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub ddl: String,
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

impl HistoryRecord {
    #[must_use]
    pub fn new(context: &WorkspaceContext, sql: &str, executed_at: DateTime<Utc>) -> Self {
        Self {
            data_source_id: context.data_source_id,
            data_source_name: context.data_source_name.clone(),
            database_type: context.database_type,
            database_name: context.database_name.clone(),
            schema_name: context.schema_name.clone(),
            ddl: sql.to_string(),
            name: history_name(executed_at, sql),
            executed_at,
        }
    }
}

#[must_use]
pub fn history_name(executed_at: DateTime<Utc>, sql: &str) -> String {
    format!(
        "{}-{}",
        executed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        sql.trim()
    )
}

#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn list_connections(&self, refresh: bool) -> Result<Vec<Connection>, TransportError>;
    async fn remove_connection(&self, id: DataSourceId) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TreeService: Send + Sync {
    async fn list_children(
        &self,
        node_type: TreeNodeType,
        params: &ChildrenParams,
    ) -> Result<Vec<TreeNode>, TransportError>;
}

#[async_trait]
pub trait SqlService: Send + Sync {
    /// One result per statement, in submission order. A shorter list than the
    /// number of submitted statements is a valid partial response.
    async fn execute_sql(
        &self,
        request: &ExecutionRequest,
        cancellation: &CancellationToken,
    ) -> Result<Vec<StatementResult>, TransportError>;
    async fn delete_table(&self, params: &TableParams) -> Result<(), TransportError>;
    async fn pin_table(&self, params: &TableParams) -> Result<(), TransportError>;
    async fn unpin_table(&self, params: &TableParams) -> Result<(), TransportError>;
    async fn export_create_table_sql(&self, params: &TableParams)
        -> Result<String, TransportError>;
}

#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn create_history(&self, record: &HistoryRecord) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct WorkspaceServices {
    pub connections: Arc<dyn ConnectionService>,
    pub tree: Arc<dyn TreeService>,
    pub sql: Arc<dyn SqlService>,
    pub history: Arc<dyn HistoryService>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{history_name, ChildrenParams, ExecutionRequest, HistoryRecord};
    use crate::connection::{Connection, DatabaseType};
    use crate::context::WorkspaceContext;
    use crate::tree::{ExtraParams, TreeNode, TreeNodeType};

    fn context() -> WorkspaceContext {
        WorkspaceContext::for_connection(&Connection::new(3, "local", DatabaseType::Mysql))
            .with_database(Some("app".to_string()))
    }

    #[test]
    fn execution_request_merges_context_with_first_page() {
        let request = ExecutionRequest::new("SELECT 1", &context(), 200);
        assert_eq!(request.data_source_id, Some(3));
        assert_eq!(request.database_name.as_deref(), Some("app"));
        assert_eq!((request.page_no, request.page_size), (1, 200));

        let next = request.with_page(3, 50);
        assert_eq!((next.page_no, next.page_size), (3, 50));
    }

    #[test]
    fn children_params_fill_in_the_node_level() {
        let node = TreeNode::new("app", TreeNodeType::Database).with_extra_params(ExtraParams {
            data_source_id: Some(3),
            ..ExtraParams::default()
        });

        let params = ChildrenParams::for_node(&node, true);
        assert_eq!(params.data_source_id, Some(3));
        assert_eq!(params.database_name.as_deref(), Some("app"));
        assert!(params.refresh);

        let data_source = TreeNode::new("9", TreeNodeType::DataSource);
        assert_eq!(
            ChildrenParams::for_node(&data_source, false).data_source_id,
            Some(9)
        );
    }

    #[test]
    fn history_record_is_named_after_time_and_sql() {
        let executed_at = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 0)
            .single()
            .expect("valid timestamp");
        let record = HistoryRecord::new(&context(), " SELECT 1; ", executed_at);

        assert_eq!(record.name, "2024-05-01T12:30:00Z-SELECT 1;");
        assert_eq!(record.ddl, " SELECT 1; ");
        assert_eq!(history_name(executed_at, "SELECT 2"), "2024-05-01T12:30:00Z-SELECT 2");
        assert_eq!(record.data_source_name.as_deref(), Some("local"));
    }
}
