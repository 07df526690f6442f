use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use crate::config::ExecutionSettings;
use crate::connection::{Connection, DataSourceId, DatabaseType};
use crate::context::WorkspaceContext;
use crate::execution::{CancellationToken, ExecutionSession};
use crate::results::StatementResult;
use crate::services::{
    ChildrenParams, ConnectionService, ExecutionRequest, HistoryRecord, HistoryService,
    SqlService, TableParams, TransportError, TreeService, WorkspaceServices,
};
use crate::sql_text::split_statements;
use crate::tree::{ExtraParams, TreeNode, TreeNodeType};

pub type SqlReply = Result<Vec<StatementResult>, TransportError>;
pub type TreeReply = Result<Vec<TreeNode>, TransportError>;
type TreeKey = (TreeNodeType, Option<DataSourceId>, Option<String>);

pub fn connection(id: DataSourceId) -> Connection {
    Connection::new(id, format!("conn-{id}"), DatabaseType::Mysql)
}

pub fn mysql_context() -> WorkspaceContext {
    WorkspaceContext::for_connection(&Connection::new(1, "local", DatabaseType::Mysql))
        .with_database(Some("app".to_string()))
}

pub fn named_nodes(node_type: TreeNodeType, keys: &[&str]) -> Vec<TreeNode> {
    keys.iter()
        .map(|key| TreeNode::new(*key, node_type))
        .collect()
}

pub fn table_nodes(context: &WorkspaceContext, keys: &[&str]) -> Vec<TreeNode> {
    keys.iter()
        .map(|key| {
            TreeNode::new(*key, TreeNodeType::Table).with_extra_params(ExtraParams {
                table_name: Some((*key).to_string()),
                ..ExtraParams::from_context(context)
            })
        })
        .collect()
}

#[derive(Default)]
pub struct FakeConnectionService {
    connections: Mutex<Vec<Connection>>,
    list_calls: Mutex<Vec<bool>>,
    removed: Mutex<Vec<DataSourceId>>,
    pub fail: AtomicBool,
}

impl FakeConnectionService {
    pub fn set_connections(&self, connections: Vec<Connection>) {
        *self.connections.lock().expect("connections lock poisoned") = connections;
    }

    pub fn list_calls(&self) -> Vec<bool> {
        self.list_calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn removed(&self) -> Vec<DataSourceId> {
        self.removed.lock().expect("removed lock poisoned").clone()
    }
}

#[async_trait]
impl ConnectionService for FakeConnectionService {
    async fn list_connections(&self, refresh: bool) -> Result<Vec<Connection>, TransportError> {
        self.list_calls
            .lock()
            .expect("calls lock poisoned")
            .push(refresh);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::new("connection list unavailable"));
        }
        Ok(self
            .connections
            .lock()
            .expect("connections lock poisoned")
            .clone())
    }

    async fn remove_connection(&self, id: DataSourceId) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::new("remove failed"));
        }
        self.removed.lock().expect("removed lock poisoned").push(id);
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .retain(|connection| connection.id != id);
        Ok(())
    }
}

/// Children keyed by `(node type, data source, database)`. Unknown keys
/// return an empty list.
#[derive(Default)]
pub struct FakeTreeService {
    children: Mutex<HashMap<TreeKey, Vec<TreeNode>>>,
    gates: Mutex<HashMap<TreeKey, VecDeque<oneshot::Receiver<TreeReply>>>>,
    failures: Mutex<Vec<(TreeNodeType, TransportError)>>,
    calls: Mutex<Vec<(TreeNodeType, ChildrenParams)>>,
}

impl FakeTreeService {
    pub fn set_children(
        &self,
        node_type: TreeNodeType,
        data_source_id: Option<DataSourceId>,
        database_name: Option<&str>,
        children: Vec<TreeNode>,
    ) {
        self.children
            .lock()
            .expect("children lock poisoned")
            .insert(
                (node_type, data_source_id, database_name.map(str::to_string)),
                children,
            );
    }

    pub fn set_databases(&self, data_source_id: DataSourceId, names: &[&str]) {
        self.set_children(
            TreeNodeType::DataSource,
            Some(data_source_id),
            None,
            named_nodes(TreeNodeType::Database, names),
        );
    }

    pub fn set_schemas(&self, data_source_id: DataSourceId, database: &str, names: &[&str]) {
        self.set_children(
            TreeNodeType::Database,
            Some(data_source_id),
            Some(database),
            named_nodes(TreeNodeType::Schema, names),
        );
    }

    /// The next call for this key waits for the returned sender instead of
    /// answering from the configured children.
    pub fn gate(
        &self,
        node_type: TreeNodeType,
        data_source_id: Option<DataSourceId>,
        database_name: Option<&str>,
    ) -> oneshot::Sender<TreeReply> {
        let (sender, receiver) = oneshot::channel();
        self.gates
            .lock()
            .expect("gates lock poisoned")
            .entry((node_type, data_source_id, database_name.map(str::to_string)))
            .or_default()
            .push_back(receiver);
        sender
    }

    pub fn fail_next(&self, node_type: TreeNodeType, message: &str) {
        self.failures
            .lock()
            .expect("failures lock poisoned")
            .push((node_type, TransportError::new(message)));
    }

    pub fn calls(&self) -> Vec<(TreeNodeType, ChildrenParams)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn calls_for(&self, node_type: TreeNodeType) -> Vec<ChildrenParams> {
        self.calls()
            .into_iter()
            .filter(|(called, _)| *called == node_type)
            .map(|(_, params)| params)
            .collect()
    }
}

#[async_trait]
impl TreeService for FakeTreeService {
    async fn list_children(
        &self,
        node_type: TreeNodeType,
        params: &ChildrenParams,
    ) -> Result<Vec<TreeNode>, TransportError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((node_type, params.clone()));

        let key = (
            node_type,
            params.data_source_id,
            params.database_name.clone(),
        );
        let gate = self
            .gates
            .lock()
            .expect("gates lock poisoned")
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            return gate
                .await
                .unwrap_or_else(|_| Err(TransportError::new("gate dropped")));
        }

        {
            let mut failures = self.failures.lock().expect("failures lock poisoned");
            if let Some(position) = failures.iter().position(|(kind, _)| *kind == node_type) {
                let (_, error) = failures.remove(position);
                return Err(error);
            }
        }

        Ok(self
            .children
            .lock()
            .expect("children lock poisoned")
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

enum ScriptedReply {
    Respond(SqlReply),
    Gated(oneshot::Receiver<SqlReply>),
}

/// Answers from a script when one is queued, otherwise returns one empty
/// successful result per statement.
#[derive(Default)]
pub struct FakeSqlService {
    script: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    deleted: Mutex<Vec<TableParams>>,
    pinned: Mutex<Vec<TableParams>>,
    unpinned: Mutex<Vec<TableParams>>,
    exported: Mutex<Vec<TableParams>>,
    pub fail_mutations: AtomicBool,
}

impl FakeSqlService {
    pub fn push_response(&self, reply: SqlReply) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Respond(reply));
    }

    pub fn push_gated(&self, gate: oneshot::Receiver<SqlReply>) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Gated(gate));
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    pub fn deleted(&self) -> Vec<TableParams> {
        self.deleted.lock().expect("deleted lock poisoned").clone()
    }

    pub fn pinned(&self) -> Vec<TableParams> {
        self.pinned.lock().expect("pinned lock poisoned").clone()
    }

    pub fn unpinned(&self) -> Vec<TableParams> {
        self.unpinned.lock().expect("unpinned lock poisoned").clone()
    }

    pub fn exported(&self) -> Vec<TableParams> {
        self.exported.lock().expect("exported lock poisoned").clone()
    }

    fn record(&self, log: &Mutex<Vec<TableParams>>, params: &TableParams) -> Result<(), TransportError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(TransportError::new("table service unavailable"));
        }
        log.lock().expect("table log poisoned").push(params.clone());
        Ok(())
    }
}

#[async_trait]
impl SqlService for FakeSqlService {
    async fn execute_sql(
        &self,
        request: &ExecutionRequest,
        _cancellation: &CancellationToken,
    ) -> Result<Vec<StatementResult>, TransportError> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());

        let scripted = self.script.lock().expect("script lock poisoned").pop_front();
        match scripted {
            Some(ScriptedReply::Respond(reply)) => reply,
            Some(ScriptedReply::Gated(gate)) => gate
                .await
                .unwrap_or_else(|_| Err(TransportError::new("gate dropped"))),
            None => Ok(split_statements(&request.sql)
                .into_iter()
                .map(StatementResult::new)
                .collect()),
        }
    }

    async fn delete_table(&self, params: &TableParams) -> Result<(), TransportError> {
        self.record(&self.deleted, params)
    }

    async fn pin_table(&self, params: &TableParams) -> Result<(), TransportError> {
        self.record(&self.pinned, params)
    }

    async fn unpin_table(&self, params: &TableParams) -> Result<(), TransportError> {
        self.record(&self.unpinned, params)
    }

    async fn export_create_table_sql(
        &self,
        params: &TableParams,
    ) -> Result<String, TransportError> {
        self.record(&self.exported, params)?;
        Ok(format!("CREATE TABLE `{}` (id int)", params.table_name))
    }
}

#[derive(Default)]
pub struct FakeHistoryService {
    records: Mutex<Vec<HistoryRecord>>,
    attempts: AtomicUsize,
    attempted: Notify,
    pub fail: AtomicBool,
}

impl FakeHistoryService {
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().expect("records lock poisoned").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn wait_for_attempt(&self) {
        self.attempted.notified().await;
    }
}

#[async_trait]
impl HistoryService for FakeHistoryService {
    async fn create_history(&self, record: &HistoryRecord) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(TransportError::new("history store offline"))
        } else {
            self.records
                .lock()
                .expect("records lock poisoned")
                .push(record.clone());
            Ok(())
        };
        self.attempted.notify_one();
        result
    }
}

#[derive(Clone, Default)]
pub struct FakeServices {
    pub connections: Arc<FakeConnectionService>,
    pub tree: Arc<FakeTreeService>,
    pub sql: Arc<FakeSqlService>,
    pub history: Arc<FakeHistoryService>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> WorkspaceServices {
        WorkspaceServices {
            connections: self.connections.clone(),
            tree: self.tree.clone(),
            sql: self.sql.clone(),
            history: self.history.clone(),
        }
    }

    pub fn execution_session(&self, settings: ExecutionSettings) -> ExecutionSession {
        ExecutionSession::new(self.sql.clone(), self.history.clone(), settings)
    }
}
