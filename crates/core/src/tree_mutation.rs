use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::DataSourceId;
use crate::context::WorkspaceContext;
use crate::services::{
    ChildrenParams, ConnectionService, SqlService, TableParams, TransportError, TreeService,
};
use crate::tree::{NodePath, SchemaTree, TreeNode, TreeNodeType};
use crate::tree_actions::{TabIntro, TreeCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    ChildrenReplaced { count: usize },
    TableDeleted,
    PinToggled { pinned: bool },
    Ddl(String),
    /// The connection list changed; the caller must reload it and re-resolve
    /// the context.
    ConnectionsChanged(DataSourceId),
    OpenTab(TabIntro),
    /// A newer request for the same target finished first.
    Superseded,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("tree operation failed: {0}")]
    Transport(#[source] TransportError),
    #[error("no tree node at {0:?}")]
    MissingNode(NodePath),
}

/// Runs [`TreeCommand`]s and owns the published schema tree and the current
/// table list.
pub struct TreeMutationHandler {
    tree_service: Arc<dyn TreeService>,
    sql: Arc<dyn SqlService>,
    connections: Arc<dyn ConnectionService>,
    tree: Arc<watch::Sender<SchemaTree>>,
    tables: Arc<watch::Sender<Vec<TreeNode>>>,
    refreshes: Mutex<HashMap<NodePath, u64>>,
    next_refresh: AtomicU64,
    table_generation: AtomicU64,
}

impl TreeMutationHandler {
    #[must_use]
    pub fn new(
        tree_service: Arc<dyn TreeService>,
        sql: Arc<dyn SqlService>,
        connections: Arc<dyn ConnectionService>,
    ) -> Self {
        let (tree, _) = watch::channel(SchemaTree::default());
        let (tables, _) = watch::channel(Vec::new());
        Self {
            tree_service,
            sql,
            connections,
            tree: Arc::new(tree),
            tables: Arc::new(tables),
            refreshes: Mutex::new(HashMap::new()),
            next_refresh: AtomicU64::new(0),
            table_generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn tree(&self) -> SchemaTree {
        self.tree.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_tree(&self) -> watch::Receiver<SchemaTree> {
        self.tree.subscribe()
    }

    #[must_use]
    pub fn current_tables(&self) -> Vec<TreeNode> {
        self.tables.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_tables(&self) -> watch::Receiver<Vec<TreeNode>> {
        self.tables.subscribe()
    }

    pub async fn run(
        &self,
        path: &NodePath,
        command: TreeCommand,
        context: &WorkspaceContext,
    ) -> Result<MutationOutcome, MutationError> {
        match command {
            TreeCommand::RefreshChildren => self.load_children(path, true).await,
            TreeCommand::DeleteTable(params) => {
                self.sql
                    .delete_table(&params)
                    .await
                    .map_err(|error| transport("delete table", &params, error))?;
                info!(table = %params.table_name, "table deleted");
                self.refetch_tables(context, false).await;
                Ok(MutationOutcome::TableDeleted)
            }
            TreeCommand::PinTable(params) => self.toggle_pin(&params, true, context).await,
            TreeCommand::UnpinTable(params) => self.toggle_pin(&params, false, context).await,
            TreeCommand::ExportDdl(params) => {
                let ddl = self
                    .sql
                    .export_create_table_sql(&params)
                    .await
                    .map_err(|error| transport("export ddl", &params, error))?;
                Ok(MutationOutcome::Ddl(ddl))
            }
            TreeCommand::RemoveConnection(id) => {
                self.connections.remove_connection(id).await.map_err(|error| {
                    warn!(data_source_id = id, %error, "failed to remove connection");
                    MutationError::Transport(error)
                })?;
                info!(data_source_id = id, "connection removed");
                if let Err(error) = self.load_children(&NodePath::root(), false).await {
                    warn!(%error, "failed to reload data sources after removal");
                }
                Ok(MutationOutcome::ConnectionsChanged(id))
            }
            TreeCommand::OpenTab(intro) => Ok(MutationOutcome::OpenTab(intro)),
        }
    }

    /// Fetches the children of the node at `path` and swaps them in. Only the
    /// most recently issued load for a path is applied.
    pub async fn load_children(
        &self,
        path: &NodePath,
        refresh: bool,
    ) -> Result<MutationOutcome, MutationError> {
        let (node_type, params) = {
            let tree = self.tree.borrow();
            let node = tree
                .node(path)
                .ok_or_else(|| MutationError::MissingNode(path.clone()))?;
            (node.tree_node_type, ChildrenParams::for_node(node, refresh))
        };

        let generation = self.begin_refresh(path);
        debug!(?node_type, ?path, refresh, generation, "loading tree children");
        let children = self
            .tree_service
            .list_children(node_type, &params)
            .await
            .map_err(|error| {
                warn!(?node_type, ?path, %error, "failed to load tree children");
                MutationError::Transport(error)
            })?;

        if !self.is_latest_refresh(path, generation) {
            debug!(?path, generation, "dropping superseded children");
            return Ok(MutationOutcome::Superseded);
        }

        let count = children.len();
        let applied = self
            .tree
            .send_if_modified(|tree| tree.replace_children(path, children));
        if !applied {
            debug!(?path, "node disappeared before its children arrived");
            return Ok(MutationOutcome::Superseded);
        }
        Ok(MutationOutcome::ChildrenReplaced { count })
    }

    /// Reloads the table list for the database/schema in `context`.
    pub async fn load_tables(
        &self,
        context: &WorkspaceContext,
        refresh: bool,
    ) -> Result<usize, MutationError> {
        let generation = self.table_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let params = ChildrenParams::for_context(context, refresh);
        let tables = self
            .tree_service
            .list_children(TreeNodeType::Tables, &params)
            .await
            .map_err(MutationError::Transport)?;

        if self.table_generation.load(Ordering::SeqCst) != generation {
            return Ok(0);
        }
        let count = tables.len();
        self.tables.send_replace(tables);
        Ok(count)
    }

    /// Drops the table list and invalidates any load still in flight.
    pub fn clear_tables(&self) {
        self.table_generation.fetch_add(1, Ordering::SeqCst);
        self.tables.send_if_modified(|tables| {
            let changed = !tables.is_empty();
            tables.clear();
            changed
        });
    }

    async fn toggle_pin(
        &self,
        params: &TableParams,
        pin: bool,
        context: &WorkspaceContext,
    ) -> Result<MutationOutcome, MutationError> {
        let response = if pin {
            self.sql.pin_table(params).await
        } else {
            self.sql.unpin_table(params).await
        };
        response.map_err(|error| transport("toggle pin", params, error))?;
        debug!(table = %params.table_name, pinned = pin, "pin toggled");
        self.refetch_tables(context, true).await;
        Ok(MutationOutcome::PinToggled { pinned: pin })
    }

    /// The mutation already succeeded; a failed refetch only costs freshness.
    async fn refetch_tables(&self, context: &WorkspaceContext, refresh: bool) {
        if let Err(error) = self.load_tables(context, refresh).await {
            warn!(%error, "failed to refetch table list");
        }
    }

    fn begin_refresh(&self, path: &NodePath) -> u64 {
        let generation = self.next_refresh.fetch_add(1, Ordering::SeqCst) + 1;
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), generation);
        generation
    }

    fn is_latest_refresh(&self, path: &NodePath, generation: u64) -> bool {
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .is_some_and(|latest| *latest == generation)
    }
}

fn transport(action: &str, params: &TableParams, error: TransportError) -> MutationError {
    warn!(action, table = %params.table_name, %error, "table operation failed");
    MutationError::Transport(error)
}
