use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ExecutionSettings;
use crate::connection::{Connection, DataSourceId};
use crate::context::{context_channel, ContextView, Page, WorkspaceContext};
use crate::execution::{ExecutionError, ExecutionOutcome, ExecutionSession, ExecutionSnapshot};
use crate::resolver::{ContextResolver, Resolution, ResolveError, ResolverStatus};
use crate::services::{TransportError, WorkspaceServices};
use crate::tree::{NodePath, SchemaTree, TreeNode};
use crate::tree_actions::{
    available_actions, open_table_statement, plan_action, ActionInput, OperationColumn,
    TreeActionError,
};
use crate::tree_mutation::{MutationError, MutationOutcome, TreeMutationHandler};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to load connections: {0}")]
    Connections(#[source] TransportError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Action(#[from] TreeActionError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("no tree node at {0:?}")]
    MissingNode(NodePath),
}

/// Ties the resolver, the execution session and the tree mutation handler
/// together. Only the resolver can change the context; everything else reads
/// it through a [`ContextView`].
pub struct WorkspaceSession {
    services: WorkspaceServices,
    resolver: ContextResolver,
    context: ContextView,
    execution: ExecutionSession,
    mutations: TreeMutationHandler,
    connections: watch::Sender<Vec<Connection>>,
    page: Mutex<Page>,
}

impl WorkspaceSession {
    #[must_use]
    pub fn new(services: WorkspaceServices, settings: ExecutionSettings) -> Self {
        let (publisher, context) = context_channel();
        let resolver = ContextResolver::new(services.tree.clone(), publisher);
        let execution =
            ExecutionSession::new(services.sql.clone(), services.history.clone(), settings);
        let mutations = TreeMutationHandler::new(
            services.tree.clone(),
            services.sql.clone(),
            services.connections.clone(),
        );
        let (connections, _) = watch::channel(Vec::new());

        Self {
            services,
            resolver,
            context,
            execution,
            mutations,
            connections,
            page: Mutex::new(Page::Workspace),
        }
    }

    #[must_use]
    pub fn context(&self) -> WorkspaceContext {
        self.context.current()
    }

    #[must_use]
    pub fn subscribe_context(&self) -> watch::Receiver<WorkspaceContext> {
        self.context.subscribe()
    }

    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.borrow().clone()
    }

    #[must_use]
    pub fn resolver_status(&self) -> ResolverStatus {
        self.resolver.status()
    }

    #[must_use]
    pub fn execution(&self) -> ExecutionSnapshot {
        self.execution.snapshot()
    }

    #[must_use]
    pub fn subscribe_execution(&self) -> watch::Receiver<ExecutionSnapshot> {
        self.execution.subscribe()
    }

    #[must_use]
    pub fn tree(&self) -> SchemaTree {
        self.mutations.tree()
    }

    #[must_use]
    pub fn current_tables(&self) -> Vec<TreeNode> {
        self.mutations.current_tables()
    }

    #[must_use]
    pub fn page(&self) -> Page {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn set_page(&self, page: Page) -> Result<Resolution, SessionError> {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = page;
        let connections = self.connections();
        let resolution = self.resolver.resolve(&connections, page).await?;
        self.after_resolution(&resolution).await;
        Ok(resolution)
    }

    /// Refetches the connection list and re-resolves the context against it.
    pub async fn load_connections(&self, refresh: bool) -> Result<Resolution, SessionError> {
        let connections = self
            .services
            .connections
            .list_connections(refresh)
            .await
            .map_err(|error| {
                warn!(%error, "failed to load connections");
                SessionError::Connections(error)
            })?;
        debug!(count = connections.len(), refresh, "connections loaded");
        self.connections.send_replace(connections.clone());

        let resolution = self.resolver.resolve(&connections, self.page()).await?;
        self.after_resolution(&resolution).await;
        Ok(resolution)
    }

    /// Header refresh: reloads connections and forces the database and
    /// schema lists to be refetched.
    pub async fn refresh(&self) -> Result<Resolution, SessionError> {
        self.resolver.request_refresh();
        self.load_connections(true).await
    }

    pub async fn select_connection(&self, id: DataSourceId) -> Result<Resolution, SessionError> {
        let connections = self.connections();
        let resolution = self.resolver.select_connection(id, &connections).await?;
        self.after_resolution(&resolution).await;
        Ok(resolution)
    }

    pub async fn select_database(
        &self,
        database: impl Into<String>,
    ) -> Result<Resolution, SessionError> {
        let resolution = self.resolver.select_database(database.into()).await?;
        self.after_resolution(&resolution).await;
        Ok(resolution)
    }

    pub async fn select_schema(&self, schema: Option<String>) -> Resolution {
        let resolution = self.resolver.select_schema(schema);
        self.after_resolution(&resolution).await;
        resolution
    }

    /// Loads the children of a tree node; the root lists data sources.
    pub async fn load_tree(&self, path: &NodePath) -> Result<MutationOutcome, SessionError> {
        Ok(self.mutations.load_children(path, false).await?)
    }

    pub async fn execute(&self, sql: impl Into<String>) -> Result<ExecutionOutcome, SessionError> {
        let context = self.context.current();
        Ok(self.execution.execute(sql, &context).await?)
    }

    pub fn cancel(&self) -> bool {
        self.execution.cancel()
    }

    pub async fn paginate(
        &self,
        index: usize,
        page_no: u32,
        page_size: u32,
    ) -> Result<ExecutionOutcome, SessionError> {
        Ok(self.execution.paginate(index, page_no, page_size).await?)
    }

    pub fn available_actions(&self, path: &NodePath) -> Result<Vec<OperationColumn>, SessionError> {
        let node = self.node(path)?;
        Ok(available_actions(&node, &self.context.current()))
    }

    /// Plans `action` against the node at `path` and runs it. A removed
    /// connection reloads the connection list, which re-resolves the context.
    pub async fn tree_action(
        &self,
        path: &NodePath,
        action: OperationColumn,
        input: &ActionInput,
    ) -> Result<MutationOutcome, SessionError> {
        let node = self.node(path)?;
        let context = self.context.current();
        let command = plan_action(action, &node, &context, input)?;
        debug!(?action, ?path, "running tree action");

        let outcome = self.mutations.run(path, command, &context).await?;
        if let MutationOutcome::ConnectionsChanged(id) = outcome {
            info!(data_source_id = id, "connection list changed, re-resolving");
            self.load_connections(false).await?;
        }
        Ok(outcome)
    }

    pub fn open_table_statement(&self, path: &NodePath) -> Result<Option<String>, SessionError> {
        Ok(open_table_statement(&self.node(path)?))
    }

    fn node(&self, path: &NodePath) -> Result<TreeNode, SessionError> {
        self.mutations
            .tree()
            .node(path)
            .cloned()
            .ok_or_else(|| SessionError::MissingNode(path.clone()))
    }

    /// A newly resolved database scope needs its table list.
    async fn after_resolution(&self, resolution: &Resolution) {
        match resolution {
            Resolution::Resolved(context) if context.database_name.is_some() => {
                if let Err(error) = self.mutations.load_tables(context, false).await {
                    warn!(%error, "failed to load table list");
                }
            }
            Resolution::Resolved(_) | Resolution::Cleared => self.mutations.clear_tables(),
            _ => {}
        }
    }
}
