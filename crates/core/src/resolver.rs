use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{find_connection, Connection, DataSourceId};
use crate::context::{ContextPublisher, Page, WorkspaceContext};
use crate::services::{ChildrenParams, TransportError, TreeService};
use crate::tree::{ExtraParams, TreeNode, TreeNodeType};

/// What the resolver exposes besides the context itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolverStatus {
    pub loading: bool,
    pub connection: Option<Connection>,
    pub database_options: Vec<String>,
    pub schema_options: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The workspace page is not active.
    Inert,
    /// No connections exist; the context was emptied.
    Cleared,
    /// Nothing to refetch.
    Unchanged,
    Resolved(WorkspaceContext),
    /// A newer resolution started while this one was waiting.
    Superseded,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to load workspace metadata: {0}")]
    Transport(#[source] TransportError),
    #[error("connection {0} is not in the connection list")]
    UnknownConnection(DataSourceId),
    #[error("no connection is selected")]
    NoConnection,
}

#[derive(Debug, Default)]
struct ResolverState {
    current: Option<Connection>,
    refresh_requested: bool,
}

/// Desired selection carried through one fetch chain.
#[derive(Debug)]
struct Target {
    connection: Connection,
    database: Option<String>,
    schema: Option<String>,
    refresh: bool,
}

/// Sole writer of the workspace context.
pub struct ContextResolver {
    tree: Arc<dyn TreeService>,
    publisher: ContextPublisher,
    state: Mutex<ResolverState>,
    status: Arc<watch::Sender<ResolverStatus>>,
    generation: AtomicU64,
}

impl ContextResolver {
    #[must_use]
    pub fn new(tree: Arc<dyn TreeService>, publisher: ContextPublisher) -> Self {
        let (status, _) = watch::channel(ResolverStatus::default());
        Self {
            tree,
            publisher,
            state: Mutex::new(ResolverState::default()),
            status: Arc::new(status),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn status(&self) -> ResolverStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ResolverStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn current_connection(&self) -> Option<Connection> {
        self.lock_state().current.clone()
    }

    /// The next resolution refetches databases and schemas with
    /// `refresh: true` even when the connection did not change.
    pub fn request_refresh(&self) {
        self.lock_state().refresh_requested = true;
    }

    pub async fn resolve(
        &self,
        connections: &[Connection],
        page: Page,
    ) -> Result<Resolution, ResolveError> {
        if page != Page::Workspace {
            return Ok(Resolution::Inert);
        }

        let generation = self.next_generation();
        if connections.is_empty() {
            {
                let mut state = self.lock_state();
                state.current = None;
                state.refresh_requested = false;
            }
            self.publisher.publish(WorkspaceContext::default());
            self.status.send_replace(ResolverStatus::default());
            info!("connection list is empty, workspace context cleared");
            return Ok(Resolution::Cleared);
        }

        let (selected, refresh) = {
            let mut state = self.lock_state();
            let selected = state
                .current
                .as_ref()
                .and_then(|current| find_connection(connections, current.id))
                .unwrap_or(&connections[0])
                .clone();
            state.current = Some(selected.clone());
            (selected, state.refresh_requested)
        };

        let context = self.publisher.current();
        let identity_changed = context.data_source_id != Some(selected.id);
        if !identity_changed && !refresh {
            self.sync_identity(&selected, &context);
            return Ok(Resolution::Unchanged);
        }

        self.lock_state().refresh_requested = false;
        let target = if identity_changed {
            self.reset_to(&selected);
            Target {
                connection: selected,
                database: None,
                schema: None,
                refresh,
            }
        } else {
            Target {
                connection: selected,
                database: context.database_name,
                schema: context.schema_name,
                refresh,
            }
        };
        self.fetch_databases(generation, target).await
    }

    /// Switches the workspace to `id`. A no-op when it is already active.
    pub async fn select_connection(
        &self,
        id: DataSourceId,
        connections: &[Connection],
    ) -> Result<Resolution, ResolveError> {
        if self.publisher.current().data_source_id == Some(id) {
            return Ok(Resolution::Unchanged);
        }
        let selected = find_connection(connections, id)
            .cloned()
            .ok_or(ResolveError::UnknownConnection(id))?;

        let generation = self.next_generation();
        let refresh = {
            let mut state = self.lock_state();
            state.current = Some(selected.clone());
            std::mem::take(&mut state.refresh_requested)
        };
        info!(data_source_id = id, alias = %selected.alias, "switching connection");
        self.reset_to(&selected);
        self.fetch_databases(
            generation,
            Target {
                connection: selected,
                database: None,
                schema: None,
                refresh,
            },
        )
        .await
    }

    /// Selects `database` and refetches its schemas, keeping the previous
    /// schema when the new database still lists it.
    pub async fn select_database(&self, database: String) -> Result<Resolution, ResolveError> {
        let connection = self.current_connection().ok_or(ResolveError::NoConnection)?;
        let context = self.publisher.current();
        if context.database_name.as_deref() == Some(database.as_str()) {
            return Ok(Resolution::Unchanged);
        }

        let generation = self.next_generation();
        self.status.send_modify(|status| status.loading = true);
        self.fetch_schemas(
            generation,
            Target {
                connection,
                database: Some(database),
                schema: context.schema_name,
                refresh: false,
            },
        )
        .await
    }

    /// Schema changes need no fetch, but they still supersede any resolution
    /// in flight so its stale schema pick is dropped.
    pub fn select_schema(&self, schema: Option<String>) -> Resolution {
        let current = self.publisher.current();
        if current.database_name.is_none() {
            return Resolution::Unchanged;
        }
        self.next_generation();
        self.status.send_if_modified(|status| std::mem::take(&mut status.loading));
        let next = current.with_schema(schema);
        if self.publisher.publish(next.clone()) {
            debug!(schema = ?next.schema_name, "schema selected");
            Resolution::Resolved(next)
        } else {
            Resolution::Unchanged
        }
    }

    async fn fetch_databases(
        &self,
        generation: u64,
        target: Target,
    ) -> Result<Resolution, ResolveError> {
        let params = ChildrenParams {
            data_source_id: Some(target.connection.id),
            database_name: None,
            schema_name: None,
            refresh: target.refresh,
            extra_params: connection_params(&target.connection),
        };
        debug!(
            generation,
            data_source_id = target.connection.id,
            refresh = target.refresh,
            "fetching databases"
        );
        let response = self
            .tree
            .list_children(TreeNodeType::DataSource, &params)
            .await;
        if !self.is_latest(generation) {
            debug!(generation, "dropping superseded database list");
            return Ok(Resolution::Superseded);
        }

        let databases = match response {
            Ok(nodes) => node_keys(&nodes, TreeNodeType::Database),
            Err(error) => {
                let fallback = WorkspaceContext::for_connection(&target.connection)
                    .with_database(target.database)
                    .with_schema(target.schema);
                return Err(self.fail(fallback, error));
            }
        };

        let database = pick(target.database.as_deref(), &databases);
        let database_changed = database != target.database;
        self.status.send_modify(|status| {
            status.database_options = databases;
        });

        if database.is_none() {
            let next = WorkspaceContext::for_connection(&target.connection);
            return Ok(self.settle(next, Vec::new()));
        }

        self.fetch_schemas(
            generation,
            Target {
                connection: target.connection,
                database,
                schema: if database_changed { None } else { target.schema },
                refresh: target.refresh,
            },
        )
        .await
    }

    async fn fetch_schemas(
        &self,
        generation: u64,
        target: Target,
    ) -> Result<Resolution, ResolveError> {
        let base = WorkspaceContext::for_connection(&target.connection)
            .with_database(target.database.clone());
        let Some(database) = target.database.clone() else {
            return Ok(self.settle(base, Vec::new()));
        };

        let params = ChildrenParams {
            data_source_id: Some(target.connection.id),
            database_name: Some(database.clone()),
            schema_name: None,
            refresh: target.refresh,
            extra_params: ExtraParams {
                database_name: Some(database.clone()),
                ..connection_params(&target.connection)
            },
        };
        debug!(
            generation,
            data_source_id = target.connection.id,
            database = %database,
            "fetching schemas"
        );
        let response = self
            .tree
            .list_children(TreeNodeType::Database, &params)
            .await;
        if !self.is_latest(generation) {
            debug!(generation, "dropping superseded schema list");
            return Ok(Resolution::Superseded);
        }

        match response {
            Ok(nodes) => {
                let schemas = node_keys(&nodes, TreeNodeType::Schema);
                let schema = pick(target.schema.as_deref(), &schemas);
                Ok(self.settle(base.with_schema(schema), schemas))
            }
            Err(error) => Err(self.fail(base, error)),
        }
    }

    fn settle(&self, next: WorkspaceContext, schemas: Vec<String>) -> Resolution {
        self.status.send_modify(|status| {
            status.loading = false;
            status.schema_options = schemas;
            status.last_error = None;
        });
        if self.publisher.publish(next.clone()) {
            info!(
                data_source_id = ?next.data_source_id,
                database = ?next.database_name,
                schema = ?next.schema_name,
                "workspace context resolved"
            );
        }
        Resolution::Resolved(next)
    }

    fn fail(&self, fallback: WorkspaceContext, error: TransportError) -> ResolveError {
        warn!(
            data_source_id = ?fallback.data_source_id,
            %error,
            "failed to resolve workspace context"
        );
        self.publisher.publish(fallback);
        self.status.send_modify(|status| {
            status.loading = false;
            status.last_error = Some(error.to_string());
        });
        ResolveError::Transport(error)
    }

    /// Publishes the bare identity of a newly selected connection before its
    /// databases are known.
    fn reset_to(&self, connection: &Connection) {
        self.publisher
            .publish(WorkspaceContext::for_connection(connection));
        self.status.send_modify(|status| {
            status.loading = true;
            status.connection = Some(connection.clone());
            status.database_options.clear();
            status.schema_options.clear();
        });
    }

    /// A refetched connection list can rename the active connection.
    fn sync_identity(&self, connection: &Connection, context: &WorkspaceContext) {
        let next = WorkspaceContext {
            data_source_name: Some(connection.alias.clone()),
            database_type: Some(connection.db_type),
            ..context.clone()
        };
        self.publisher.publish(next);
        self.status.send_if_modified(|status| {
            if status.connection.as_ref() == Some(connection) {
                return false;
            }
            status.connection = Some(connection.clone());
            true
        });
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn connection_params(connection: &Connection) -> ExtraParams {
    ExtraParams {
        data_source_id: Some(connection.id),
        data_source_name: Some(connection.alias.clone()),
        database_type: Some(connection.db_type),
        ..ExtraParams::default()
    }
}

/// Engines without schemas answer a database listing with folder nodes,
/// which are not selectable.
fn node_keys(nodes: &[TreeNode], node_type: TreeNodeType) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| node.tree_node_type == node_type)
        .map(|node| node.key.clone())
        .collect()
}

/// Previous value when still listed, otherwise the first option.
fn pick(previous: Option<&str>, options: &[String]) -> Option<String> {
    previous
        .and_then(|previous| options.iter().find(|option| option.as_str() == previous))
        .or_else(|| options.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{pick, ContextResolver, Resolution, ResolveError};
    use crate::context::{context_channel, ContextView, Page};
    use crate::services::TransportError;
    use crate::test_support::{connection, named_nodes, FakeTreeService};
    use crate::tree::TreeNodeType;

    fn resolver(tree: &Arc<FakeTreeService>) -> (ContextResolver, ContextView) {
        let (publisher, view) = context_channel();
        (ContextResolver::new(tree.clone(), publisher), view)
    }

    #[test]
    fn pick_prefers_the_previous_value_when_listed() {
        let options = vec!["a".to_string(), "b".to_string()];
        assert_eq!(pick(Some("b"), &options).as_deref(), Some("b"));
        assert_eq!(pick(Some("z"), &options).as_deref(), Some("a"));
        assert_eq!(pick(None, &options).as_deref(), Some("a"));
        assert_eq!(pick(Some("a"), &[]), None);
    }

    #[tokio::test]
    async fn first_connection_is_selected_when_none_is_current() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app", "audit"]);
        tree.set_schemas(1, "app", &["public"]);
        let (resolver, view) = resolver(&tree);

        let resolution = resolver
            .resolve(&[connection(1), connection(2)], Page::Workspace)
            .await
            .expect("resolution should succeed");

        assert!(matches!(resolution, Resolution::Resolved(_)));
        let context = view.current();
        assert_eq!(context.data_source_id, Some(1));
        assert_eq!(context.data_source_name.as_deref(), Some("conn-1"));
        assert_eq!(context.database_name.as_deref(), Some("app"));
        assert_eq!(context.schema_name.as_deref(), Some("public"));

        let status = resolver.status();
        assert!(!status.loading);
        assert_eq!(status.database_options, vec!["app", "audit"]);
        assert_eq!(status.schema_options, vec!["public"]);
        assert_eq!(status.connection.map(|connection| connection.id), Some(1));
    }

    #[tokio::test]
    async fn removed_connection_falls_back_and_clears_selection() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(2, &["warehouse"]);
        tree.set_schemas(2, "warehouse", &["sales"]);
        let (resolver, view) = resolver(&tree);
        resolver
            .resolve(&[connection(2)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");
        assert_eq!(view.current().database_name.as_deref(), Some("warehouse"));

        let mut receiver = view.subscribe();
        let _ = receiver.borrow_and_update();
        let resolution = resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("fallback resolution should succeed");

        assert!(matches!(resolution, Resolution::Resolved(_)));
        let context = view.current();
        assert_eq!(context.data_source_id, Some(1));
        assert!(context.database_name.is_none());
        assert!(context.schema_name.is_none());
        assert!(receiver.has_changed().expect("publisher should be alive"));
    }

    #[tokio::test]
    async fn inactive_page_leaves_the_context_alone() {
        let tree = Arc::new(FakeTreeService::default());
        let (resolver, view) = resolver(&tree);

        let resolution = resolver
            .resolve(&[connection(1)], Page::Settings)
            .await
            .expect("inert resolution");
        assert_eq!(resolution, Resolution::Inert);
        assert!(view.current().is_empty());
        assert!(tree.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_connection_list_clears_the_context() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        let (resolver, view) = resolver(&tree);
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");

        let resolution = resolver
            .resolve(&[], Page::Workspace)
            .await
            .expect("clearing is not an error");
        assert_eq!(resolution, Resolution::Cleared);
        assert!(view.current().is_empty());
        assert!(resolver.current_connection().is_none());
        assert!(resolver.status().database_options.is_empty());
    }

    #[tokio::test]
    async fn unchanged_connection_without_refresh_does_not_refetch() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        let (resolver, _view) = resolver(&tree);
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");
        let calls = tree.calls().len();

        let resolution = resolver
            .resolve(&[connection(1), connection(2)], Page::Workspace)
            .await
            .expect("second resolution should succeed");
        assert_eq!(resolution, Resolution::Unchanged);
        assert_eq!(tree.calls().len(), calls);
    }

    #[tokio::test]
    async fn refresh_keeps_listed_selection_and_passes_the_flag() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app", "audit"]);
        tree.set_schemas(1, "audit", &["raw", "curated"]);
        let (resolver, view) = resolver(&tree);
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");
        resolver
            .select_database("audit".to_string())
            .await
            .expect("database switch should succeed");
        resolver.select_schema(Some("curated".to_string()));

        tree.set_databases(1, &["archive", "audit", "app"]);
        resolver.request_refresh();
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("refresh should succeed");

        let context = view.current();
        assert_eq!(context.database_name.as_deref(), Some("audit"));
        assert_eq!(context.schema_name.as_deref(), Some("curated"));
        let last_database_fetch = tree
            .calls_for(TreeNodeType::DataSource)
            .pop()
            .expect("database list should be fetched");
        assert!(last_database_fetch.refresh);

        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("flag is consumed");
        assert_eq!(tree.calls_for(TreeNodeType::DataSource).len(), 2);
    }

    #[tokio::test]
    async fn vanished_database_falls_back_to_first_and_resets_schema() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app", "audit"]);
        tree.set_schemas(1, "audit", &["raw"]);
        tree.set_schemas(1, "app", &["public", "raw"]);
        let (resolver, view) = resolver(&tree);
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");
        resolver
            .select_database("audit".to_string())
            .await
            .expect("database switch should succeed");
        assert_eq!(view.current().schema_name.as_deref(), Some("raw"));

        tree.set_databases(1, &["app"]);
        resolver.request_refresh();
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("refresh should succeed");

        let context = view.current();
        assert_eq!(context.database_name.as_deref(), Some("app"));
        assert_eq!(context.schema_name.as_deref(), Some("public"));
    }

    #[tokio::test]
    async fn empty_database_list_yields_no_selection() {
        let tree = Arc::new(FakeTreeService::default());
        let (resolver, view) = resolver(&tree);

        resolver
            .resolve(&[connection(5)], Page::Workspace)
            .await
            .expect("resolution should succeed");
        let context = view.current();
        assert_eq!(context.data_source_id, Some(5));
        assert!(context.database_name.is_none());
        assert!(context.schema_name.is_none());
        assert!(tree.calls_for(TreeNodeType::Database).is_empty());
    }

    #[tokio::test]
    async fn database_fetch_failure_publishes_identity_and_records_error() {
        let tree = Arc::new(FakeTreeService::default());
        tree.fail_next(TreeNodeType::DataSource, "timeout");
        let (resolver, view) = resolver(&tree);

        let err = resolver
            .resolve(&[connection(3)], Page::Workspace)
            .await
            .expect_err("fetch failure surfaces");
        assert!(matches!(err, ResolveError::Transport(_)));

        let context = view.current();
        assert_eq!(context.data_source_id, Some(3));
        assert!(context.database_name.is_none());
        let status = resolver.status();
        assert!(!status.loading);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn schema_fetch_failure_keeps_the_chosen_database() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        tree.fail_next(TreeNodeType::Database, "denied");
        let (resolver, view) = resolver(&tree);

        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect_err("schema failure surfaces");
        let context = view.current();
        assert_eq!(context.database_name.as_deref(), Some("app"));
        assert!(context.schema_name.is_none());
    }

    #[tokio::test]
    async fn superseded_fetch_does_not_overwrite_newer_selection() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(2, &["warehouse"]);
        let gate = tree.gate(TreeNodeType::DataSource, Some(1), None);
        let (resolver, view) = resolver(&tree);
        let connections = [connection(1), connection(2)];

        let slow = resolver.resolve(&connections, Page::Workspace);
        let fast = async {
            tokio::task::yield_now().await;
            let resolution = resolver.select_connection(2, &connections).await;
            gate.send(Ok(named_nodes(TreeNodeType::Database, &["stale"])))
                .expect("slow fetch should still be waiting");
            resolution
        };
        let (slow, fast) = tokio::join!(slow, fast);

        assert_eq!(slow.expect("superseded is not an error"), Resolution::Superseded);
        assert!(matches!(fast, Ok(Resolution::Resolved(_))));
        let context = view.current();
        assert_eq!(context.data_source_id, Some(2));
        assert_eq!(context.database_name.as_deref(), Some("warehouse"));
    }

    #[tokio::test]
    async fn schema_pick_wins_over_a_refresh_in_flight() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        tree.set_schemas(1, "app", &["public", "sales"]);
        let (resolver, view) = resolver(&tree);
        let connections = [connection(1)];
        resolver
            .resolve(&connections, Page::Workspace)
            .await
            .expect("initial resolution should succeed");
        assert_eq!(view.current().schema_name.as_deref(), Some("public"));

        let gate = tree.gate(TreeNodeType::DataSource, Some(1), None);
        resolver.request_refresh();
        let refresh = resolver.resolve(&connections, Page::Workspace);
        let pick = async {
            tokio::task::yield_now().await;
            let resolution = resolver.select_schema(Some("sales".to_string()));
            gate.send(Ok(named_nodes(TreeNodeType::Database, &["app"])))
                .expect("refresh should still be waiting");
            resolution
        };
        let (refresh, pick) = tokio::join!(refresh, pick);

        assert_eq!(refresh.expect("superseded is not an error"), Resolution::Superseded);
        assert!(matches!(pick, Resolution::Resolved(_)));
        assert_eq!(view.current().schema_name.as_deref(), Some("sales"));
        assert!(!resolver.status().loading);
    }

    #[tokio::test]
    async fn select_connection_validates_and_skips_the_active_one() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        let (resolver, _view) = resolver(&tree);
        let connections = [connection(1), connection(2)];
        resolver
            .resolve(&connections, Page::Workspace)
            .await
            .expect("initial resolution should succeed");

        assert_eq!(
            resolver
                .select_connection(1, &connections)
                .await
                .expect("same connection is a no-op"),
            Resolution::Unchanged
        );
        let err = resolver
            .select_connection(9, &connections)
            .await
            .expect_err("unknown connection");
        assert!(matches!(err, ResolveError::UnknownConnection(9)));
    }

    #[tokio::test]
    async fn renamed_connection_updates_the_published_alias() {
        let tree = Arc::new(FakeTreeService::default());
        tree.set_databases(1, &["app"]);
        let (resolver, view) = resolver(&tree);
        resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect("initial resolution should succeed");

        let mut renamed = connection(1);
        renamed.alias = "primary".to_string();
        resolver
            .resolve(&[renamed], Page::Workspace)
            .await
            .expect("second resolution should succeed");

        let context = view.current();
        assert_eq!(context.data_source_name.as_deref(), Some("primary"));
        assert_eq!(context.database_name.as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn gate_failure_is_reported_as_transport_error() {
        let tree = Arc::new(FakeTreeService::default());
        let gate = tree.gate(TreeNodeType::DataSource, Some(1), None);
        let (resolver, _view) = resolver(&tree);
        gate.send(Err(TransportError::new("network down")))
            .expect("gate should be registered");

        let err = resolver
            .resolve(&[connection(1)], Page::Workspace)
            .await
            .expect_err("failure surfaces");
        assert_eq!(err.to_string(), "failed to load workspace metadata: network down");
    }
}
