use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::connection::{Connection, DataSourceId, DatabaseType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    #[default]
    Workspace,
    Connections,
    Dashboard,
    Settings,
}

/// The active connection/database/schema selection that scopes every query
/// and tree operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkspaceContext {
    pub data_source_id: Option<DataSourceId>,
    pub data_source_name: Option<String>,
    pub database_type: Option<DatabaseType>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
}

impl WorkspaceContext {
    /// Identity fields of `connection` with no database or schema selected.
    #[must_use]
    pub fn for_connection(connection: &Connection) -> Self {
        Self {
            data_source_id: Some(connection.id),
            data_source_name: Some(connection.alias.clone()),
            database_type: Some(connection.db_type),
            database_name: None,
            schema_name: None,
        }
    }

    #[must_use]
    pub fn with_database(mut self, database_name: Option<String>) -> Self {
        self.database_name = database_name;
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema_name: Option<String>) -> Self {
        self.schema_name = schema_name;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_source_id.is_none()
    }
}

/// Write capability for the current context. Only the resolver owns one.
#[derive(Debug)]
pub struct ContextPublisher {
    sender: Arc<watch::Sender<WorkspaceContext>>,
}

/// Read view handed to every other component.
#[derive(Debug, Clone)]
pub struct ContextView {
    sender: Arc<watch::Sender<WorkspaceContext>>,
}

#[must_use]
pub fn context_channel() -> (ContextPublisher, ContextView) {
    let (sender, _) = watch::channel(WorkspaceContext::default());
    let sender = Arc::new(sender);
    (
        ContextPublisher {
            sender: Arc::clone(&sender),
        },
        ContextView { sender },
    )
}

impl ContextPublisher {
    /// Returns `true` when subscribers were notified; structurally equal
    /// contexts are swallowed.
    pub fn publish(&self, next: WorkspaceContext) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    #[must_use]
    pub fn current(&self) -> WorkspaceContext {
        self.sender.borrow().clone()
    }
}

impl ContextView {
    #[must_use]
    pub fn current(&self) -> WorkspaceContext {
        self.sender.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceContext> {
        self.sender.subscribe()
    }
}
