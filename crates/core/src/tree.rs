use serde::{Deserialize, Serialize};

use crate::connection::{DataSourceId, DatabaseType};
use crate::context::WorkspaceContext;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreeNodeType {
    DataSources,
    DataSource,
    Database,
    Schemas,
    Schema,
    Tables,
    Table,
    Columns,
    Column,
    Keys,
    Key,
    Indexes,
    Index,
    Views,
    View,
    Functions,
    Function,
    Procedures,
    Procedure,
    Triggers,
    Trigger,
}

impl TreeNodeType {
    #[must_use]
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            Self::Column
                | Self::Key
                | Self::Index
                | Self::View
                | Self::Function
                | Self::Procedure
                | Self::Trigger
        )
    }
}

/// Type-specific payload carried by a node; every field is optional because
/// each level of the tree only knows the scope above it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExtraParams {
    #[serde(default)]
    pub data_source_id: Option<DataSourceId>,
    #[serde(default)]
    pub data_source_name: Option<String>,
    #[serde(default)]
    pub database_type: Option<DatabaseType>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
}

impl ExtraParams {
    #[must_use]
    pub fn from_context(context: &WorkspaceContext) -> Self {
        Self {
            data_source_id: context.data_source_id,
            data_source_name: context.data_source_name.clone(),
            database_type: context.database_type,
            database_name: context.database_name.clone(),
            schema_name: context.schema_name.clone(),
            table_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeNode {
    pub key: String,
    pub name: String,
    pub tree_node_type: TreeNodeType,
    #[serde(default)]
    pub extra_params: ExtraParams,
    #[serde(default)]
    pub pinned: bool,
    /// `None` until fetched.
    #[serde(default)]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    #[must_use]
    pub fn new(key: impl Into<String>, tree_node_type: TreeNodeType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            tree_node_type,
            extra_params: ExtraParams::default(),
            pinned: false,
            children: None,
        }
    }

    #[must_use]
    pub fn with_extra_params(mut self, extra_params: ExtraParams) -> Self {
        self.extra_params = extra_params;
        self
    }

    #[must_use]
    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    #[must_use]
    pub fn child(&self, key: &str) -> Option<&TreeNode> {
        self.children
            .as_deref()
            .and_then(|children| children.iter().find(|child| child.key == key))
    }

    fn child_mut(&mut self, key: &str) -> Option<&mut TreeNode> {
        self.children
            .as_mut()
            .and_then(|children| children.iter_mut().find(|child| child.key == key))
    }
}

/// Keys from the root's children down to a node. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(Vec<String>);

impl NodePath {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn join(&self, key: impl Into<String>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Self(keys)
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTree {
    root: TreeNode,
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self {
            root: TreeNode::new("dataSources", TreeNodeType::DataSources),
        }
    }
}

impl SchemaTree {
    #[must_use]
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    #[must_use]
    pub fn node(&self, path: &NodePath) -> Option<&TreeNode> {
        path.keys()
            .iter()
            .try_fold(&self.root, |node, key| node.child(key))
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut TreeNode> {
        let mut node = &mut self.root;
        for key in path.keys() {
            node = node.child_mut(key)?;
        }
        Some(node)
    }

    /// Replaces the children of the node at `path`; returns `false` when the
    /// node no longer exists.
    pub fn replace_children(&mut self, path: &NodePath, children: Vec<TreeNode>) -> bool {
        let Some(node) = self.node_mut(path) else {
            return false;
        };
        node.children = Some(children);
        true
    }
}
