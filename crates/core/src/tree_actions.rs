use thiserror::Error;

use crate::connection::{DataSourceId, DatabaseType};
use crate::context::WorkspaceContext;
use crate::services::TableParams;
use crate::sql_text::select_all_statement;
use crate::tree::{TreeNode, TreeNodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationColumn {
    Refresh,
    EditTableData,
    ExportDdl,
    ShiftOut,
    CreateTable,
    CreateConsole,
    DeleteTable,
    EditTable,
    EditSource,
    Top,
}

/// Menu for a node type, before engine exclusions.
#[must_use]
pub fn node_operations(node_type: TreeNodeType) -> &'static [OperationColumn] {
    use OperationColumn::{
        CreateConsole, CreateTable, DeleteTable, EditSource, EditTable, EditTableData, ExportDdl,
        Refresh, ShiftOut, Top,
    };

    match node_type {
        TreeNodeType::DataSource => &[Refresh, CreateConsole, EditSource, ShiftOut],
        TreeNodeType::Database | TreeNodeType::Schema => &[Refresh, CreateConsole, CreateTable],
        TreeNodeType::Tables => &[Refresh, CreateTable],
        TreeNodeType::Table => &[
            Top,
            EditTableData,
            EditTable,
            ExportDdl,
            DeleteTable,
            Refresh,
        ],
        TreeNodeType::DataSources
        | TreeNodeType::Schemas
        | TreeNodeType::Columns
        | TreeNodeType::Keys
        | TreeNodeType::Indexes
        | TreeNodeType::Views
        | TreeNodeType::Functions
        | TreeNodeType::Procedures
        | TreeNodeType::Triggers => &[Refresh],
        TreeNodeType::Column
        | TreeNodeType::Key
        | TreeNodeType::Index
        | TreeNodeType::View
        | TreeNodeType::Function
        | TreeNodeType::Procedure
        | TreeNodeType::Trigger => &[],
    }
}

/// Operations an engine does not support.
#[must_use]
pub fn excluded_operations(database_type: DatabaseType) -> &'static [OperationColumn] {
    use OperationColumn::{CreateTable, EditTable, EditTableData, ExportDdl};

    match database_type {
        DatabaseType::Hive => &[ExportDdl, EditTable],
        DatabaseType::Clickhouse => &[EditTable],
        DatabaseType::Sqlite => &[EditTableData],
        DatabaseType::Redis | DatabaseType::Mongodb => {
            &[ExportDdl, EditTable, EditTableData, CreateTable]
        }
        _ => &[],
    }
}

#[must_use]
pub fn available_actions(node: &TreeNode, context: &WorkspaceContext) -> Vec<OperationColumn> {
    let Some(database_type) = node.extra_params.database_type.or(context.database_type) else {
        return Vec::new();
    };
    let excluded = excluded_operations(database_type);
    node_operations(node.tree_node_type)
        .iter()
        .copied()
        .filter(|operation| !excluded.contains(operation))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    EditTable,
    EditTableData,
    CreateTable,
    CreateConsole,
    EditSource,
}

/// A request for the workspace to open a tab; the session does not act on
/// it beyond handing it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabIntro {
    pub kind: TabKind,
    pub node: TreeNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeCommand {
    RefreshChildren,
    DeleteTable(TableParams),
    PinTable(TableParams),
    UnpinTable(TableParams),
    ExportDdl(TableParams),
    RemoveConnection(DataSourceId),
    OpenTab(TabIntro),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionInput {
    /// Table name typed by the user to confirm a delete.
    pub confirmation: Option<String>,
}

impl ActionInput {
    #[must_use]
    pub fn confirm(table_name: impl Into<String>) -> Self {
        Self {
            confirmation: Some(table_name.into()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeActionError {
    #[error("typed name does not match table `{expected}`")]
    ConfirmationMismatch { expected: String },
    #[error("action `{0:?}` is not available for this node")]
    ActionUnavailable(OperationColumn),
    #[error("`{0}` is not a valid connection id")]
    InvalidConnectionKey(String),
    #[error("no data source is selected for table `{0}`")]
    MissingTableContext(String),
}

/// Maps an action on `node` to the command the mutation handler runs. Pure:
/// nothing is called and nothing is published.
pub fn plan_action(
    action: OperationColumn,
    node: &TreeNode,
    context: &WorkspaceContext,
    input: &ActionInput,
) -> Result<TreeCommand, TreeActionError> {
    if !available_actions(node, context).contains(&action) {
        return Err(TreeActionError::ActionUnavailable(action));
    }

    let command = match action {
        OperationColumn::Refresh => TreeCommand::RefreshChildren,
        OperationColumn::DeleteTable => {
            if input.confirmation.as_deref() != Some(node.key.as_str()) {
                return Err(TreeActionError::ConfirmationMismatch {
                    expected: node.key.clone(),
                });
            }
            let params = TableParams::from_extra_params(&node.extra_params, node.key.as_str());
            TreeCommand::DeleteTable(require_data_source(params)?)
        }
        OperationColumn::Top => {
            let params = require_data_source(TableParams::from_context(context, node.key.as_str()))?;
            if node.pinned {
                TreeCommand::UnpinTable(params)
            } else {
                TreeCommand::PinTable(params)
            }
        }
        OperationColumn::ExportDdl => TreeCommand::ExportDdl(require_data_source(
            TableParams::from_context(context, node.key.as_str()),
        )?),
        OperationColumn::ShiftOut => {
            let id = node
                .key
                .parse::<DataSourceId>()
                .map_err(|_| TreeActionError::InvalidConnectionKey(node.key.clone()))?;
            TreeCommand::RemoveConnection(id)
        }
        OperationColumn::EditTable => open_tab(TabKind::EditTable, node),
        OperationColumn::EditTableData => open_tab(TabKind::EditTableData, node),
        OperationColumn::CreateTable => open_tab(TabKind::CreateTable, node),
        OperationColumn::CreateConsole => open_tab(TabKind::CreateConsole, node),
        OperationColumn::EditSource => open_tab(TabKind::EditSource, node),
    };
    Ok(command)
}

/// Console text for opening a table node, `None` for anything else.
#[must_use]
pub fn open_table_statement(node: &TreeNode) -> Option<String> {
    (node.tree_node_type == TreeNodeType::Table).then(|| select_all_statement(&node.key))
}

fn open_tab(kind: TabKind, node: &TreeNode) -> TreeCommand {
    let mut node = node.clone();
    node.name = node.key.clone();
    TreeCommand::OpenTab(TabIntro { kind, node })
}

fn require_data_source(params: TableParams) -> Result<TableParams, TreeActionError> {
    if params.data_source_id.is_none() {
        return Err(TreeActionError::MissingTableContext(params.table_name));
    }
    Ok(params)
}
