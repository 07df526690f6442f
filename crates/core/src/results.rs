use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PAGE_NO: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// One statement's outcome as returned by the execution service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatementResult {
    pub original_sql: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Option<String>>>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Approximate; `has_next_page` is authoritative for "more rows exist".
    #[serde(default)]
    pub fuzzy_total: Option<u64>,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

fn default_success() -> bool {
    true
}

impl StatementResult {
    #[must_use]
    pub fn new(original_sql: impl Into<String>) -> Self {
        Self {
            original_sql: original_sql.into(),
            success: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(original_sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            original_sql: original_sql.into(),
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultSet {
    /// Client-assigned; stable across re-renders and re-pagination.
    pub uuid: Uuid,
    #[serde(flatten)]
    pub statement: StatementResult,
}

impl ResultSet {
    #[must_use]
    pub fn assign(statement: StatementResult) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            statement,
        }
    }

    #[must_use]
    pub fn original_sql(&self) -> &str {
        &self.statement.original_sql
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationConfig {
    pub page_no: u32,
    pub page_size: u32,
    pub total: Option<u64>,
    pub has_next_page: bool,
}

impl PaginationConfig {
    #[must_use]
    pub fn first_page(page_size: u32) -> Self {
        Self {
            page_no: DEFAULT_PAGE_NO,
            page_size,
            total: None,
            has_next_page: true,
        }
    }

    #[must_use]
    pub fn for_statement(page_no: u32, page_size: u32, statement: &StatementResult) -> Self {
        Self {
            page_no,
            page_size,
            total: statement.fuzzy_total,
            has_next_page: statement.has_next_page,
        }
    }

    #[must_use]
    pub fn has_previous_page(&self) -> bool {
        self.page_no > DEFAULT_PAGE_NO
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self::first_page(DEFAULT_PAGE_SIZE)
    }
}

/// A result set paired with its pagination, so the two sequences published
/// for an execution cannot drift apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultPage {
    pub result: ResultSet,
    pub pagination: PaginationConfig,
}

impl ResultPage {
    #[must_use]
    pub fn first(statement: StatementResult, page_size: u32) -> Self {
        let pagination = PaginationConfig::for_statement(DEFAULT_PAGE_NO, page_size, &statement);
        Self {
            result: ResultSet::assign(statement),
            pagination,
        }
    }
}

#[must_use]
pub fn result_sets(pages: &[ResultPage]) -> Vec<&ResultSet> {
    pages.iter().map(|page| &page.result).collect()
}

#[must_use]
pub fn pagination_configs(pages: &[ResultPage]) -> Vec<PaginationConfig> {
    pages.iter().map(|page| page.pagination).collect()
}
