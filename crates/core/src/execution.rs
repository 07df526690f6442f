use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ExecutionSettings;
use crate::context::WorkspaceContext;
use crate::results::{
    pagination_configs, result_sets, PaginationConfig, ResultPage, ResultSet, StatementResult,
};
use crate::services::{
    ExecutionRequest, HistoryRecord, HistoryService, SqlService, TransportError,
};

/// Cancellation handle for one request. Identity (`id`) is what decides
/// whether a response is still wanted; a fresh token is issued per request.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Published execution state. Results and their pagination live in one
/// vector of [`ResultPage`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionSnapshot {
    pub run_id: u64,
    /// Scope the run was submitted under; pages are fetched against it.
    pub context: WorkspaceContext,
    pub status: ExecutionStatus,
    pub pages: Vec<ResultPage>,
    pub error: Option<String>,
    pub history_error: Option<String>,
    pub loading_page: Option<usize>,
}

impl ExecutionSnapshot {
    fn running(run_id: u64, context: WorkspaceContext) -> Self {
        Self {
            run_id,
            context,
            status: ExecutionStatus::Running,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    #[must_use]
    pub fn result_sets(&self) -> Vec<&ResultSet> {
        result_sets(&self.pages)
    }

    #[must_use]
    pub fn pagination_configs(&self) -> Vec<PaginationConfig> {
        pagination_configs(&self.pages)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed { result_count: usize },
    PageLoaded { index: usize },
    /// The response belonged to a cancelled or superseded request.
    Discarded,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("sql execution failed: {0}")]
    Transport(#[source] TransportError),
    #[error("no completed execution to paginate")]
    NotCompleted,
    #[error("result set {0} does not exist")]
    NoSuchResult(usize),
    #[error("page number must be at least 1")]
    InvalidPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Run,
    Page { index: usize },
}

#[derive(Debug)]
struct InFlight {
    token: CancellationToken,
    kind: RequestKind,
}

#[derive(Clone)]
pub struct ExecutionSession {
    sql: Arc<dyn SqlService>,
    history: Arc<dyn HistoryService>,
    settings: ExecutionSettings,
    state: Arc<watch::Sender<ExecutionSnapshot>>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_token_id: Arc<AtomicU64>,
}

impl ExecutionSession {
    #[must_use]
    pub fn new(
        sql: Arc<dyn SqlService>,
        history: Arc<dyn HistoryService>,
        settings: ExecutionSettings,
    ) -> Self {
        let (state, _) = watch::channel(ExecutionSnapshot::default());
        Self {
            sql,
            history,
            settings,
            state: Arc::new(state),
            in_flight: Arc::new(Mutex::new(None)),
            next_token_id: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExecutionSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    /// Runs `sql` against `context`. A run still in flight is cancelled first
    /// and its response will be discarded.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
        context: &WorkspaceContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let sql = sql.into();
        let token = self.issue_token(RequestKind::Run);
        let run_id = token.id();
        self.state.send_modify(|snapshot| {
            if snapshot.is_running() {
                debug!(
                    superseded = snapshot.run_id,
                    run_id, "superseding running execution"
                );
            }
            *snapshot = ExecutionSnapshot::running(run_id, context.clone());
        });

        let request = ExecutionRequest::new(sql.as_str(), context, self.settings.page_size);
        debug!(
            run_id,
            data_source_id = ?request.data_source_id,
            database = ?request.database_name,
            "executing sql"
        );
        let response = self.sql.execute_sql(&request, &token).await;
        self.release(&token);

        match response {
            Ok(statements) => {
                let page_size = request.page_size;
                let pages = statements
                    .into_iter()
                    .map(|statement| ResultPage::first(statement, page_size))
                    .collect::<Vec<_>>();
                let result_count = pages.len();

                let applied = self.state.send_if_modified(|snapshot| {
                    if !run_is_current(snapshot, &token) {
                        return false;
                    }
                    snapshot.status = ExecutionStatus::Completed;
                    snapshot.pages = pages;
                    true
                });
                if !applied {
                    debug!(run_id, "dropping stale execution response");
                    return Ok(ExecutionOutcome::Discarded);
                }

                info!(run_id, result_count, "execution completed");
                self.record_history(run_id, context, &sql);
                Ok(ExecutionOutcome::Completed { result_count })
            }
            Err(error) => {
                let message = error.to_string();
                let applied = self.state.send_if_modified(|snapshot| {
                    if !run_is_current(snapshot, &token) {
                        return false;
                    }
                    snapshot.status = ExecutionStatus::Failed;
                    snapshot.pages.clear();
                    snapshot.error = Some(message);
                    true
                });
                if !applied {
                    debug!(run_id, "dropping stale execution failure");
                    return Ok(ExecutionOutcome::Discarded);
                }

                warn!(run_id, %error, "execution failed");
                Err(ExecutionError::Transport(error))
            }
        }
    }

    /// Cancels whatever request is in flight. Returns `false` when there was
    /// nothing to cancel.
    pub fn cancel(&self) -> bool {
        let Some(in_flight) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        in_flight.token.cancel();
        let token_id = in_flight.token.id();
        match in_flight.kind {
            RequestKind::Run => {
                self.state.send_if_modified(|snapshot| {
                    if snapshot.run_id != token_id || !snapshot.is_running() {
                        return false;
                    }
                    snapshot.status = ExecutionStatus::Cancelled;
                    snapshot.pages.clear();
                    snapshot.error = None;
                    true
                });
                info!(run_id = token_id, "execution cancelled");
            }
            RequestKind::Page { index } => {
                self.state.send_if_modified(|snapshot| {
                    if snapshot.loading_page != Some(index) {
                        return false;
                    }
                    snapshot.loading_page = None;
                    true
                });
                debug!(index, "page load cancelled");
            }
        }
        true
    }

    /// Re-runs one result's statement with a different page, replacing only
    /// that result. The result keeps its uuid and the run's original scope.
    pub async fn paginate(
        &self,
        index: usize,
        page_no: u32,
        page_size: u32,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if page_no == 0 || page_size == 0 {
            return Err(ExecutionError::InvalidPage);
        }

        let (run_id, context, uuid, sql, known_total) = {
            let snapshot = self.state.borrow();
            if snapshot.status != ExecutionStatus::Completed {
                return Err(ExecutionError::NotCompleted);
            }
            let page = snapshot
                .pages
                .get(index)
                .ok_or(ExecutionError::NoSuchResult(index))?;
            (
                snapshot.run_id,
                snapshot.context.clone(),
                page.result.uuid,
                page.result.original_sql().to_string(),
                page.pagination.total,
            )
        };

        let token = self.issue_token(RequestKind::Page { index });
        self.state.send_modify(|snapshot| {
            snapshot.loading_page = Some(index);
        });

        let request = ExecutionRequest::new(sql.as_str(), &context, page_size)
            .with_page(page_no, page_size);
        debug!(run_id, index, page_no, page_size, "loading result page");
        let response = self.sql.execute_sql(&request, &token).await;
        self.release(&token);

        let page_is_current = |snapshot: &ExecutionSnapshot| {
            !token.is_cancelled()
                && snapshot.run_id == run_id
                && snapshot.loading_page == Some(index)
                && snapshot
                    .pages
                    .get(index)
                    .is_some_and(|page| page.result.uuid == uuid)
        };

        match response {
            Ok(statements) => {
                let statement = statements
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| StatementResult::new(sql.as_str()));
                let applied = self.state.send_if_modified(|snapshot| {
                    if !page_is_current(snapshot) {
                        return false;
                    }
                    let mut pagination =
                        PaginationConfig::for_statement(page_no, page_size, &statement);
                    pagination.total = known_total.or(pagination.total);
                    let page = &mut snapshot.pages[index];
                    page.result.statement = statement;
                    page.pagination = pagination;
                    snapshot.loading_page = None;
                    true
                });
                if !applied {
                    debug!(run_id, index, "dropping stale page response");
                    return Ok(ExecutionOutcome::Discarded);
                }
                Ok(ExecutionOutcome::PageLoaded { index })
            }
            Err(error) => {
                let message = error.to_string();
                let applied = self.state.send_if_modified(|snapshot| {
                    if !page_is_current(snapshot) {
                        return false;
                    }
                    snapshot.loading_page = None;
                    snapshot.error = Some(message);
                    true
                });
                if !applied {
                    return Ok(ExecutionOutcome::Discarded);
                }
                warn!(run_id, index, %error, "page load failed");
                Err(ExecutionError::Transport(error))
            }
        }
    }

    fn issue_token(&self, kind: RequestKind) -> CancellationToken {
        let token = CancellationToken::new(self.next_token_id.fetch_add(1, Ordering::Relaxed));
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(InFlight {
                token: token.clone(),
                kind,
            });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        token
    }

    fn release(&self, token: &CancellationToken) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .as_ref()
            .is_some_and(|current| current.token.id() == token.id())
        {
            *in_flight = None;
        }
    }

    fn record_history(&self, run_id: u64, context: &WorkspaceContext, sql: &str) {
        if !self.settings.history_enabled {
            return;
        }

        let record = HistoryRecord::new(context, sql, Utc::now());
        let history = Arc::clone(&self.history);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if let Err(error) = history.create_history(&record).await {
                warn!(run_id, %error, "failed to record execution history");
                state.send_if_modified(|snapshot| {
                    if snapshot.run_id != run_id {
                        return false;
                    }
                    snapshot.history_error = Some(error.to_string());
                    true
                });
            }
        });
    }
}

fn run_is_current(snapshot: &ExecutionSnapshot, token: &CancellationToken) -> bool {
    !token.is_cancelled() && snapshot.run_id == token.id() && snapshot.is_running()
}
