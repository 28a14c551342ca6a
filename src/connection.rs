//! Logical connection
//!
//! A [`ShardingConnection`] is what a client holds: it owns the physical
//! connections it opened (cached by data source name), its execution flags
//! and its transaction state. It is never shared across threads.

use std::sync::Arc;

use crate::datasource::Connection;
use crate::error::{DbError, DbResult};
use crate::execute::{
    prepare_groups, BatchCollector, BatchExecutor, ConnectionProvider, ExceptionPolicy, ExecutionContext,
    QueryResult, StatementExecutor,
};
use crate::merge::{MergeEngine, ShardingResultSet};
use crate::route::RouteResult;
use crate::runtime::ShardingRuntime;
use crate::sql::{SqlStatement, TclStatement};
use crate::transaction::local::apply_to_all;
use crate::transaction::{
    CachedConnection, TransactionCoordinator, TransactionEvent, TransactionOperation, TransactionStatus,
    TransactionType,
};
use crate::value::Value;

/// Outcome of [`ShardingConnection::execute`].
pub enum ExecuteResponse {
    /// Unmerged per-unit cursors; pass to [`ShardingConnection::merge`].
    Query {
        statement: SqlStatement,
        parameters: Vec<Value>,
        results: Vec<Box<dyn QueryResult>>,
    },
    Update(u64),
    /// A transaction control statement ran.
    Transaction(TransactionStatus),
}

impl std::fmt::Debug for ExecuteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteResponse::Query { results, .. } => write!(f, "Query({} result(s))", results.len()),
            ExecuteResponse::Update(count) => write!(f, "Update({})", count),
            ExecuteResponse::Transaction(status) => write!(f, "Transaction({:?})", status),
        }
    }
}

pub struct ShardingConnection {
    runtime: Arc<ShardingRuntime>,
    context: ExecutionContext,
    auto_commit: bool,
    cached: Vec<CachedConnection>,
    coordinator: TransactionCoordinator,
    batch: BatchCollector,
    closed: bool,
}

impl ShardingConnection {
    pub(crate) fn new(runtime: Arc<ShardingRuntime>) -> Self {
        let context = ExecutionContext::new(runtime.props().exception_policy);
        let coordinator = runtime.new_coordinator();
        Self {
            runtime,
            context,
            auto_commit: true,
            cached: Vec::new(),
            coordinator,
            batch: BatchCollector::new(),
            closed: false,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn set_exception_policy(&mut self, policy: ExceptionPolicy) {
        self.context.exception_policy = policy;
    }

    /// Hint: send reads to masters for the rest of this connection's life.
    pub fn set_force_master(&mut self, force_master: bool) {
        self.context.force_master = force_master;
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.coordinator.transaction_type()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.coordinator.status()
    }

    /// Physical connections currently held.
    pub fn cached_connection_count(&self) -> usize {
        self.cached.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::IllegalTransactionState("Connection is closed".to_string()));
        }
        Ok(())
    }

    // ==================== Transactions ====================

    /// Leaving auto-commit begins a transaction; returning to it commits.
    pub fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.ensure_open()?;
        if self.auto_commit == auto_commit {
            return Ok(());
        }
        if auto_commit {
            self.commit()
        } else {
            self.begin()
        }
    }

    /// Unlike `set_auto_commit(false)`, fails when a transaction is already running.
    pub fn begin(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.dispatch(TransactionOperation::Begin)?;
        self.auto_commit = false;
        Ok(())
    }

    /// Commit every cached connection and return to auto-commit. A no-op
    /// outside a transaction.
    pub fn commit(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        let result = self.dispatch(TransactionOperation::Commit);
        self.finish_transaction();
        result
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        let result = self.dispatch(TransactionOperation::Rollback);
        self.finish_transaction();
        result
    }

    fn dispatch(&mut self, operation: TransactionOperation) -> DbResult<()> {
        let event = TransactionEvent {
            operation,
            connections: self.cached.clone(),
            auto_commit: operation != TransactionOperation::Begin,
        };
        self.coordinator.dispatch(&event)
    }

    fn finish_transaction(&mut self) {
        if self.auto_commit {
            return;
        }
        self.auto_commit = true;
        if self.coordinator.transaction_type() == TransactionType::Local {
            for cached in &self.cached {
                if let Err(e) = cached.connection.set_auto_commit(true) {
                    tracing::warn!("[{}] failed to restore auto-commit: {}", cached.data_source, e);
                }
            }
        }
    }

    // ==================== Execution ====================

    pub fn route(&self, sql: &str, parameters: &[Value]) -> DbResult<RouteResult> {
        self.ensure_open()?;
        self.runtime.route(sql, parameters, &self.context)
    }

    /// Run a routed statement. Transaction control statements drive the
    /// coordinator instead of reaching any data source.
    pub fn execute(&mut self, route: RouteResult, parameters: &[Value]) -> DbResult<ExecuteResponse> {
        self.ensure_open()?;
        if let SqlStatement::Tcl(tcl) = &route.statement {
            return self.execute_tcl(tcl, &route.sql);
        }
        self.coordinator.check_statement(&route.statement)?;

        let read_only = route.statement.is_read_only();
        let max_connections = self.runtime.props().max_connections_size_per_query;
        let groups = prepare_groups(&route.execution_units, max_connections, self)?;
        let context = self.execution_context(read_only);
        let sink = if read_only { None } else { self.coordinator.execution_sink() };
        let executor = StatementExecutor::new(self.runtime.template(sink));

        if read_only {
            let results = executor.execute_query(groups, &context)?;
            return Ok(ExecuteResponse::Query {
                statement: route.statement,
                parameters: parameters.to_vec(),
                results,
            });
        }

        let counts = executor.execute_update(groups, &context)?;
        self.context.master_visited = true;
        Ok(ExecuteResponse::Update(counts.iter().sum()))
    }

    /// Fold per-unit cursors into one logical result set.
    pub fn merge(&self, response: ExecuteResponse) -> DbResult<ShardingResultSet> {
        match response {
            ExecuteResponse::Query {
                statement,
                parameters,
                results,
            } => {
                let metadata = self.runtime.metadata();
                MergeEngine::new(&statement, &metadata, &parameters).merge(results)
            }
            ExecuteResponse::Transaction(_) => Ok(ShardingResultSet::empty()),
            ExecuteResponse::Update(_) => Err(DbError::OperationNotSupported(
                "Update counts cannot be merged into a result set".to_string(),
            )),
        }
    }

    pub fn execute_sql(&mut self, sql: &str, parameters: &[Value]) -> DbResult<ExecuteResponse> {
        let route = self.route(sql, parameters)?;
        self.execute(route, parameters)
    }

    pub fn execute_query(&mut self, sql: &str, parameters: &[Value]) -> DbResult<ShardingResultSet> {
        let route = self.route(sql, parameters)?;
        if !route.statement.is_read_only() && !matches!(route.statement, SqlStatement::Tcl(_)) {
            return Err(DbError::OperationNotSupported(format!(
                "execute_query needs a query, got {:?} statement",
                route.statement.kind()
            )));
        }
        let response = self.execute(route, parameters)?;
        self.merge(response)
    }

    pub fn execute_update(&mut self, sql: &str, parameters: &[Value]) -> DbResult<u64> {
        let route = self.route(sql, parameters)?;
        if route.statement.is_read_only() {
            return Err(DbError::OperationNotSupported(
                "execute_update cannot run a query".to_string(),
            ));
        }
        match self.execute(route, parameters)? {
            ExecuteResponse::Update(count) => Ok(count),
            _ => Ok(0),
        }
    }

    fn execution_context(&self, read_only: bool) -> ExecutionContext {
        let mut context = self.context.clone();
        context.serial |= self.coordinator.requires_serial_execution();
        if !read_only && self.coordinator.swallows_execution_failures() {
            context.exception_policy = ExceptionPolicy::Swallow;
        }
        context
    }

    fn execute_tcl(&mut self, statement: &TclStatement, sql: &str) -> DbResult<ExecuteResponse> {
        match statement {
            TclStatement::Begin => self.begin()?,
            TclStatement::Commit => self.commit()?,
            TclStatement::Rollback => self.rollback()?,
            TclStatement::SetAutoCommit(enabled) => self.set_auto_commit(*enabled)?,
            TclStatement::Savepoint(name) => {
                if !self.coordinator.is_active() || self.transaction_type() != TransactionType::Local {
                    return Err(DbError::OperationNotSupported(format!(
                        "Savepoint '{}' needs an active LOCAL transaction",
                        name
                    )));
                }
                apply_to_all(&self.cached, "Savepoint", |c| c.connection.execute_update(sql, &[]).map(|_| ()))?;
            }
        }
        Ok(ExecuteResponse::Transaction(self.coordinator.status()))
    }

    // ==================== Batches ====================

    /// Route one batch entry now; it runs on [`Self::execute_batch`].
    pub fn add_batch(&mut self, sql: &str, parameters: &[Value]) -> DbResult<()> {
        let route = self.route(sql, parameters)?;
        if route.statement.is_read_only() || matches!(route.statement, SqlStatement::Tcl(_)) {
            return Err(DbError::OperationNotSupported(
                "Only data-changing statements can be batched".to_string(),
            ));
        }
        self.coordinator.check_statement(&route.statement)?;
        self.batch.add_batch(&route);
        Ok(())
    }

    /// One update count per added entry, in the order they were added.
    pub fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        self.ensure_open()?;
        let collector = std::mem::take(&mut self.batch);
        if collector.batch_count() == 0 {
            return Ok(Vec::new());
        }

        let units = collector.execution_units();
        let max_connections = self.runtime.props().max_connections_size_per_query;
        let groups = prepare_groups(&units, max_connections, self)?;
        let context = self.execution_context(false);
        let template = self.runtime.template(self.coordinator.execution_sink());
        let counts = BatchExecutor::new(template).execute_batch(&collector, groups, &context)?;
        self.context.master_visited = true;
        Ok(counts)
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    // ==================== Lifecycle ====================

    /// Roll back an open transaction, then close every cached connection.
    /// Every connection is attempted; failures come back together.
    pub fn close(&mut self) -> DbResult<()> {
        if self.closed {
            return Ok(());
        }
        let rolled_back = if self.coordinator.is_active() {
            self.rollback()
        } else {
            Ok(())
        };

        let closed = apply_to_all(&self.cached, "Close", |c| c.connection.close());
        tracing::debug!("Logical connection closed ({} physical)", self.cached.len());
        self.cached.clear();
        self.batch.clear();
        self.context.clear();
        self.closed = true;
        rolled_back.and(closed)
    }
}

impl ConnectionProvider for ShardingConnection {
    /// Inside a transaction each data source name is pinned to one connection.
    fn connections(&mut self, data_source: &str, count: usize) -> DbResult<Vec<Arc<dyn Connection>>> {
        let wanted = if self.auto_commit { count.max(1) } else { 1 };
        let mut connections: Vec<Arc<dyn Connection>> = self
            .cached
            .iter()
            .filter(|c| c.data_source == data_source)
            .take(wanted)
            .map(|c| Arc::clone(&c.connection))
            .collect();

        while connections.len() < wanted {
            let connection = self.runtime.registry().get(data_source)?.get_connection()?;
            let cached = CachedConnection {
                data_source: data_source.to_string(),
                connection: Arc::clone(&connection),
            };
            if let Err(e) = self.coordinator.enlist(&cached) {
                if let Err(close_error) = connection.close() {
                    tracing::debug!("[{}] close after failed enlist: {}", data_source, close_error);
                }
                return Err(e);
            }
            tracing::debug!("Opened physical connection to {}", data_source);
            self.cached.push(cached);
            connections.push(connection);
        }
        Ok(connections)
    }
}

impl Drop for ShardingConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing logical connection: {}", e);
        }
    }
}
