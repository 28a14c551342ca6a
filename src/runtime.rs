//! Sharding runtime
//!
//! One [`ShardingRuntime`] per logical schema. It holds everything the
//! pipeline shares between logical connections: the sharding rule, the data
//! source registry, table metadata, the execute engine and the event sinks.
//! Nothing here is process-global; embed as many runtimes as needed.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BaseConfig, Props, ShardingConfig};
use crate::connection::ShardingConnection;
use crate::datasource::DataSourceRegistry;
use crate::error::DbResult;
use crate::event::{EventDispatcher, EventSink, TracingEventSink};
use crate::execute::{ExecuteEngine, ExecutionContext, SqlExecuteTemplate};
use crate::metadata::TableMetadata;
use crate::route::{RouteResult, RoutingEngine};
use crate::rule::ShardingRule;
use crate::transaction::{
    AsyncDeliveryJob, FileTransactionLogStorage, MemoryTransactionLogStorage, TransactionCoordinator,
    TransactionLogStorage, TwoPhaseCommitProvider, XaTransactionProvider,
};
use crate::value::Value;

pub struct ShardingRuntime {
    props: Props,
    base: BaseConfig,
    /// replaced wholesale when orchestration pushes a new rule
    rule: RwLock<Arc<ShardingRule>>,
    registry: DataSourceRegistry,
    metadata: RwLock<Arc<TableMetadata>>,
    engine: Arc<ExecuteEngine>,
    events: EventDispatcher,
    xa_provider: Arc<dyn XaTransactionProvider>,
    journal: Arc<dyn TransactionLogStorage>,
}

impl ShardingRuntime {
    /// Build the rule from `config` against the registered data sources.
    pub fn new(config: &ShardingConfig, registry: DataSourceRegistry) -> DbResult<Self> {
        config.validate()?;
        let rule = ShardingRule::from_config(config, &registry.names())?;
        Self::with_rule(config, rule, registry)
    }

    /// Use a programmatically built rule; `config` still supplies props and BASE settings.
    pub fn with_rule(config: &ShardingConfig, rule: ShardingRule, registry: DataSourceRegistry) -> DbResult<Self> {
        let props = config.props.clone();
        let engine = ExecuteEngine::new(props.executor_size, Duration::from_millis(props.shutdown_timeout_ms))?;
        let journal: Arc<dyn TransactionLogStorage> = match &config.base.journal_path {
            Some(path) => Arc::new(
                FileTransactionLogStorage::open(path)?.with_compact_threshold(config.base.journal_compact_threshold),
            ),
            None => Arc::new(MemoryTransactionLogStorage::new()),
        };

        tracing::info!(
            "Sharding runtime ready: {} data source(s), {} transactions, executor_size={}",
            registry.names().len(),
            props.transaction_type,
            props.executor_size
        );

        Ok(Self {
            props,
            base: config.base.clone(),
            rule: RwLock::new(Arc::new(rule)),
            registry,
            metadata: RwLock::new(Arc::new(TableMetadata::new())),
            engine: Arc::new(engine),
            events: EventDispatcher::new().with_sink(Arc::new(TracingEventSink)),
            xa_provider: Arc::new(TwoPhaseCommitProvider),
            journal,
        })
    }

    pub fn with_metadata(self, metadata: TableMetadata) -> Self {
        *self.metadata.write() = Arc::new(metadata);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    pub fn with_xa_provider(mut self, provider: Arc<dyn XaTransactionProvider>) -> Self {
        tracing::debug!("XA provider set to {}", provider.name());
        self.xa_provider = provider;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn TransactionLogStorage>) -> Self {
        self.journal = journal;
        self
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn base_config(&self) -> &BaseConfig {
        &self.base
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    /// Snapshot of the current rule.
    pub fn rule(&self) -> Arc<ShardingRule> {
        Arc::clone(&self.rule.read())
    }

    /// Swap in a new rule; statements already routed keep the old one.
    pub fn swap_rule(&self, rule: ShardingRule) {
        *self.rule.write() = Arc::new(rule);
        tracing::info!("Sharding rule replaced");
    }

    pub fn metadata(&self) -> Arc<TableMetadata> {
        Arc::clone(&self.metadata.read())
    }

    pub fn swap_metadata(&self, metadata: TableMetadata) {
        *self.metadata.write() = Arc::new(metadata);
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn journal(&self) -> Arc<dyn TransactionLogStorage> {
        Arc::clone(&self.journal)
    }

    pub fn engine(&self) -> &Arc<ExecuteEngine> {
        &self.engine
    }

    pub fn route(&self, sql: &str, parameters: &[Value], context: &ExecutionContext) -> DbResult<RouteResult> {
        let rule = self.rule();
        let metadata = self.metadata();
        RoutingEngine::new(&rule, &self.registry, &metadata, self.props.database_type)
            .with_sql_show(self.props.sql_show)
            .route(sql, parameters, context)
    }

    /// A template publishing to the runtime sinks plus `extra`.
    pub fn template(&self, extra: Option<Arc<dyn EventSink>>) -> SqlExecuteTemplate {
        let mut events = self.events.clone();
        if let Some(sink) = extra {
            events.add_sink(sink);
        }
        SqlExecuteTemplate::new(Arc::clone(&self.engine), events)
    }

    pub fn new_coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::for_type(
            self.props.transaction_type,
            Arc::clone(&self.xa_provider),
            Arc::clone(&self.journal),
        )
    }

    /// Open a logical connection.
    pub fn connect(self: &Arc<Self>) -> ShardingConnection {
        ShardingConnection::new(Arc::clone(self))
    }

    /// Redelivery job over this runtime's BASE journal.
    pub fn delivery_job(&self) -> AsyncDeliveryJob {
        AsyncDeliveryJob::new(Arc::clone(&self.journal), self.registry.clone(), &self.base)
    }

    /// Stop the execute engine. Logical connections still open fail their
    /// next parallel execution.
    pub fn close(&self) {
        self.engine.close();
        tracing::info!("Sharding runtime closed");
    }
}
