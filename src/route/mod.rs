//! Routing Engine
//!
//! `route` turns one logical statement into execution units: sharding routing
//! picks data nodes, the rewriter produces each unit's SQL and parameters, and
//! the master-slave overlay picks the physical data source.

pub mod condition;
pub mod master_slave;
pub mod sharding;

use serde::Serialize;

use crate::datasource::DataSourceRegistry;
use crate::error::{DbError, DbResult};
use crate::execute::ExecutionContext;
use crate::metadata::TableMetadata;
use crate::rule::ShardingRule;
use crate::sql::{self, DatabaseType, RewriteContext, SqlRewriter, SqlStatement};
use crate::value::Value;

pub use condition::{ShardingCondition, ShardingConditions};
pub use master_slave::MasterSlaveRouter;
pub use sharding::{RouteUnit, ShardingRouter};

/// One physical statement: data source + SQL + its parameter sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionUnit {
    pub data_source: String,
    pub sql: String,
    pub parameter_sets: Vec<Vec<Value>>,
}

impl ExecutionUnit {
    pub fn new(data_source: &str, sql: &str, parameters: Vec<Value>) -> Self {
        Self {
            data_source: data_source.to_string(),
            sql: sql.to_string(),
            parameter_sets: vec![parameters],
        }
    }

    /// Parameters of a single (non-batch) execution.
    pub fn parameters(&self) -> &[Value] {
        self.parameter_sets.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub sql: String,
    pub statement: SqlStatement,
    pub execution_units: Vec<ExecutionUnit>,
}

impl RouteResult {
    pub fn is_single_unit(&self) -> bool {
        self.execution_units.len() == 1
    }
}

pub struct RoutingEngine<'a> {
    rule: &'a ShardingRule,
    registry: &'a DataSourceRegistry,
    metadata: &'a TableMetadata,
    database_type: DatabaseType,
    sql_show: bool,
}

impl<'a> RoutingEngine<'a> {
    pub fn new(
        rule: &'a ShardingRule,
        registry: &'a DataSourceRegistry,
        metadata: &'a TableMetadata,
        database_type: DatabaseType,
    ) -> Self {
        Self {
            rule,
            registry,
            metadata,
            database_type,
            sql_show: false,
        }
    }

    pub fn with_sql_show(mut self, sql_show: bool) -> Self {
        self.sql_show = sql_show;
        self
    }

    pub fn route(
        &self,
        logical_sql: &str,
        parameters: &[Value],
        context: &ExecutionContext,
    ) -> DbResult<RouteResult> {
        let statement = sql::parse(logical_sql, self.database_type)?;
        self.route_statement(logical_sql, statement, parameters, context)
    }

    /// Route an already parsed statement (batches parse once and route per parameter set).
    pub fn route_statement(
        &self,
        logical_sql: &str,
        statement: SqlStatement,
        parameters: &[Value],
        context: &ExecutionContext,
    ) -> DbResult<RouteResult> {
        // the registry may change between calls; never cache availability
        let available = self.available_logical_data_sources();
        let route_units = ShardingRouter::new(self.rule, &available).route(&statement, parameters)?;
        if route_units.len() > 1 {
            check_mergeable(&statement)?;
        }

        let rewrite_context = RewriteContext::new(&statement, self.metadata, route_units.len() > 1);
        let rewriter = SqlRewriter::new(logical_sql, &statement, &rewrite_context);
        let master_slave = MasterSlaveRouter::new(self.rule, self.registry);
        let read_only = statement.is_read_only();

        let mut execution_units = Vec::with_capacity(route_units.len());
        for unit in &route_units {
            let data_source = master_slave.resolve(&unit.data_source, read_only, context.use_master())?;
            let rows = unit.insert_rows.as_deref();
            let sql = rewriter.rewrite_sql(&unit.tables, rows, parameters)?;
            let params = rewriter.rewrite_parameters(parameters, rows)?;
            execution_units.push(ExecutionUnit::new(&data_source, &sql, params));
        }

        if self.sql_show {
            tracing::info!("Logic SQL: {}", logical_sql);
            for unit in &execution_units {
                tracing::info!(
                    "Actual SQL: {} ::: {} ::: {:?}",
                    unit.data_source,
                    unit.sql,
                    unit.parameters()
                );
            }
        }

        Ok(RouteResult {
            sql: logical_sql.to_string(),
            statement,
            execution_units,
        })
    }

    /// Logical names whose physical sources can still serve something.
    fn available_logical_data_sources(&self) -> Vec<String> {
        let registered = self.registry.names();
        self.rule
            .logical_data_source_names(&registered)
            .into_iter()
            .filter(|name| match self.rule.master_slave_rule(name) {
                Some(group) => group.physical_names().any(|p| self.registry.is_available(p)),
                None => self.registry.is_available(name),
            })
            .collect()
    }
}

/// Results of these shapes cannot be rebuilt from per-shard partials.
fn check_mergeable(statement: &SqlStatement) -> DbResult<()> {
    let SqlStatement::Select(select) = statement else {
        return Ok(());
    };
    if select.having.is_some() {
        return Err(DbError::OperationNotSupported(
            "HAVING is not supported when a query spans multiple shards".to_string(),
        ));
    }
    if select.has_distinct_aggregation() {
        return Err(DbError::OperationNotSupported(
            "DISTINCT aggregation is not supported when a query spans multiple shards".to_string(),
        ));
    }
    Ok(())
}
