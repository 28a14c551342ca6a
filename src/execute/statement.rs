//! Statement executors
//!
//! [`SqlExecutor`] is the per-unit capability. The two connection modes are
//! separate strategies picked per group; [`StatementExecutor`] fans groups out
//! through the template.

use std::sync::Arc;

use super::context::ExecutionContext;
use super::prepare::{ConnectionMode, ExecutionGroup, StatementUnit};
use super::query_result::{MemoryQueryResult, QueryResult};
use super::template::SqlExecuteTemplate;
use crate::datasource::Connection;
use crate::error::{DbError, DbResult};
use crate::event::{EventDispatcher, ExecutionEvent, UnitInfo};
use crate::route::ExecutionUnit;

pub trait SqlExecutor: Send + Sync {
    fn execute_query(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<Box<dyn QueryResult>>;

    fn execute_update(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<u64>;
}

/// Keeps the cursor open; its connection stays tied to the result.
pub struct MemoryStrictExecutor;

impl SqlExecutor for MemoryStrictExecutor {
    fn execute_query(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<Box<dyn QueryResult>> {
        connection.execute_query(&unit.sql, unit.parameters())
    }

    fn execute_update(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<u64> {
        connection.execute_update(&unit.sql, unit.parameters())
    }
}

/// Loads each result into memory so the connection is free for the next unit.
pub struct ConnectionStrictExecutor;

impl SqlExecutor for ConnectionStrictExecutor {
    fn execute_query(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<Box<dyn QueryResult>> {
        let cursor = connection.execute_query(&unit.sql, unit.parameters())?;
        Ok(Box::new(MemoryQueryResult::load(cursor)?))
    }

    fn execute_update(&self, connection: &dyn Connection, unit: &ExecutionUnit) -> DbResult<u64> {
        connection.execute_update(&unit.sql, unit.parameters())
    }
}

pub fn executor_for(mode: ConnectionMode) -> &'static dyn SqlExecutor {
    match mode {
        ConnectionMode::MemoryStrict => &MemoryStrictExecutor,
        ConnectionMode::ConnectionStrict => &ConnectionStrictExecutor,
    }
}

pub(crate) fn unit_info(unit: &StatementUnit) -> UnitInfo {
    UnitInfo {
        index: unit.index,
        data_source: unit.unit.data_source.clone(),
        sql: unit.unit.sql.clone(),
        parameter_sets: unit.unit.parameter_sets.clone(),
    }
}

/// Make sure a unit's failure names the data source it came from.
pub(crate) fn attribute(error: DbError, data_source: &str) -> DbError {
    match error {
        DbError::Execution { .. } => error,
        other => DbError::execution(data_source, other.to_string()),
    }
}

type UnitOperation<O> = fn(&dyn SqlExecutor, &dyn Connection, &ExecutionUnit) -> DbResult<O>;

pub struct StatementExecutor {
    template: SqlExecuteTemplate,
}

impl StatementExecutor {
    pub fn new(template: SqlExecuteTemplate) -> Self {
        Self { template }
    }

    pub fn execute_query(
        &self,
        groups: Vec<(String, Vec<ExecutionGroup>)>,
        context: &ExecutionContext,
    ) -> DbResult<Vec<Box<dyn QueryResult>>> {
        self.run(groups, context, |executor, connection, unit| {
            executor.execute_query(connection, unit)
        })
    }

    pub fn execute_update(
        &self,
        groups: Vec<(String, Vec<ExecutionGroup>)>,
        context: &ExecutionContext,
    ) -> DbResult<Vec<u64>> {
        self.run(groups, context, |executor, connection, unit| {
            executor.execute_update(connection, unit)
        })
    }

    fn run<O: Send + 'static>(
        &self,
        groups: Vec<(String, Vec<ExecutionGroup>)>,
        context: &ExecutionContext,
        operation: UnitOperation<O>,
    ) -> DbResult<Vec<O>> {
        let events = self.template.events().clone();
        let callback = Arc::new(move |group: ExecutionGroup| run_group(&events, &group, operation));
        self.template.execute(groups, context, callback)
    }
}

fn run_group<O>(events: &EventDispatcher, group: &ExecutionGroup, operation: UnitOperation<O>) -> DbResult<Vec<O>> {
    let executor = executor_for(group.mode);
    let mut outputs = Vec::with_capacity(group.units.len());
    for unit in &group.units {
        let info = unit_info(unit);
        events.publish(ExecutionEvent::UnitStarted { unit: info.clone() });
        match operation(executor, group.connection.as_ref(), &unit.unit) {
            Ok(output) => {
                events.publish(ExecutionEvent::UnitSucceeded { unit: info });
                outputs.push(output);
            }
            Err(e) => {
                events.publish(ExecutionEvent::UnitFailed {
                    unit: info,
                    error: e.to_string(),
                });
                return Err(attribute(e, &group.data_source));
            }
        }
    }
    Ok(outputs)
}
