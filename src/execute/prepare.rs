//! Groups execution units onto physical connections.

use std::sync::Arc;

use crate::datasource::Connection;
use crate::error::{DbError, DbResult};
use crate::route::ExecutionUnit;

/// How long a physical connection stays tied to the units it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// one connection per unit; results stream from the open cursor
    MemoryStrict,
    /// units share connections; each result is loaded into memory before the next unit runs
    ConnectionStrict,
}

/// Supplies physical connections by data source name.
pub trait ConnectionProvider {
    /// At most `count` connections; fewer when the provider pins one per name.
    fn connections(&mut self, data_source: &str, count: usize) -> DbResult<Vec<Arc<dyn Connection>>>;
}

/// A unit with its position in the routed unit list.
#[derive(Debug, Clone)]
pub struct StatementUnit {
    pub index: usize,
    pub unit: ExecutionUnit,
}

/// Units that run one after another on a single connection.
#[derive(Clone)]
pub struct ExecutionGroup {
    pub data_source: String,
    pub connection: Arc<dyn Connection>,
    pub mode: ConnectionMode,
    pub units: Vec<StatementUnit>,
}

impl ExecutionGroup {
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

/// Split units per data source into connection groups, in first-appearance
/// order of the data sources.
pub fn prepare_groups(
    units: &[ExecutionUnit],
    max_connections_per_query: usize,
    provider: &mut dyn ConnectionProvider,
) -> DbResult<Vec<(String, Vec<ExecutionGroup>)>> {
    let mut by_source: Vec<(String, Vec<StatementUnit>)> = Vec::new();
    for (index, unit) in units.iter().enumerate() {
        let statement_unit = StatementUnit {
            index,
            unit: unit.clone(),
        };
        match by_source.iter_mut().find(|(ds, _)| *ds == unit.data_source) {
            Some((_, list)) => list.push(statement_unit),
            None => by_source.push((unit.data_source.clone(), vec![statement_unit])),
        }
    }

    let max = max_connections_per_query.max(1);
    let mut prepared = Vec::with_capacity(by_source.len());
    for (data_source, units) in by_source {
        let wanted = units.len().min(max);
        let connections = provider.connections(&data_source, wanted)?;
        if connections.is_empty() {
            return Err(DbError::InternalError(format!(
                "No connection available for data source '{}'",
                data_source
            )));
        }
        let mode = if connections.len() < units.len() {
            ConnectionMode::ConnectionStrict
        } else {
            ConnectionMode::MemoryStrict
        };

        // contiguous partitions, one per connection
        let partition = units.len().div_ceil(connections.len());
        let mut groups = Vec::with_capacity(connections.len());
        let mut remaining = units.into_iter().peekable();
        for connection in connections {
            if remaining.peek().is_none() {
                break;
            }
            groups.push(ExecutionGroup {
                data_source: data_source.clone(),
                connection,
                mode,
                units: remaining.by_ref().take(partition).collect(),
            });
        }
        tracing::trace!(
            "Prepared {} group(s) on {} in {:?} mode",
            groups.len(),
            data_source,
            mode
        );
        prepared.push((data_source, groups));
    }
    Ok(prepared)
}
