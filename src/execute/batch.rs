//! Batch execution
//!
//! Routed batch entries sharing a data source and SQL collapse into one
//! physical batch. Each physical batch remembers which logical entry every
//! parameter set came from so counts can be folded back.

use std::sync::Arc;

use super::context::ExecutionContext;
use super::prepare::ExecutionGroup;
use super::statement::unit_info;
use super::template::SqlExecuteTemplate;
use crate::error::{DbError, DbResult, UnitFailure};
use crate::event::{EventDispatcher, ExecutionEvent};
use crate::route::{ExecutionUnit, RouteResult};

/// One physical batch statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRouteUnit {
    pub unit: ExecutionUnit,
    /// (logical entry index, position in `unit.parameter_sets`)
    pub index_mapping: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchCollector {
    units: Vec<BatchRouteUnit>,
    batch_count: usize,
}

impl BatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the route of the next logical entry.
    pub fn add_batch(&mut self, route: &RouteResult) {
        let logical = self.batch_count;
        for unit in &route.execution_units {
            let existing = self
                .units
                .iter_mut()
                .find(|b| b.unit.data_source == unit.data_source && b.unit.sql == unit.sql);
            match existing {
                Some(batch) => {
                    let position = batch.unit.parameter_sets.len();
                    batch.unit.parameter_sets.push(unit.parameters().to_vec());
                    batch.index_mapping.push((logical, position));
                }
                None => self.units.push(BatchRouteUnit {
                    unit: ExecutionUnit::new(&unit.data_source, &unit.sql, unit.parameters().to_vec()),
                    index_mapping: vec![(logical, 0)],
                }),
            }
        }
        self.batch_count += 1;
    }

    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    pub fn units(&self) -> &[BatchRouteUnit] {
        &self.units
    }

    pub fn execution_units(&self) -> Vec<ExecutionUnit> {
        self.units.iter().map(|b| b.unit.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.units.clear();
        self.batch_count = 0;
    }
}

struct BatchOutcome {
    index: usize,
    result: Result<Vec<u64>, UnitFailure>,
}

pub struct BatchExecutor {
    template: SqlExecuteTemplate,
}

impl BatchExecutor {
    pub fn new(template: SqlExecuteTemplate) -> Self {
        Self { template }
    }

    /// One count per logical entry. A failed physical batch contributes zeros
    /// and does not stop its siblings; failures are then reported per the
    /// exception policy.
    pub fn execute_batch(
        &self,
        collector: &BatchCollector,
        groups: Vec<(String, Vec<ExecutionGroup>)>,
        context: &ExecutionContext,
    ) -> DbResult<Vec<u64>> {
        let events = self.template.events().clone();
        let callback = Arc::new(move |group: ExecutionGroup| Ok(run_batch_group(&events, &group)));
        let outcomes = self.template.execute(groups, context, callback)?;

        let mut counts = vec![0u64; collector.batch_count()];
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(unit_counts) => {
                    let Some(batch) = collector.units().get(outcome.index) else {
                        continue;
                    };
                    for &(logical, actual) in &batch.index_mapping {
                        counts[logical] += unit_counts.get(actual).copied().unwrap_or(0);
                    }
                }
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            return Ok(counts);
        }
        let error = DbError::BatchExecution {
            update_counts: counts.clone(),
            failures,
        };
        self.template.handle_failure(error, context).map(|_| counts)
    }
}

fn run_batch_group(events: &EventDispatcher, group: &ExecutionGroup) -> Vec<BatchOutcome> {
    group
        .units
        .iter()
        .map(|unit| {
            let info = unit_info(unit);
            events.publish(ExecutionEvent::UnitStarted { unit: info.clone() });
            let result = group
                .connection
                .execute_batch(&unit.unit.sql, &unit.unit.parameter_sets);
            let result = match result {
                Ok(counts) => {
                    events.publish(ExecutionEvent::UnitSucceeded { unit: info });
                    Ok(counts)
                }
                Err(e) => {
                    events.publish(ExecutionEvent::UnitFailed {
                        unit: info,
                        error: e.to_string(),
                    });
                    Err(UnitFailure {
                        data_source: group.data_source.clone(),
                        sql: unit.unit.sql.clone(),
                        message: e.to_string(),
                    })
                }
            };
            BatchOutcome {
                index: unit.index,
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn route(units: &[(&str, &str, i64)]) -> RouteResult {
        RouteResult {
            sql: "UPDATE t_order SET status = 'x' WHERE id = ?".to_string(),
            statement: crate::sql::parse(
                "UPDATE t_order SET status = 'x' WHERE id = ?",
                crate::sql::DatabaseType::MySQL,
            )
            .unwrap(),
            execution_units: units
                .iter()
                .map(|(ds, sql, id)| ExecutionUnit::new(ds, sql, vec![Value::Integer(*id)]))
                .collect(),
        }
    }

    #[test]
    fn test_entries_with_same_target_collapse() {
        let mut collector = BatchCollector::new();
        collector.add_batch(&route(&[("ds0", "UPDATE t_order_0 ...", 2)]));
        collector.add_batch(&route(&[("ds1", "UPDATE t_order_1 ...", 1)]));
        collector.add_batch(&route(&[("ds0", "UPDATE t_order_0 ...", 4)]));

        assert_eq!(collector.batch_count(), 3);
        assert_eq!(collector.units().len(), 2);
        let first = &collector.units()[0];
        assert_eq!(first.unit.parameter_sets.len(), 2);
        assert_eq!(first.index_mapping, vec![(0, 0), (2, 1)]);
    }

    #[test]
    fn test_broadcast_entry_maps_into_every_unit() {
        let mut collector = BatchCollector::new();
        collector.add_batch(&route(&[("ds0", "a", 1), ("ds1", "a", 1)]));
        assert_eq!(collector.units().len(), 2);
        assert!(collector.units().iter().all(|b| b.index_mapping == vec![(0, 0)]));

        collector.clear();
        assert_eq!(collector.batch_count(), 0);
        assert!(collector.execution_units().is_empty());
    }
}
