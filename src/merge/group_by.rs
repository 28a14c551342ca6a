use std::cmp::Ordering;
use std::collections::HashMap;

use super::order_by::compare_rows;
use super::{read_row, MergedResult, SortKey};
use crate::error::{DbError, DbResult};
use crate::execute::QueryResult;
use crate::sql::AggregationType;
use crate::value::Value;

/// How one result column is re-aggregated across shards.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationColumn {
    /// SUM, COUNT, MIN or MAX over the partial values in `index`
    Simple { index: usize, function: AggregationType },
    /// AVG rebuilt from the per-shard SUM and COUNT columns
    Average {
        index: usize,
        sum_index: usize,
        count_index: usize,
    },
}

impl AggregationColumn {
    fn index(&self) -> usize {
        match self {
            AggregationColumn::Simple { index, .. } | AggregationColumn::Average { index, .. } => *index,
        }
    }
}

enum Accumulator {
    Sum(Option<Value>),
    Count(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Average { sum: Option<Value>, count: Option<Value> },
}

impl Accumulator {
    fn for_column(column: &AggregationColumn) -> Self {
        match column {
            AggregationColumn::Simple { function, .. } => match function {
                AggregationType::Sum => Accumulator::Sum(None),
                AggregationType::Count => Accumulator::Count(None),
                AggregationType::Min => Accumulator::Min(None),
                AggregationType::Max => Accumulator::Max(None),
                // an AVG without its derived columns can only be summed per group
                AggregationType::Avg => Accumulator::Sum(None),
            },
            AggregationColumn::Average { .. } => Accumulator::Average { sum: None, count: None },
        }
    }

    fn accumulate(&mut self, column: &AggregationColumn, row: &[Value]) -> DbResult<()> {
        let cell = |index: usize| row.get(index).cloned().unwrap_or(Value::Null);
        match (self, column) {
            (Accumulator::Sum(total) | Accumulator::Count(total), AggregationColumn::Simple { index, .. }) => {
                add_into(total, &cell(*index))
            }
            (Accumulator::Min(best), AggregationColumn::Simple { index, .. }) => {
                keep_if(best, cell(*index), Ordering::Less);
                Ok(())
            }
            (Accumulator::Max(best), AggregationColumn::Simple { index, .. }) => {
                keep_if(best, cell(*index), Ordering::Greater);
                Ok(())
            }
            (
                Accumulator::Average { sum, count },
                AggregationColumn::Average {
                    sum_index,
                    count_index,
                    ..
                },
            ) => {
                add_into(sum, &cell(*sum_index))?;
                add_into(count, &cell(*count_index))
            }
            _ => Err(DbError::Merge("Aggregation column does not match its accumulator".to_string())),
        }
    }

    fn finish(self) -> DbResult<Value> {
        match self {
            Accumulator::Sum(total) | Accumulator::Min(total) | Accumulator::Max(total) => {
                Ok(total.unwrap_or(Value::Null))
            }
            Accumulator::Count(total) => Ok(total.unwrap_or(Value::Integer(0))),
            Accumulator::Average { sum, count } => {
                let (Some(sum), Some(count)) = (sum, count) else {
                    return Ok(Value::Null);
                };
                let count = numeric(&count)?;
                if count == 0.0 {
                    return Ok(Value::Null);
                }
                Ok(Value::Float(numeric(&sum)? / count))
            }
        }
    }
}

fn numeric(value: &Value) -> DbResult<f64> {
    match value {
        Value::Integer(_) | Value::Float(_) => value
            .as_f64()
            .ok_or_else(|| DbError::Merge(format!("Cannot read {} as a number", value))),
        other => Err(DbError::Merge(format!(
            "Expected a numeric partial aggregate, got {}",
            other.type_name()
        ))),
    }
}

/// Null partials are skipped; integers stay integers until they overflow.
fn add_into(total: &mut Option<Value>, value: &Value) -> DbResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let sum = match (total.take(), value) {
        (None, v) => {
            numeric(v)?;
            v.clone()
        }
        (Some(Value::Integer(a)), Value::Integer(b)) => match a.checked_add(*b) {
            Some(sum) => Value::Integer(sum),
            None => Value::Float(a as f64 + *b as f64),
        },
        (Some(a), b) => Value::Float(numeric(&a)? + numeric(b)?),
    };
    *total = Some(sum);
    Ok(())
}

fn keep_if(best: &mut Option<Value>, candidate: Value, wanted: Ordering) {
    if candidate.is_null() {
        return;
    }
    let replace = match best {
        Some(current) => candidate.compare(current) == wanted,
        None => true,
    };
    if replace {
        *best = Some(candidate);
    }
}

struct Group {
    row: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

/// Groups every shard row in memory, re-aggregates, then sorts the groups.
pub struct GroupByMemoryMerge {
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
}

impl GroupByMemoryMerge {
    /// An empty `key_indexes` puts every row in one group (aggregation without GROUP BY).
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        key_indexes: &[usize],
        aggregations: &[AggregationColumn],
        sort_keys: &[SortKey],
    ) -> DbResult<Self> {
        let mut positions: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();

        for mut result in results {
            while result.next()? {
                let row = read_row(result.as_mut())?;
                let mut key = Vec::new();
                for index in key_indexes {
                    row.get(*index).unwrap_or(&Value::Null).encode_key(&mut key);
                }
                let position = *positions.entry(key).or_insert_with(|| {
                    groups.push(Group {
                        row: row.clone(),
                        accumulators: aggregations.iter().map(Accumulator::for_column).collect(),
                    });
                    groups.len() - 1
                });
                let group = &mut groups[position];
                for (accumulator, column) in group.accumulators.iter_mut().zip(aggregations) {
                    accumulator.accumulate(column, &row)?;
                }
            }
        }

        let mut rows = Vec::with_capacity(groups.len());
        for group in groups {
            let mut row = group.row;
            for (accumulator, column) in group.accumulators.into_iter().zip(aggregations) {
                let value = accumulator.finish()?;
                if let Some(slot) = row.get_mut(column.index()) {
                    *slot = value;
                }
            }
            rows.push(row);
        }
        rows.sort_by(|a, b| compare_rows(a, b, sort_keys));

        Ok(Self {
            rows: rows.into_iter(),
            current: None,
        })
    }
}

impl MergedResult for GroupByMemoryMerge {
    fn next(&mut self) -> DbResult<bool> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn value(&self, column_index: usize) -> DbResult<Value> {
        self.current
            .as_ref()
            .and_then(|row| row.get(column_index))
            .cloned()
            .ok_or_else(|| DbError::Merge(format!("No value at column {}", column_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::MemoryQueryResult;

    fn shard(rows: Vec<Vec<Value>>) -> Box<dyn QueryResult> {
        Box::new(MemoryQueryResult::new(
            vec!["status".into(), "cnt".into(), "avg".into(), "c".into(), "s".into()],
            rows,
        ))
    }

    fn row(status: &str, cnt: i64, avg: f64, c: i64, s: i64) -> Vec<Value> {
        vec![status.into(), cnt.into(), avg.into(), c.into(), s.into()]
    }

    #[test]
    fn test_groups_across_shards_and_rebuilds_average() {
        let aggregations = vec![
            AggregationColumn::Simple {
                index: 1,
                function: AggregationType::Count,
            },
            AggregationColumn::Average {
                index: 2,
                sum_index: 4,
                count_index: 3,
            },
        ];
        let sort = vec![SortKey {
            index: 0,
            descending: false,
            nulls_first: true,
        }];
        let mut merged = GroupByMemoryMerge::new(
            vec![
                shard(vec![row("paid", 1, 10.0, 1, 10), row("new", 2, 3.0, 2, 6)]),
                shard(vec![row("paid", 3, 30.0, 3, 90)]),
            ],
            &[0],
            &aggregations,
            &sort,
        )
        .unwrap();

        assert!(merged.next().unwrap());
        assert_eq!(merged.value(0).unwrap(), Value::from("new"));
        assert!(merged.next().unwrap());
        assert_eq!(merged.value(0).unwrap(), Value::from("paid"));
        assert_eq!(merged.value(1).unwrap(), Value::Integer(4));
        // (10 + 90) / (1 + 3), not the average of 10 and 30
        assert_eq!(merged.value(2).unwrap(), Value::Float(25.0));
        assert!(!merged.next().unwrap());
    }

    #[test]
    fn test_min_max_skip_nulls() {
        let results: Vec<Box<dyn QueryResult>> = vec![
            Box::new(MemoryQueryResult::new(
                vec!["lo".into(), "hi".into()],
                vec![vec![Value::Null, Value::Integer(5)]],
            )),
            Box::new(MemoryQueryResult::new(
                vec!["lo".into(), "hi".into()],
                vec![vec![Value::Integer(2), Value::Integer(9)]],
            )),
        ];
        let aggregations = vec![
            AggregationColumn::Simple {
                index: 0,
                function: AggregationType::Min,
            },
            AggregationColumn::Simple {
                index: 1,
                function: AggregationType::Max,
            },
        ];
        let mut merged = GroupByMemoryMerge::new(results, &[], &aggregations, &[]).unwrap();
        assert!(merged.next().unwrap());
        assert_eq!(merged.value(0).unwrap(), Value::Integer(2));
        assert_eq!(merged.value(1).unwrap(), Value::Integer(9));
    }

    #[test]
    fn test_text_partial_sum_is_a_merge_error() {
        let results: Vec<Box<dyn QueryResult>> = vec![Box::new(MemoryQueryResult::new(
            vec!["total".into()],
            vec![vec![Value::from("oops")]],
        ))];
        let aggregations = vec![AggregationColumn::Simple {
            index: 0,
            function: AggregationType::Sum,
        }];
        assert!(matches!(
            GroupByMemoryMerge::new(results, &[], &aggregations, &[]),
            Err(DbError::Merge(_))
        ));
    }
}
