//! Result Merge Engine
//!
//! Picks a merge stage from the shape of the logical SELECT:
//!
//! - GROUP BY, aggregation or DISTINCT: [`GroupByMemoryMerge`]
//! - ORDER BY: [`OrderByStreamMerge`]
//! - otherwise: [`IteratorMerge`]
//!
//! LIMIT/OFFSET is re-applied on top by [`LimitDecorator`]. A single shard
//! result already carries final semantics and is only iterated. Derived
//! columns appended by the rewriter are hidden from the caller.

pub mod group_by;
pub mod iterator;
pub mod limit;
pub mod order_by;

use crate::error::{DbError, DbResult};
use crate::execute::QueryResult;
use crate::metadata::TableMetadata;
use crate::sql::rewrite::{
    derived_columns, pagination_value, DerivedColumn, AVG_DERIVED_COUNT, AVG_DERIVED_SUM, GROUP_BY_DERIVED,
    ORDER_BY_DERIVED,
};
use crate::sql::{AggregationType, OrderDirection, OrderItem, OrderTarget, Projection, SelectStatement, SqlStatement};
use crate::value::Value;

pub use group_by::{AggregationColumn, GroupByMemoryMerge};
pub use iterator::IteratorMerge;
pub use limit::LimitDecorator;
pub use order_by::{compare_rows, OrderByStreamMerge};

/// One forward-only logical row stream.
pub trait MergedResult {
    fn next(&mut self) -> DbResult<bool>;

    fn value(&self, column_index: usize) -> DbResult<Value>;
}

/// Sort on one result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub index: usize,
    pub descending: bool,
    pub nulls_first: bool,
}

pub(crate) fn read_row(result: &mut dyn QueryResult) -> DbResult<Vec<Value>> {
    (0..result.column_count()).map(|i| result.value(i)).collect()
}

/// The merged result handed to callers; only the logical columns are visible.
pub struct ShardingResultSet {
    merged: Box<dyn MergedResult>,
    labels: Vec<String>,
}

impl std::fmt::Debug for ShardingResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardingResultSet")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl ShardingResultSet {
    pub fn new(merged: Box<dyn MergedResult>, labels: Vec<String>) -> Self {
        Self { merged, labels }
    }

    pub fn empty() -> Self {
        Self::new(Box::new(IteratorMerge::new(Vec::new())), Vec::new())
    }

    pub fn next(&mut self) -> DbResult<bool> {
        self.merged.next()
    }

    pub fn value(&self, column_index: usize) -> DbResult<Value> {
        if column_index >= self.labels.len() {
            return Err(DbError::Merge(format!(
                "Column index {} out of range ({} columns)",
                column_index,
                self.labels.len()
            )));
        }
        self.merged.value(column_index)
    }

    /// Value by column label, case-insensitive.
    pub fn value_by_label(&self, label: &str) -> DbResult<Value> {
        let index = self
            .labels
            .iter()
            .position(|l| l.eq_ignore_ascii_case(label))
            .ok_or_else(|| DbError::Merge(format!("Unknown column '{}'", label)))?;
        self.merged.value(index)
    }

    pub fn column_count(&self) -> usize {
        self.labels.len()
    }

    pub fn column_label(&self, column_index: usize) -> DbResult<String> {
        self.labels
            .get(column_index)
            .cloned()
            .ok_or_else(|| DbError::Merge(format!("Column index {} out of range", column_index)))
    }

    /// Drain the remaining rows.
    pub fn rows(&mut self) -> DbResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while self.next()? {
            rows.push((0..self.labels.len()).map(|i| self.merged.value(i)).collect::<DbResult<_>>()?);
        }
        Ok(rows)
    }
}

pub struct MergeEngine<'a> {
    statement: &'a SqlStatement,
    metadata: &'a TableMetadata,
    parameters: &'a [Value],
}

impl<'a> MergeEngine<'a> {
    /// `parameters` are the logical statement's, used for LIMIT/OFFSET markers.
    pub fn new(statement: &'a SqlStatement, metadata: &'a TableMetadata, parameters: &'a [Value]) -> Self {
        Self {
            statement,
            metadata,
            parameters,
        }
    }

    pub fn merge(&self, results: Vec<Box<dyn QueryResult>>) -> DbResult<ShardingResultSet> {
        let labels = match results.first() {
            Some(first) => (0..first.column_count())
                .map(|i| first.column_label(i))
                .collect::<DbResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        let SqlStatement::Select(select) = self.statement else {
            return Ok(ShardingResultSet::new(Box::new(IteratorMerge::new(results)), labels));
        };

        let derived = derived_columns(select, self.metadata);
        let visible = labels.len().saturating_sub(derived.len());
        let visible_labels = labels[..visible].to_vec();

        if results.len() <= 1 {
            return Ok(ShardingResultSet::new(
                Box::new(IteratorMerge::new(results)),
                visible_labels,
            ));
        }

        let columns = ColumnResolver {
            select,
            labels: &labels,
            derived: &derived,
            visible,
        };

        let grouped = !select.group_by.is_empty() || select.has_aggregation() || select.distinct;
        let merged: Box<dyn MergedResult> = if grouped {
            let key_indexes = if !select.group_by.is_empty() {
                columns.sort_keys(&select.group_by, GROUP_BY_DERIVED)?
                    .iter()
                    .map(|k| k.index)
                    .collect()
            } else if select.has_aggregation() {
                Vec::new()
            } else {
                (0..visible).collect()
            };
            let sort_keys = if !select.order_by.is_empty() {
                columns.sort_keys(&select.order_by, ORDER_BY_DERIVED)?
            } else {
                columns.sort_keys(&select.group_by, GROUP_BY_DERIVED)?
            };
            let aggregations = columns.aggregations()?;
            tracing::trace!(
                "Group-by merge over {} shard(s): {} key column(s), {} aggregation(s)",
                results.len(),
                key_indexes.len(),
                aggregations.len()
            );
            Box::new(GroupByMemoryMerge::new(results, &key_indexes, &aggregations, &sort_keys)?)
        } else if !select.order_by.is_empty() {
            let sort_keys = columns.sort_keys(&select.order_by, ORDER_BY_DERIVED)?;
            Box::new(OrderByStreamMerge::new(results, sort_keys)?)
        } else {
            Box::new(IteratorMerge::new(results))
        };

        let merged = match &select.limit {
            Some(limit) => {
                let offset = match limit.offset {
                    Some(value) => pagination_value(value, self.parameters)?,
                    None => 0,
                };
                let row_count = match limit.row_count {
                    Some(value) => Some(pagination_value(value, self.parameters)?),
                    None => None,
                };
                Box::new(LimitDecorator::new(merged, offset, row_count)) as Box<dyn MergedResult>
            }
            None => merged,
        };

        Ok(ShardingResultSet::new(merged, visible_labels))
    }
}

/// Maps statement items onto result column positions.
struct ColumnResolver<'a> {
    select: &'a SelectStatement,
    labels: &'a [String],
    derived: &'a [DerivedColumn],
    visible: usize,
}

impl ColumnResolver<'_> {
    fn label_index(&self, label: &str, limit: usize) -> Option<usize> {
        self.labels[..limit.min(self.labels.len())]
            .iter()
            .position(|l| l.eq_ignore_ascii_case(label))
    }

    fn derived_index(&self, label: &str) -> Option<usize> {
        self.label_index(label, self.labels.len()).or_else(|| {
            self.derived
                .iter()
                .position(|d| d.label == label)
                .map(|p| self.visible + p)
                .filter(|i| *i < self.labels.len())
        })
    }

    /// Without a star every projection sits at its own position.
    fn projection_index(&self, position: usize) -> Option<usize> {
        if !self.select.has_star() {
            return Some(position).filter(|p| *p < self.visible);
        }
        let label = self.select.projections.get(position)?.label()?;
        self.label_index(&label, self.visible)
    }

    fn item_index(&self, item: &OrderItem, position: usize, prefix: &str) -> DbResult<usize> {
        let derived_label = format!("{}{}", prefix, position);
        if self.derived.iter().any(|d| d.label == derived_label) {
            return self
                .derived_index(&derived_label)
                .ok_or_else(|| DbError::Merge(format!("Derived column {} missing from shard result", derived_label)));
        }

        let found = match &item.target {
            OrderTarget::Ordinal(n) => n.checked_sub(1).filter(|i| *i < self.visible),
            OrderTarget::Column { owner, name } => {
                let by_projection = self.select.projections.iter().position(|p| match p {
                    Projection::Column {
                        owner: p_owner,
                        name: p_name,
                        alias,
                    } => {
                        alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
                            || (p_name.eq_ignore_ascii_case(name)
                                && (owner.is_none() || p_owner.is_none() || owner == p_owner))
                    }
                    other => other.alias().is_some_and(|a| a.eq_ignore_ascii_case(name)),
                });
                by_projection
                    .and_then(|p| self.projection_index(p))
                    .or_else(|| self.label_index(name, self.visible))
            }
            OrderTarget::Expression(text) => self
                .select
                .projections
                .iter()
                .position(|p| p.label().is_some_and(|l| l.eq_ignore_ascii_case(text)))
                .and_then(|p| self.projection_index(p))
                .or_else(|| self.label_index(text, self.visible)),
        };
        found.ok_or_else(|| DbError::Merge(format!("Cannot resolve sort column {:?}", item.target)))
    }

    fn sort_keys(&self, items: &[OrderItem], prefix: &str) -> DbResult<Vec<SortKey>> {
        items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                Ok(SortKey {
                    index: self.item_index(item, position, prefix)?,
                    descending: item.direction == OrderDirection::Desc,
                    nulls_first: item.nulls_first(),
                })
            })
            .collect()
    }

    fn aggregations(&self) -> DbResult<Vec<AggregationColumn>> {
        let mut columns = Vec::new();
        for (position, projection) in self.select.aggregations() {
            let Projection::Aggregate { function, text, .. } = projection else {
                continue;
            };
            let index = self
                .projection_index(position)
                .ok_or_else(|| DbError::Merge(format!("Cannot locate aggregation {}", text)))?;

            if *function != AggregationType::Avg {
                columns.push(AggregationColumn::Simple {
                    index,
                    function: *function,
                });
                continue;
            }

            let count_label = format!("{}{}", AVG_DERIVED_COUNT, position);
            let sum_label = format!("{}{}", AVG_DERIVED_SUM, position);
            match (self.derived_index(&count_label), self.derived_index(&sum_label)) {
                (Some(count_index), Some(sum_index)) => {
                    columns.push(AggregationColumn::Average {
                        index,
                        sum_index,
                        count_index,
                    });
                    // keep the hidden partials consistent with the merged row
                    columns.push(AggregationColumn::Simple {
                        index: count_index,
                        function: AggregationType::Count,
                    });
                    columns.push(AggregationColumn::Simple {
                        index: sum_index,
                        function: AggregationType::Sum,
                    });
                }
                _ => {
                    return Err(DbError::Merge(format!(
                        "Shard results lack the SUM/COUNT columns needed to merge {}",
                        text
                    )))
                }
            }
        }
        Ok(columns)
    }
}
