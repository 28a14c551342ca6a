//! Per-unit SQL rewriting: actual table names, derived merge columns, pagination
//! and multi-row INSERT splitting.

use std::collections::HashMap;

use super::lexer::Span;
use super::statement::*;
use crate::error::{DbError, DbResult};
use crate::metadata::TableMetadata;
use crate::value::Value;

pub const AVG_DERIVED_COUNT: &str = "AVG_DERIVED_COUNT_";
pub const AVG_DERIVED_SUM: &str = "AVG_DERIVED_SUM_";
pub const ORDER_BY_DERIVED: &str = "ORDER_BY_DERIVED_";
pub const GROUP_BY_DERIVED: &str = "GROUP_BY_DERIVED_";

#[derive(Debug, Clone, PartialEq)]
pub enum DerivedSource {
    Aggregate {
        function: AggregationType,
        distinct: bool,
        argument: String,
    },
    Column {
        owner: Option<String>,
        name: String,
    },
    Expression(String),
}

/// A projection appended to the physical SQL only so the merge engine can see it.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub label: String,
    pub source: DerivedSource,
}

/// Columns appended to a SELECT for merging. Deterministic for a given statement,
/// so the rewriter and the merge engine agree without sharing state.
pub fn derived_columns(select: &SelectStatement, metadata: &TableMetadata) -> Vec<DerivedColumn> {
    let mut derived = Vec::new();

    for (index, projection) in select.projections.iter().enumerate() {
        if let Projection::Aggregate {
            function: AggregationType::Avg,
            distinct,
            argument,
            ..
        } = projection
        {
            derived.push(DerivedColumn {
                label: format!("{}{}", AVG_DERIVED_COUNT, index),
                source: DerivedSource::Aggregate {
                    function: AggregationType::Count,
                    distinct: *distinct,
                    argument: argument.clone(),
                },
            });
            derived.push(DerivedColumn {
                label: format!("{}{}", AVG_DERIVED_SUM, index),
                source: DerivedSource::Aggregate {
                    function: AggregationType::Sum,
                    distinct: *distinct,
                    argument: argument.clone(),
                },
            });
        }
    }

    for (prefix, items) in [(ORDER_BY_DERIVED, &select.order_by), (GROUP_BY_DERIVED, &select.group_by)] {
        for (index, item) in items.iter().enumerate() {
            let source = match &item.target {
                OrderTarget::Ordinal(_) => continue,
                OrderTarget::Column { owner, name } => {
                    if projection_contains_column(select, metadata, owner.as_deref(), name) {
                        continue;
                    }
                    DerivedSource::Column {
                        owner: owner.clone(),
                        name: name.clone(),
                    }
                }
                OrderTarget::Expression(text) => {
                    let present = select.projections.iter().any(|p| {
                        p.label().is_some_and(|l| l.eq_ignore_ascii_case(text))
                    });
                    if present {
                        continue;
                    }
                    DerivedSource::Expression(text.clone())
                }
            };
            derived.push(DerivedColumn {
                label: format!("{}{}", prefix, index),
                source,
            });
        }
    }

    derived
}

fn projection_contains_column(
    select: &SelectStatement,
    metadata: &TableMetadata,
    owner: Option<&str>,
    name: &str,
) -> bool {
    let statement_tables: Vec<&TableSegment> = select.tables.iter().filter(|t| !t.is_owner).collect();
    let owner_matches = |a: Option<&str>, b: Option<&str>| match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    };

    select.projections.iter().any(|projection| match projection {
        Projection::Column {
            owner: p_owner,
            name: p_name,
            alias,
        } => {
            (p_name.eq_ignore_ascii_case(name) && owner_matches(p_owner.as_deref(), owner))
                || alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
        }
        Projection::Star { owner: star_owner } => {
            if !owner_matches(star_owner.as_deref(), owner) {
                return false;
            }
            let scope = star_owner.as_deref().or(owner);
            let candidates: Vec<&str> = statement_tables
                .iter()
                .filter(|t| {
                    scope.map_or(true, |s| {
                        t.name.eq_ignore_ascii_case(s)
                            || t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(s))
                    })
                })
                .map(|t| t.name.as_str())
                .collect();
            let known: Vec<bool> = candidates
                .iter()
                .filter_map(|t| metadata.contains_column(t, name))
                .collect();
            // without metadata a star is assumed to cover the column
            known.is_empty() || known.contains(&true)
        }
        Projection::Aggregate { alias, .. } | Projection::Expression { alias, .. } => {
            alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
        }
    })
}

/// Per-statement rewrite decisions shared by every execution unit.
#[derive(Debug, Clone, Default)]
pub struct RewriteContext {
    pub derived_columns: Vec<DerivedColumn>,
    /// the statement fans out to more than one unit, so pagination must be widened
    pub rewrite_pagination: bool,
    /// group-by and aggregate results are only final after merging
    pub lift_row_count: bool,
}

impl RewriteContext {
    pub fn new(statement: &SqlStatement, metadata: &TableMetadata, multi_unit: bool) -> Self {
        match statement {
            SqlStatement::Select(select) => Self {
                derived_columns: derived_columns(select, metadata),
                rewrite_pagination: multi_unit && select.limit.is_some(),
                lift_row_count: !select.group_by.is_empty() || select.has_aggregation(),
            },
            _ => Self::default(),
        }
    }
}

/// Rewrites one logical statement into the SQL and parameters of one unit.
pub struct SqlRewriter<'a> {
    sql: &'a str,
    statement: &'a SqlStatement,
    context: &'a RewriteContext,
}

impl<'a> SqlRewriter<'a> {
    pub fn new(sql: &'a str, statement: &'a SqlStatement, context: &'a RewriteContext) -> Self {
        Self {
            sql,
            statement,
            context,
        }
    }

    /// `tables` maps lower-cased logical names to actual names; `insert_rows`
    /// restricts a multi-row INSERT to the given row indexes.
    pub fn rewrite_sql(
        &self,
        tables: &HashMap<String, String>,
        insert_rows: Option<&[usize]>,
        parameters: &[Value],
    ) -> DbResult<String> {
        let mut edits: Vec<(Span, String)> = Vec::new();

        for segment in self.statement.table_segments() {
            if let Some(actual) = tables.get(&segment.name.to_lowercase()) {
                let original = &self.sql[segment.span.start..segment.span.end];
                let replacement = match original.chars().next() {
                    Some(q @ ('`' | '"')) => format!("{}{}{}", q, actual, q),
                    _ => actual.clone(),
                };
                edits.push((segment.span, replacement));
            }
        }

        match self.statement {
            SqlStatement::Select(select) => {
                if !self.context.derived_columns.is_empty() {
                    let mut text = String::new();
                    for column in &self.context.derived_columns {
                        text.push_str(", ");
                        text.push_str(&derived_expression(&column.source, tables));
                        text.push_str(" AS ");
                        text.push_str(&column.label);
                    }
                    let at = Span::new(select.projections_end, select.projections_end);
                    edits.push((at, text));
                }
                if self.context.rewrite_pagination {
                    if let Some(limit) = &select.limit {
                        self.pagination_edits(limit, parameters, &mut edits)?;
                    }
                }
            }
            SqlStatement::Insert(insert) => {
                if let (Some(rows), Some(first), Some(last)) =
                    (insert_rows, insert.rows.first(), insert.rows.last())
                {
                    let kept: Vec<&str> = rows
                        .iter()
                        .filter_map(|i| insert.rows.get(*i))
                        .map(|row| &self.sql[row.span.start..row.span.end])
                        .collect();
                    edits.push((Span::new(first.span.start, last.span.end), kept.join(", ")));
                }
            }
            _ => {}
        }

        edits.sort_by_key(|(span, _)| (span.start, span.end));

        let mut result = String::with_capacity(self.sql.len() + 32);
        let mut cursor = 0;
        for (span, replacement) in edits {
            if span.start < cursor {
                return Err(DbError::InternalError(format!(
                    "Overlapping rewrite at offset {}",
                    span.start
                )));
            }
            result.push_str(&self.sql[cursor..span.start]);
            result.push_str(&replacement);
            cursor = span.end;
        }
        result.push_str(&self.sql[cursor..]);

        Ok(result)
    }

    fn pagination_edits(
        &self,
        limit: &Limit,
        parameters: &[Value],
        edits: &mut Vec<(Span, String)>,
    ) -> DbResult<()> {
        if let Some(PaginationValue::Literal { span, .. }) = limit.offset {
            edits.push((span, "0".to_string()));
        }
        if let Some(PaginationValue::Literal { span, .. }) = limit.row_count {
            let widened = self.widened_row_count(limit, parameters)?;
            edits.push((span, widened.to_string()));
        }
        Ok(())
    }

    fn widened_row_count(&self, limit: &Limit, parameters: &[Value]) -> DbResult<i64> {
        if self.context.lift_row_count {
            return Ok(i64::MAX);
        }
        let offset = match limit.offset {
            Some(value) => pagination_value(value, parameters)?,
            None => 0,
        };
        let row_count = match limit.row_count {
            Some(value) => pagination_value(value, parameters)?,
            None => 0,
        };
        Ok(offset.saturating_add(row_count))
    }

    /// Parameters bound to this unit's SQL.
    pub fn rewrite_parameters(
        &self,
        parameters: &[Value],
        insert_rows: Option<&[usize]>,
    ) -> DbResult<Vec<Value>> {
        match self.statement {
            SqlStatement::Insert(insert) => match insert_rows {
                Some(rows) => Ok(rows
                    .iter()
                    .filter_map(|i| insert.rows.get(*i))
                    .flat_map(|row| {
                        let end = (row.first_parameter + row.parameter_count).min(parameters.len());
                        let start = row.first_parameter.min(end);
                        parameters[start..end].iter().cloned()
                    })
                    .collect()),
                None => Ok(parameters.to_vec()),
            },
            SqlStatement::Select(select) if self.context.rewrite_pagination => {
                let mut rewritten = parameters.to_vec();
                if let Some(limit) = &select.limit {
                    if let Some(PaginationValue::Parameter { index }) = limit.row_count {
                        let widened = self.widened_row_count(limit, parameters)?;
                        if let Some(slot) = rewritten.get_mut(index) {
                            *slot = Value::Integer(widened);
                        }
                    }
                    if let Some(PaginationValue::Parameter { index }) = limit.offset {
                        if let Some(slot) = rewritten.get_mut(index) {
                            *slot = Value::Integer(0);
                        }
                    }
                }
                Ok(rewritten)
            }
            _ => Ok(parameters.to_vec()),
        }
    }
}

pub(crate) fn pagination_value(value: PaginationValue, parameters: &[Value]) -> DbResult<i64> {
    match value {
        PaginationValue::Literal { value, .. } => Ok(value),
        PaginationValue::Parameter { index } => parameters
            .get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DbError::ParseError(format!("Pagination parameter {} is missing or not an integer", index))
            }),
    }
}

fn qualify(owner: Option<&str>, name: &str, tables: &HashMap<String, String>) -> String {
    match owner {
        Some(owner) => {
            let owner = tables.get(&owner.to_lowercase()).map(String::as_str).unwrap_or(owner);
            format!("{}.{}", owner, name)
        }
        None => name.to_string(),
    }
}

fn derived_expression(source: &DerivedSource, tables: &HashMap<String, String>) -> String {
    match source {
        DerivedSource::Aggregate {
            function,
            distinct,
            argument,
        } => {
            let argument = match argument.split_once('.') {
                Some((owner, name)) if !owner.contains(|c: char| c == '(' || c.is_whitespace()) => qualify(Some(owner), name, tables),
                _ => argument.clone(),
            };
            let distinct = if *distinct { "DISTINCT " } else { "" };
            format!("{}({}{})", function.name(), distinct, argument)
        }
        DerivedSource::Column { owner, name } => qualify(owner.as_deref(), name, tables),
        DerivedSource::Expression(text) => text.clone(),
    }
}
