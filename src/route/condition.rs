//! Sharding condition extraction
//!
//! A WHERE clause is reduced to disjunctive normal form over the predicates that
//! constrain sharding columns. Anything that cannot narrow a sharding column
//! (functions, NOT, comparisons between columns, ...) is dropped, which only
//! ever widens the route.

use std::collections::HashMap;

use crate::error::DbResult;
use crate::rule::{ShardingRule, ShardingValue};
use crate::sql::statement::{BinaryOp, SqlExpr, SqlStatement};
use crate::value::Value;

/// Sharding values of one AND-branch, keyed by (lower table, lower column).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardingCondition {
    values: HashMap<(String, String), ShardingValue>,
}

impl ShardingCondition {
    pub fn value(&self, table: &str, column: &str) -> Option<&ShardingValue> {
        self.values
            .get(&(table.to_lowercase(), column.to_lowercase()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, table: String, column: String, value: ShardingValue) {
        let key = (table, column);
        let merged = match self.values.remove(&key) {
            Some(existing) => intersect(existing, value),
            None => value,
        };
        self.values.insert(key, merged);
    }

    fn and(&self, other: &ShardingCondition) -> ShardingCondition {
        let mut result = self.clone();
        for ((table, column), value) in &other.values {
            result.insert(table.clone(), column.clone(), value.clone());
        }
        result
    }
}

/// OR of AND-branches. A single empty branch means "no constraint".
#[derive(Debug, Clone, PartialEq)]
pub struct ShardingConditions {
    pub branches: Vec<ShardingCondition>,
}

impl ShardingConditions {
    pub fn unconstrained() -> Self {
        Self {
            branches: vec![ShardingCondition::default()],
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.branches.iter().any(ShardingCondition::is_empty)
    }
}

/// Extract the conditions of a DQL/DML statement.
pub fn extract(
    statement: &SqlStatement,
    parameters: &[Value],
    rule: &ShardingRule,
) -> DbResult<ShardingConditions> {
    let Some(where_clause) = statement.where_clause() else {
        return Ok(ShardingConditions::unconstrained());
    };
    let extractor = Extractor {
        statement,
        parameters,
        rule,
    };
    Ok(ShardingConditions {
        branches: extractor.dnf(where_clause),
    })
}

/// Conditions of each INSERT row, in row order.
pub fn extract_insert_rows(
    statement: &SqlStatement,
    parameters: &[Value],
    rule: &ShardingRule,
) -> Vec<ShardingCondition> {
    let SqlStatement::Insert(insert) = statement else {
        return Vec::new();
    };
    let Some(table_rule) = rule.table_rule(&insert.table.name) else {
        return vec![ShardingCondition::default(); insert.rows.len()];
    };
    let table = insert.table.name.to_lowercase();

    insert
        .rows
        .iter()
        .map(|row| {
            let mut condition = ShardingCondition::default();
            if let Some(columns) = &insert.columns {
                for (column, expr) in columns.iter().zip(&row.values) {
                    if !table_rule.is_sharding_column(column) {
                        continue;
                    }
                    if let Some(value) = literal_value(expr, parameters) {
                        condition.insert(
                            table.clone(),
                            column.to_lowercase(),
                            ShardingValue::List(vec![value]),
                        );
                    }
                }
            }
            condition
        })
        .collect()
}

struct Extractor<'a> {
    statement: &'a SqlStatement,
    parameters: &'a [Value],
    rule: &'a ShardingRule,
}

impl Extractor<'_> {
    fn dnf(&self, expr: &SqlExpr) -> Vec<ShardingCondition> {
        match expr {
            SqlExpr::BinaryOp {
                left,
                op: BinaryOp::Or,
                right,
            } => {
                let mut branches = self.dnf(left);
                branches.extend(self.dnf(right));
                branches
            }
            SqlExpr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let left = self.dnf(left);
                let right = self.dnf(right);
                let mut branches = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    for r in &right {
                        branches.push(l.and(r));
                    }
                }
                branches
            }
            _ => vec![self.predicate(expr).unwrap_or_default()],
        }
    }

    fn predicate(&self, expr: &SqlExpr) -> Option<ShardingCondition> {
        let (column_expr, value) = match expr {
            SqlExpr::BinaryOp { left, op, right } => {
                let (column, other, op) = match (left.as_ref(), right.as_ref()) {
                    (SqlExpr::Column { .. }, _) => (left.as_ref(), right.as_ref(), *op),
                    (_, SqlExpr::Column { .. }) => (right.as_ref(), left.as_ref(), flip(*op)?),
                    _ => return None,
                };
                let v = literal_value(other, self.parameters)?;
                let value = match op {
                    BinaryOp::Eq => ShardingValue::List(vec![v]),
                    BinaryOp::Gt | BinaryOp::GtEq => ShardingValue::Range {
                        lower: Some(v),
                        upper: None,
                    },
                    BinaryOp::Lt | BinaryOp::LtEq => ShardingValue::Range {
                        lower: None,
                        upper: Some(v),
                    },
                    _ => return None,
                };
                (column, value)
            }
            SqlExpr::InList {
                expr,
                list,
                negated: false,
            } => {
                let values = list
                    .iter()
                    .map(|e| literal_value(e, self.parameters))
                    .collect::<Option<Vec<_>>>()?;
                (expr.as_ref(), ShardingValue::List(values))
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated: false,
            } => (
                expr.as_ref(),
                ShardingValue::Range {
                    lower: Some(literal_value(low, self.parameters)?),
                    upper: Some(literal_value(high, self.parameters)?),
                },
            ),
            _ => return None,
        };

        let SqlExpr::Column { owner, name } = column_expr else {
            return None;
        };

        let mut condition = ShardingCondition::default();
        for table in self.tables_for(owner.as_deref(), name) {
            condition.insert(table, name.to_lowercase(), value.clone());
        }
        Some(condition)
    }

    /// Sharded tables a column reference can belong to.
    fn tables_for(&self, owner: Option<&str>, column: &str) -> Vec<String> {
        let candidates: Vec<String> = match owner {
            Some(owner) => self
                .statement
                .resolve_table(owner)
                .map(|t| vec![t.to_string()])
                .unwrap_or_default(),
            None => self.statement.table_names(),
        };
        candidates
            .into_iter()
            .filter(|t| {
                self.rule
                    .table_rule(t)
                    .is_some_and(|r| r.is_sharding_column(column))
            })
            .map(|t| t.to_lowercase())
            .collect()
    }
}

fn flip(op: BinaryOp) -> Option<BinaryOp> {
    Some(match op {
        BinaryOp::Eq => BinaryOp::Eq,
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        _ => return None,
    })
}

fn literal_value(expr: &SqlExpr, parameters: &[Value]) -> Option<Value> {
    match expr {
        SqlExpr::Integer(n) => Some(Value::Integer(*n)),
        SqlExpr::Float(n) => Some(Value::Float(*n)),
        SqlExpr::String(s) => Some(Value::Text(s.clone())),
        SqlExpr::Boolean(b) => Some(Value::Boolean(*b)),
        SqlExpr::Parameter(index) => parameters.get(*index).cloned(),
        _ => None,
    }
}

fn within(value: &Value, lower: &Option<Value>, upper: &Option<Value>) -> bool {
    lower.as_ref().map_or(true, |l| value.compare(l).is_ge())
        && upper.as_ref().map_or(true, |u| value.compare(u).is_le())
}

/// Both constraints hold. A contradiction keeps the left side: no row matches,
/// so any shard answers correctly.
fn intersect(left: ShardingValue, right: ShardingValue) -> ShardingValue {
    match (left, right) {
        (ShardingValue::List(a), ShardingValue::List(b)) => {
            let common: Vec<Value> = a
                .iter()
                .filter(|v| b.iter().any(|w| v.compare(w).is_eq()))
                .cloned()
                .collect();
            ShardingValue::List(if common.is_empty() { a } else { common })
        }
        (ShardingValue::List(values), ShardingValue::Range { lower, upper })
        | (ShardingValue::Range { lower, upper }, ShardingValue::List(values)) => {
            let kept: Vec<Value> = values
                .iter()
                .filter(|v| within(v, &lower, &upper))
                .cloned()
                .collect();
            ShardingValue::List(if kept.is_empty() { values } else { kept })
        }
        (
            ShardingValue::Range {
                lower: l1,
                upper: u1,
            },
            ShardingValue::Range {
                lower: l2,
                upper: u2,
            },
        ) => {
            let lower = match (l1, l2) {
                (Some(a), Some(b)) => Some(if a.compare(&b).is_ge() { a } else { b }),
                (a, b) => a.or(b),
            };
            let upper = match (u1, u2) {
                (Some(a), Some(b)) => Some(if a.compare(&b).is_le() { a } else { b }),
                (a, b) => a.or(b),
            };
            ShardingValue::Range { lower, upper }
        }
    }
}
