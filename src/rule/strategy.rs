//! Sharding strategies: how a sharding value picks targets (data sources or tables).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::inline;
use crate::config::StrategyConfig;
use crate::error::{DbError, DbResult};
use crate::value::Value;

/// Values a condition constrains a sharding column to.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValue {
    /// `=` and `IN`
    List(Vec<Value>),
    /// `BETWEEN`, `<`, `>=`, ... ; bounds are inclusive, `None` is unbounded
    Range {
        lower: Option<Value>,
        upper: Option<Value>,
    },
}

/// Picks exactly one target for one value.
pub trait PreciseShardingAlgorithm: Send + Sync {
    fn do_sharding(&self, available_targets: &[String], column: &str, value: &Value) -> DbResult<String>;
}

/// Picks the targets covering a range of values.
pub trait RangeShardingAlgorithm: Send + Sync {
    fn do_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        lower: Option<&Value>,
        upper: Option<&Value>,
    ) -> DbResult<Vec<String>>;
}

/// seahash of the value text modulo the shard count.
pub fn hash_shard(key: &str, num_shards: u64) -> u64 {
    if num_shards == 0 {
        return 0;
    }
    seahash::hash(key.as_bytes()) % num_shards
}

#[derive(Clone, Default)]
pub enum ShardingStrategy {
    /// No narrowing: every target.
    #[default]
    None,
    Inline {
        column: String,
        expression: String,
    },
    /// Target whose numeric suffix equals `hash(value) % count`.
    HashMod {
        column: String,
        count: u64,
    },
    Standard {
        column: String,
        precise: Arc<dyn PreciseShardingAlgorithm>,
        range: Option<Arc<dyn RangeShardingAlgorithm>>,
    },
}

impl fmt::Debug for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingStrategy::None => write!(f, "None"),
            ShardingStrategy::Inline { column, expression } => {
                write!(f, "Inline({} -> {})", column, expression)
            }
            ShardingStrategy::HashMod { column, count } => write!(f, "HashMod({} % {})", column, count),
            ShardingStrategy::Standard { column, range, .. } => {
                write!(f, "Standard({}, range: {})", column, range.is_some())
            }
        }
    }
}

impl From<&StrategyConfig> for ShardingStrategy {
    fn from(config: &StrategyConfig) -> Self {
        match config {
            StrategyConfig::Inline {
                sharding_column,
                algorithm_expression,
            } => ShardingStrategy::Inline {
                column: sharding_column.clone(),
                expression: algorithm_expression.clone(),
            },
            StrategyConfig::HashMod {
                sharding_column,
                sharding_count,
            } => ShardingStrategy::HashMod {
                column: sharding_column.clone(),
                count: *sharding_count,
            },
            StrategyConfig::None => ShardingStrategy::None,
        }
    }
}

impl ShardingStrategy {
    pub fn standard(
        column: &str,
        precise: Arc<dyn PreciseShardingAlgorithm>,
        range: Option<Arc<dyn RangeShardingAlgorithm>>,
    ) -> Self {
        ShardingStrategy::Standard {
            column: column.to_string(),
            precise,
            range,
        }
    }

    pub fn sharding_column(&self) -> Option<&str> {
        match self {
            ShardingStrategy::None => None,
            ShardingStrategy::Inline { column, .. }
            | ShardingStrategy::HashMod { column, .. }
            | ShardingStrategy::Standard { column, .. } => Some(column),
        }
    }

    /// Targets for the given constraint, in `available_targets` order.
    /// `None` (no condition on the sharding column) selects every target.
    pub fn do_sharding(
        &self,
        available_targets: &[String],
        value: Option<&ShardingValue>,
    ) -> DbResult<Vec<String>> {
        let (Some(column), Some(value)) = (self.sharding_column(), value) else {
            return Ok(available_targets.to_vec());
        };

        let picked: Vec<String> = match value {
            ShardingValue::List(values) => {
                let mut picked = Vec::with_capacity(values.len());
                for v in values {
                    picked.push(self.precise(available_targets, column, v)?);
                }
                picked
            }
            ShardingValue::Range { lower, upper } => match self {
                ShardingStrategy::Standard {
                    range: Some(range), ..
                } => range.do_sharding(available_targets, column, lower.as_ref(), upper.as_ref())?,
                // no range support: the range may touch any target
                _ => available_targets.to_vec(),
            },
        };

        let picked: HashSet<String> = picked.into_iter().map(|t| t.to_lowercase()).collect();
        Ok(available_targets
            .iter()
            .filter(|t| picked.contains(&t.to_lowercase()))
            .cloned()
            .collect())
    }

    fn precise(&self, available_targets: &[String], column: &str, value: &Value) -> DbResult<String> {
        let target = match self {
            ShardingStrategy::None => {
                return Err(DbError::InternalError("strategy without column".to_string()));
            }
            ShardingStrategy::Inline { expression, .. } => inline::evaluate(expression, column, value)?,
            ShardingStrategy::HashMod { count, .. } => {
                let shard = hash_shard(&value.to_string(), *count);
                available_targets
                    .iter()
                    .find(|t| numeric_suffix(t) == Some(shard))
                    .cloned()
                    .unwrap_or_else(|| {
                        let index = (shard as usize) % available_targets.len().max(1);
                        available_targets.get(index).cloned().unwrap_or_default()
                    })
            }
            ShardingStrategy::Standard { precise, .. } => {
                precise.do_sharding(available_targets, column, value)?
            }
        };

        if available_targets.iter().any(|t| t.eq_ignore_ascii_case(&target)) {
            Ok(target)
        } else {
            Err(DbError::Routing(format!(
                "Sharding value {} of '{}' maps to '{}', which is not among {:?}",
                value, column, target, available_targets
            )))
        }
    }
}

fn numeric_suffix(target: &str) -> Option<u64> {
    let digits: String = target
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}
