//! Schema configuration
//!
//! A schema is described by one TOML document:
//!
//! ```toml
//! default_data_source = "ds0"
//! broadcast_tables = ["t_config"]
//! binding_tables = [["t_order", "t_order_item"]]
//!
//! [props]
//! executor_size = 8
//! sql_show = true
//! transaction_type = "LOCAL"
//!
//! [[tables]]
//! logic_table = "t_order"
//! actual_data_nodes = "ds${0..1}.t_order${0..1}"
//! database_strategy = { type = "inline", sharding_column = "user_id", algorithm_expression = "ds${user_id % 2}" }
//! table_strategy = { type = "inline", sharding_column = "order_id", algorithm_expression = "t_order${order_id % 2}" }
//! ```
//!
//! Physical data sources are registered programmatically; the names used here
//! refer to them (or to master-slave groups).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DbError, DbResult};
use crate::execute::ExceptionPolicy;
use crate::sql::DatabaseType;
use crate::transaction::TransactionType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingConfig {
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
    /// groups of logic tables sharded identically
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    /// tables fully replicated on every data source
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    /// where unconfigured tables live
    #[serde(default)]
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub master_slave: Vec<MasterSlaveConfig>,
    #[serde(default)]
    pub base: BaseConfig,
}

/// Runtime properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Props {
    /// Worker threads for parallel execution; 0 means an unbounded cached pool
    #[serde(default)]
    pub executor_size: usize,
    /// Connections one data source may use for a single logical statement
    #[serde(default = "default_max_connections")]
    pub max_connections_size_per_query: usize,
    /// Log logical and actual SQL
    #[serde(default)]
    pub sql_show: bool,
    #[serde(default)]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub exception_policy: ExceptionPolicy,
    #[serde(default)]
    pub database_type: DatabaseType,
    /// Graceful wait before the worker pool is forced down
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    1
}

fn default_shutdown_timeout() -> u64 {
    5000
}

impl Default for Props {
    fn default() -> Self {
        Self {
            executor_size: 0,
            max_connections_size_per_query: default_max_connections(),
            sql_show: false,
            transaction_type: TransactionType::default(),
            exception_policy: ExceptionPolicy::default(),
            database_type: DatabaseType::default(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub logic_table: String,
    /// Inline expression such as `ds${0..1}.t_order${0..1}`; defaults to the
    /// logic table on every data source
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Inline {
        sharding_column: String,
        algorithm_expression: String,
    },
    HashMod {
        sharding_column: String,
        sharding_count: u64,
    },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceType {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSlaveConfig {
    /// logical name referenced by data nodes
    pub name: String,
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub load_balance: LoadBalanceType,
}

/// Best-effort delivery settings for BASE transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default = "default_max_delivery_try_times")]
    pub max_delivery_try_times: u32,
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval_ms: u64,
    /// JSON-lines journal; in-memory when absent
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// Dead journal records tolerated before the file is rewritten
    #[serde(default = "default_journal_compact_threshold")]
    pub journal_compact_threshold: usize,
}

fn default_max_delivery_try_times() -> u32 {
    3
}

fn default_delivery_interval() -> u64 {
    1000
}

fn default_journal_compact_threshold() -> usize {
    crate::transaction::journal::DEFAULT_COMPACT_THRESHOLD
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            max_delivery_try_times: default_max_delivery_try_times(),
            delivery_interval_ms: default_delivery_interval(),
            journal_path: None,
            journal_compact_threshold: default_journal_compact_threshold(),
        }
    }
}

impl ShardingConfig {
    pub fn from_toml_str(content: &str) -> DbResult<Self> {
        let config: ShardingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> DbResult<Self> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded sharding config from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> DbResult<String> {
        toml::to_string_pretty(self).map_err(|e| DbError::Config(e.to_string()))
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.props.max_connections_size_per_query == 0 {
            return Err(DbError::Config(
                "max_connections_size_per_query must be at least 1".to_string(),
            ));
        }

        for table in &self.tables {
            if table.logic_table.trim().is_empty() {
                return Err(DbError::Config("logic_table must not be empty".to_string()));
            }
            for strategy in [&table.database_strategy, &table.table_strategy].into_iter().flatten() {
                if let StrategyConfig::HashMod { sharding_count: 0, .. } = strategy {
                    return Err(DbError::Config(format!(
                        "sharding_count of '{}' must be positive",
                        table.logic_table
                    )));
                }
            }
        }

        for group in &self.binding_tables {
            for name in group {
                if !self.tables.iter().any(|t| t.logic_table.eq_ignore_ascii_case(name)) {
                    return Err(DbError::Config(format!(
                        "Binding table '{}' has no table rule",
                        name
                    )));
                }
            }
        }

        for ms in &self.master_slave {
            if ms.master.trim().is_empty() {
                return Err(DbError::Config(format!(
                    "Master-slave group '{}' has no master",
                    ms.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_data_source = "ds0"
broadcast_tables = ["t_config"]
binding_tables = [["t_order", "t_order_item"]]

[props]
executor_size = 4
sql_show = true
transaction_type = "XA"
exception_policy = "swallow"
database_type = "PostgreSQL"

[[tables]]
logic_table = "t_order"
actual_data_nodes = "ds${0..1}.t_order${0..1}"
database_strategy = { type = "inline", sharding_column = "user_id", algorithm_expression = "ds${user_id % 2}" }
table_strategy = { type = "hash_mod", sharding_column = "order_id", sharding_count = 2 }

[[tables]]
logic_table = "t_order_item"

[[master_slave]]
name = "ms_ds"
master = "master0"
slaves = ["slave0", "slave1"]
load_balance = "random"

[base]
max_delivery_try_times = 5
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ShardingConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.props.executor_size, 4);
        assert_eq!(config.props.max_connections_size_per_query, 1);
        assert!(config.props.sql_show);
        assert_eq!(config.props.transaction_type, TransactionType::Xa);
        assert_eq!(config.props.exception_policy, ExceptionPolicy::Swallow);
        assert_eq!(config.props.database_type, DatabaseType::PostgreSQL);
        assert_eq!(config.props.shutdown_timeout_ms, 5000);
        assert_eq!(config.tables.len(), 2);
        assert_eq!(
            config.tables[0].table_strategy,
            Some(StrategyConfig::HashMod {
                sharding_column: "order_id".to_string(),
                sharding_count: 2
            })
        );
        assert_eq!(config.master_slave[0].load_balance, LoadBalanceType::Random);
        assert_eq!(config.base.max_delivery_try_times, 5);
        assert_eq!(config.base.delivery_interval_ms, 1000);
        assert_eq!(config.base.journal_compact_threshold, 1000);
    }

    #[test]
    fn test_defaults() {
        let config = ShardingConfig::from_toml_str("").unwrap();
        assert_eq!(config.props.transaction_type, TransactionType::Local);
        assert_eq!(config.props.exception_policy, ExceptionPolicy::Throw);
        assert_eq!(config.base.max_delivery_try_times, 3);
    }

    #[test]
    fn test_unknown_binding_table_rejected() {
        let result = ShardingConfig::from_toml_str(r#"binding_tables = [["t_missing"]]"#);
        assert!(matches!(result, Err(DbError::Config(_))));
    }

    #[test]
    fn test_zero_connections_rejected() {
        let result = ShardingConfig::from_toml_str("[props]\nmax_connections_size_per_query = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharding.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ShardingConfig::from_file(&path).unwrap();
        assert_eq!(config.default_data_source.as_deref(), Some("ds0"));
    }
}
