//! Sharding rule model
//!
//! A [`ShardingRule`] is immutable once built; reconfiguration swaps a new rule in
//! wholesale (see `ShardingRuntime::swap_rule`).

pub mod inline;
pub mod master_slave;
pub mod strategy;

use std::collections::HashMap;

pub use master_slave::{
    LoadBalanceAlgorithm, MasterSlaveRule, RandomLoadBalance, RoundRobinLoadBalance,
};
pub use strategy::{
    hash_shard, PreciseShardingAlgorithm, RangeShardingAlgorithm, ShardingStrategy, ShardingValue,
};

use crate::config::{ShardingConfig, TableRuleConfig};
use crate::error::{DbError, DbResult};

/// One physical table on one data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: &str, table: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            table: table.to_string(),
        }
    }

    /// Parse `ds0.t_order0`.
    pub fn parse(text: &str) -> DbResult<Self> {
        match text.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() => Ok(Self::new(ds, table)),
            _ => Err(DbError::Config(format!(
                "Invalid data node '{}', expected <data_source>.<table>",
                text
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableRule {
    pub logic_table: String,
    pub actual_data_nodes: Vec<DataNode>,
    pub database_strategy: ShardingStrategy,
    pub table_strategy: ShardingStrategy,
}

impl TableRule {
    pub fn new(logic_table: &str, actual_data_nodes: Vec<DataNode>) -> Self {
        Self {
            logic_table: logic_table.to_string(),
            actual_data_nodes,
            database_strategy: ShardingStrategy::None,
            table_strategy: ShardingStrategy::None,
        }
    }

    /// Build from inline data nodes, e.g. `ds${0..1}.t_order${0..1}`.
    pub fn inline(logic_table: &str, actual_data_nodes: &str) -> DbResult<Self> {
        let nodes = inline::expand(actual_data_nodes)?
            .iter()
            .map(|n| DataNode::parse(n))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self::new(logic_table, nodes))
    }

    pub fn with_database_strategy(mut self, strategy: ShardingStrategy) -> Self {
        self.database_strategy = strategy;
        self
    }

    pub fn with_table_strategy(mut self, strategy: ShardingStrategy) -> Self {
        self.table_strategy = strategy;
        self
    }

    fn from_config(config: &TableRuleConfig, data_sources: &[String]) -> DbResult<Self> {
        let mut rule = match &config.actual_data_nodes {
            Some(nodes) => Self::inline(&config.logic_table, nodes)?,
            None => Self::new(
                &config.logic_table,
                data_sources
                    .iter()
                    .map(|ds| DataNode::new(ds, &config.logic_table))
                    .collect(),
            ),
        };
        if rule.actual_data_nodes.is_empty() {
            return Err(DbError::Config(format!(
                "Table '{}' has no data nodes",
                config.logic_table
            )));
        }
        if let Some(strategy) = &config.database_strategy {
            rule.database_strategy = strategy.into();
        }
        if let Some(strategy) = &config.table_strategy {
            rule.table_strategy = strategy.into();
        }
        Ok(rule)
    }

    /// Data sources holding this table, in node order.
    pub fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for node in &self.actual_data_nodes {
            if !names.contains(&node.data_source) {
                names.push(node.data_source.clone());
            }
        }
        names
    }

    pub fn actual_tables(&self, data_source: &str) -> Vec<String> {
        self.actual_data_nodes
            .iter()
            .filter(|n| n.data_source == data_source)
            .map(|n| n.table.clone())
            .collect()
    }

    pub fn sharding_columns(&self) -> Vec<&str> {
        [&self.database_strategy, &self.table_strategy]
            .into_iter()
            .filter_map(|s| s.sharding_column())
            .collect()
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        self.sharding_columns()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardingRule {
    pub table_rules: Vec<TableRule>,
    pub binding_groups: Vec<Vec<String>>,
    pub broadcast_tables: Vec<String>,
    pub default_data_source: Option<String>,
    pub master_slave_rules: Vec<MasterSlaveRule>,
}

impl ShardingRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_rule(mut self, rule: TableRule) -> Self {
        self.table_rules.push(rule);
        self
    }

    pub fn with_binding_group(mut self, tables: &[&str]) -> Self {
        self.binding_groups
            .push(tables.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_broadcast_table(mut self, table: &str) -> Self {
        self.broadcast_tables.push(table.to_string());
        self
    }

    pub fn with_default_data_source(mut self, name: &str) -> Self {
        self.default_data_source = Some(name.to_string());
        self
    }

    pub fn with_master_slave(mut self, rule: MasterSlaveRule) -> Self {
        self.master_slave_rules.push(rule);
        self
    }

    /// Build from configuration; `physical_data_sources` are the registered names.
    pub fn from_config(config: &ShardingConfig, physical_data_sources: &[String]) -> DbResult<Self> {
        let mut rule = ShardingRule {
            binding_groups: config.binding_tables.clone(),
            broadcast_tables: config.broadcast_tables.clone(),
            default_data_source: config.default_data_source.clone(),
            master_slave_rules: config.master_slave.iter().map(MasterSlaveRule::from).collect(),
            ..Default::default()
        };

        let logical = rule.logical_data_source_names(physical_data_sources);
        for table in &config.tables {
            rule.table_rules.push(TableRule::from_config(table, &logical)?);
        }

        rule.validate(&logical)?;
        Ok(rule)
    }

    fn validate(&self, logical: &[String]) -> DbResult<()> {
        let known = |ds: &str| logical.iter().any(|l| l == ds);
        for table in &self.table_rules {
            for node in &table.actual_data_nodes {
                if !known(&node.data_source) {
                    return Err(DbError::Config(format!(
                        "Data node {}.{} references unknown data source",
                        node.data_source, node.table
                    )));
                }
            }
        }
        if let Some(ds) = &self.default_data_source {
            if !known(ds) {
                return Err(DbError::Config(format!("Default data source '{}' is unknown", ds)));
            }
        }
        Ok(())
    }

    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules
            .iter()
            .find(|r| r.logic_table.eq_ignore_ascii_case(logic_table))
    }

    pub fn is_sharding_table(&self, logic_table: &str) -> bool {
        self.table_rule(logic_table).is_some()
    }

    pub fn is_broadcast_table(&self, logic_table: &str) -> bool {
        self.broadcast_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(logic_table))
    }

    pub fn binding_group(&self, logic_table: &str) -> Option<&[String]> {
        self.binding_groups
            .iter()
            .find(|g| g.iter().any(|t| t.eq_ignore_ascii_case(logic_table)))
            .map(Vec::as_slice)
    }

    /// Every table is in one binding group.
    pub fn is_all_binding_tables(&self, logic_tables: &[String]) -> bool {
        let Some(first) = logic_tables.first() else {
            return false;
        };
        match self.binding_group(first) {
            Some(group) => logic_tables
                .iter()
                .all(|t| group.iter().any(|g| g.eq_ignore_ascii_case(t))),
            None => false,
        }
    }

    /// Actual table of `logic_table` bound to `primary_actual` of `primary_logic` on one data source.
    pub fn binding_actual_table(
        &self,
        data_source: &str,
        primary_logic: &str,
        primary_actual: &str,
        logic_table: &str,
    ) -> DbResult<String> {
        let unknown = || DbError::Routing(format!("Binding table '{}' has no rule", logic_table));
        let primary = self.table_rule(primary_logic).ok_or_else(unknown)?;
        let bound = self.table_rule(logic_table).ok_or_else(unknown)?;

        let index = primary
            .actual_tables(data_source)
            .iter()
            .position(|t| t.eq_ignore_ascii_case(primary_actual))
            .ok_or_else(|| {
                DbError::Routing(format!(
                    "Actual table '{}' not found on '{}'",
                    primary_actual, data_source
                ))
            })?;

        bound
            .actual_tables(data_source)
            .get(index)
            .cloned()
            .ok_or_else(|| {
                DbError::Routing(format!(
                    "Binding table '{}' has no actual table #{} on '{}'",
                    logic_table, index, data_source
                ))
            })
    }

    pub fn master_slave_rule(&self, name: &str) -> Option<&MasterSlaveRule> {
        self.master_slave_rules.iter().find(|r| r.name == name)
    }

    /// Names routing works with: master-slave groups plus physical sources outside any group.
    pub fn logical_data_source_names(&self, physical: &[String]) -> Vec<String> {
        let mut names: Vec<String> = self.master_slave_rules.iter().map(|r| r.name.clone()).collect();
        for name in physical {
            let grouped = self
                .master_slave_rules
                .iter()
                .any(|r| r.physical_names().any(|p| p == name));
            if !grouped && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Every column some table rule shards on, grouped by lower-cased table.
    pub fn sharding_columns(&self) -> HashMap<String, Vec<String>> {
        self.table_rules
            .iter()
            .map(|r| {
                (
                    r.logic_table.to_lowercase(),
                    r.sharding_columns().iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }
}
