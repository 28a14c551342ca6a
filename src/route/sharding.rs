//! Sharding routing: statement + conditions -> logical route units.

use std::collections::HashMap;

use super::condition::{self, ShardingCondition, ShardingConditions};
use crate::error::{DbError, DbResult};
use crate::rule::{DataNode, ShardingRule, TableRule};
use crate::sql::statement::{SqlStatement, StatementKind};
use crate::value::Value;

/// Where one physical statement goes, before rewriting and master-slave resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUnit {
    /// logical data source (a physical source or a master-slave group)
    pub data_source: String,
    /// lower-cased logic table -> actual table
    pub tables: HashMap<String, String>,
    /// INSERT rows carried by this unit
    pub insert_rows: Option<Vec<usize>>,
}

impl RouteUnit {
    fn data_source_only(data_source: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            tables: HashMap::new(),
            insert_rows: None,
        }
    }

    fn node(node: &DataNode, logic_table: &str) -> Self {
        let mut tables = HashMap::new();
        tables.insert(logic_table.to_lowercase(), node.table.clone());
        Self {
            data_source: node.data_source.clone(),
            tables,
            insert_rows: None,
        }
    }
}

pub struct ShardingRouter<'a> {
    rule: &'a ShardingRule,
    /// logical data sources currently available, in registration order
    data_sources: &'a [String],
}

impl<'a> ShardingRouter<'a> {
    pub fn new(rule: &'a ShardingRule, data_sources: &'a [String]) -> Self {
        Self { rule, data_sources }
    }

    pub fn route(&self, statement: &SqlStatement, parameters: &[Value]) -> DbResult<Vec<RouteUnit>> {
        match statement.kind() {
            StatementKind::Tcl => Ok(self.all_data_sources()),
            StatementKind::Dal => self.route_dal(statement),
            StatementKind::Dcl => self.route_dcl(statement),
            StatementKind::Ddl => {
                self.route_tables(statement, &ShardingConditions::unconstrained())
            }
            StatementKind::Dql | StatementKind::Dml => {
                if let SqlStatement::Insert(insert) = statement {
                    if self.rule.is_sharding_table(&insert.table.name) {
                        return self.route_insert(statement, parameters);
                    }
                }
                let conditions = condition::extract(statement, parameters, self.rule)?;
                self.route_tables(statement, &conditions)
            }
        }
    }

    fn all_data_sources(&self) -> Vec<RouteUnit> {
        self.data_sources
            .iter()
            .map(|ds| RouteUnit::data_source_only(ds))
            .collect()
    }

    fn any_data_source(&self) -> DbResult<Vec<RouteUnit>> {
        let ds = self
            .rule
            .default_data_source
            .as_ref()
            .filter(|d| self.data_sources.contains(d))
            .or_else(|| self.data_sources.first())
            .ok_or_else(|| DbError::Routing("No data source available".to_string()))?;
        Ok(vec![RouteUnit::data_source_only(ds)])
    }

    fn route_dal(&self, statement: &SqlStatement) -> DbResult<Vec<RouteUnit>> {
        // DESCRIBE t / SHOW COLUMNS FROM t: any one node of the table answers
        if let Some(table) = statement.table_names().first() {
            if let Some(rule) = self.rule.table_rule(table) {
                let node = rule.actual_data_nodes.first().ok_or_else(|| {
                    DbError::Routing(format!("Table '{}' has no data nodes", table))
                })?;
                return Ok(vec![RouteUnit::node(node, &rule.logic_table)]);
            }
        }
        self.any_data_source()
    }

    fn route_dcl(&self, statement: &SqlStatement) -> DbResult<Vec<RouteUnit>> {
        if let Some(table) = statement.table_names().first() {
            if let Some(rule) = self.rule.table_rule(table) {
                return Ok(rule
                    .actual_data_nodes
                    .iter()
                    .map(|node| RouteUnit::node(node, &rule.logic_table))
                    .collect());
            }
        }
        Ok(self.all_data_sources())
    }

    fn route_tables(
        &self,
        statement: &SqlStatement,
        conditions: &ShardingConditions,
    ) -> DbResult<Vec<RouteUnit>> {
        let tables = statement.table_names();
        let sharded: Vec<String> = tables
            .iter()
            .filter(|t| self.rule.is_sharding_table(t))
            .cloned()
            .collect();

        if sharded.is_empty() {
            let all_broadcast =
                !tables.is_empty() && tables.iter().all(|t| self.rule.is_broadcast_table(t));
            if all_broadcast {
                return if statement.is_read_only() {
                    self.any_data_source()
                } else {
                    Ok(self.all_data_sources())
                };
            }
            return self.default_route(&tables);
        }

        if let Some(unconfigured) = tables
            .iter()
            .find(|t| !self.rule.is_sharding_table(t) && !self.rule.is_broadcast_table(t))
        {
            return Err(DbError::Routing(format!(
                "Table '{}' is neither sharded nor broadcast and cannot be combined with sharded tables",
                unconfigured
            )));
        }

        if sharded.len() == 1 || self.rule.is_all_binding_tables(&sharded) {
            self.route_standard(&sharded, conditions)
        } else {
            self.route_cartesian(&sharded, conditions)
        }
    }

    fn default_route(&self, tables: &[String]) -> DbResult<Vec<RouteUnit>> {
        match &self.rule.default_data_source {
            Some(ds) => Ok(vec![RouteUnit::data_source_only(ds)]),
            None if self.data_sources.len() == 1 => self.any_data_source(),
            None => Err(DbError::Routing(format!(
                "No table rule for {:?} and no default data source configured",
                tables
            ))),
        }
    }

    /// Route by the first table; bound tables follow its actual-table position.
    fn route_standard(
        &self,
        tables: &[String],
        conditions: &ShardingConditions,
    ) -> DbResult<Vec<RouteUnit>> {
        let primary = self.table_rule(&tables[0])?;
        let nodes = route_nodes(primary, conditions)?;

        let mut units = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut unit = RouteUnit::node(&node, &primary.logic_table);
            for bound in &tables[1..] {
                let actual = self.rule.binding_actual_table(
                    &node.data_source,
                    &primary.logic_table,
                    &node.table,
                    bound,
                )?;
                unit.tables.insert(bound.to_lowercase(), actual);
            }
            units.push(unit);
        }
        Ok(units)
    }

    /// Unbound sharded tables: every combination of actual tables that share a data source.
    fn route_cartesian(
        &self,
        tables: &[String],
        conditions: &ShardingConditions,
    ) -> DbResult<Vec<RouteUnit>> {
        let mut per_table: Vec<(String, Vec<DataNode>)> = Vec::with_capacity(tables.len());
        for table in tables {
            let rule = self.table_rule(table)?;
            per_table.push((rule.logic_table.to_lowercase(), route_nodes(rule, conditions)?));
        }

        let mut data_sources: Vec<String> = Vec::new();
        for (_, nodes) in &per_table {
            for node in nodes {
                if !data_sources.contains(&node.data_source) {
                    data_sources.push(node.data_source.clone());
                }
            }
        }

        let mut units = Vec::new();
        for ds in data_sources {
            let mut combinations: Vec<HashMap<String, String>> = vec![HashMap::new()];
            for (logic, nodes) in &per_table {
                let actuals: Vec<&DataNode> = nodes.iter().filter(|n| n.data_source == ds).collect();
                let mut next = Vec::with_capacity(combinations.len() * actuals.len());
                for combination in &combinations {
                    for node in &actuals {
                        let mut extended = combination.clone();
                        extended.insert(logic.clone(), node.table.clone());
                        next.push(extended);
                    }
                }
                combinations = next;
            }
            units.extend(combinations.into_iter().map(|tables| RouteUnit {
                data_source: ds.clone(),
                tables,
                insert_rows: None,
            }));
        }

        if units.is_empty() {
            return Err(DbError::Routing(format!(
                "Tables {:?} share no data source",
                tables
            )));
        }
        Ok(units)
    }

    fn route_insert(&self, statement: &SqlStatement, parameters: &[Value]) -> DbResult<Vec<RouteUnit>> {
        let SqlStatement::Insert(insert) = statement else {
            return Err(DbError::InternalError("not an INSERT".to_string()));
        };
        let rule = self.table_rule(&insert.table.name)?;
        let rows = condition::extract_insert_rows(statement, parameters, self.rule);

        let mut units: Vec<RouteUnit> = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let conditions = ShardingConditions {
                branches: vec![row],
            };
            let nodes = route_nodes(rule, &conditions)?;
            let [node] = nodes.as_slice() else {
                return Err(DbError::Routing(format!(
                    "INSERT row {} of '{}' routes to {} data nodes; provide every sharding column",
                    index + 1,
                    rule.logic_table,
                    nodes.len()
                )));
            };

            match units.iter_mut().find(|u| {
                u.data_source == node.data_source
                    && u.tables.get(&rule.logic_table.to_lowercase()) == Some(&node.table)
            }) {
                Some(unit) => {
                    if let Some(rows) = unit.insert_rows.as_mut() {
                        rows.push(index);
                    }
                }
                None => {
                    let mut unit = RouteUnit::node(node, &rule.logic_table);
                    unit.insert_rows = Some(vec![index]);
                    units.push(unit);
                }
            }
        }
        Ok(units)
    }

    fn table_rule(&self, table: &str) -> DbResult<&'a TableRule> {
        self.rule
            .table_rule(table)
            .ok_or_else(|| DbError::Routing(format!("No table rule for '{}'", table)))
    }
}

/// Union of the data nodes each branch selects, in data node order.
pub fn route_nodes(rule: &TableRule, conditions: &ShardingConditions) -> DbResult<Vec<DataNode>> {
    let table = rule.logic_table.to_lowercase();
    let mut selected: Vec<DataNode> = Vec::new();

    for branch in &conditions.branches {
        for node in route_branch(rule, &table, branch)? {
            if !selected.contains(&node) {
                selected.push(node);
            }
        }
    }

    let position = |n: &DataNode| {
        rule.actual_data_nodes
            .iter()
            .position(|m| m == n)
            .unwrap_or(usize::MAX)
    };
    selected.sort_by_key(position);
    Ok(selected)
}

fn route_branch(rule: &TableRule, table: &str, branch: &ShardingCondition) -> DbResult<Vec<DataNode>> {
    let value_of = |column: Option<&str>| column.and_then(|c| branch.value(table, c));

    let data_sources = rule.database_strategy.do_sharding(
        &rule.data_source_names(),
        value_of(rule.database_strategy.sharding_column()),
    )?;

    let mut nodes = Vec::new();
    for ds in data_sources {
        let tables = rule.table_strategy.do_sharding(
            &rule.actual_tables(&ds),
            value_of(rule.table_strategy.sharding_column()),
        )?;
        nodes.extend(tables.into_iter().map(|t| DataNode::new(&ds, &t)));
    }
    Ok(nodes)
}
