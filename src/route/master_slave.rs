//! Master-slave overlay: logical data source -> physical source.

use crate::datasource::DataSourceRegistry;
use crate::error::{DbError, DbResult};
use crate::rule::ShardingRule;

pub struct MasterSlaveRouter<'a> {
    rule: &'a ShardingRule,
    registry: &'a DataSourceRegistry,
}

impl<'a> MasterSlaveRouter<'a> {
    pub fn new(rule: &'a ShardingRule, registry: &'a DataSourceRegistry) -> Self {
        Self { rule, registry }
    }

    /// Writes and master-pinned reads go to the master; other reads to an
    /// enabled slave, falling back to the master.
    pub fn resolve(&self, logical: &str, read_only: bool, use_master: bool) -> DbResult<String> {
        let Some(group) = self.rule.master_slave_rule(logical) else {
            self.ensure_available(logical)?;
            return Ok(logical.to_string());
        };

        if read_only && !use_master {
            if let Some(slave) = group.select_slave(|s| self.registry.is_available(s)) {
                tracing::trace!("Read on {} routed to slave {}", logical, slave);
                return Ok(slave);
            }
        }

        self.ensure_available(&group.master)?;
        Ok(group.master.clone())
    }

    fn ensure_available(&self, name: &str) -> DbResult<()> {
        if !self.registry.contains(name) {
            return Err(DbError::DataSourceNotFound(name.to_string()));
        }
        if !self.registry.is_available(name) {
            return Err(DbError::DataSourceDisabled(name.to_string()));
        }
        Ok(())
    }
}
