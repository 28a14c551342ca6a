//! Physical data source boundary and the live registry of available sources.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::execute::QueryResult;
use crate::transaction::Xid;
use crate::value::Value;

/// Two-phase commit participant exposed by XA-capable connections.
pub trait XaResource: Send + Sync {
    fn start(&self, xid: &Xid) -> DbResult<()>;
    fn end(&self, _xid: &Xid) -> DbResult<()> {
        Ok(())
    }
    fn prepare(&self, xid: &Xid) -> DbResult<()>;
    fn commit(&self, xid: &Xid) -> DbResult<()>;
    fn rollback(&self, xid: &Xid) -> DbResult<()>;
}

/// One physical database connection.
pub trait Connection: Send + Sync {
    fn execute_query(&self, sql: &str, parameters: &[Value]) -> DbResult<Box<dyn QueryResult>>;

    fn execute_update(&self, sql: &str, parameters: &[Value]) -> DbResult<u64>;

    /// One count per parameter set.
    fn execute_batch(&self, sql: &str, parameter_sets: &[Vec<Value>]) -> DbResult<Vec<u64>> {
        parameter_sets
            .iter()
            .map(|params| self.execute_update(sql, params))
            .collect()
    }

    fn set_auto_commit(&self, auto_commit: bool) -> DbResult<()>;

    fn commit(&self) -> DbResult<()>;

    fn rollback(&self) -> DbResult<()>;

    fn close(&self) -> DbResult<()>;

    fn xa_resource(&self) -> Option<&dyn XaResource> {
        None
    }
}

/// Hands out physical connections (pooling lives behind this trait).
pub trait DataSource: Send + Sync {
    fn get_connection(&self) -> DbResult<Arc<dyn Connection>>;
}

#[derive(Default)]
struct RegistryState {
    /// registration order is kept so "all data sources" routes are deterministic
    names: Vec<String>,
    sources: HashMap<String, Arc<dyn DataSource>>,
    disabled: HashSet<String>,
}

/// The live data source map. Orchestration may swap it or disable members at
/// any time; routing reads it on every call.
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, source: Arc<dyn DataSource>) {
        let mut state = self.state.write();
        if !state.names.iter().any(|n| n == name) {
            state.names.push(name.to_string());
        }
        state.sources.insert(name.to_string(), source);
        tracing::debug!("Registered data source {}", name);
    }

    /// Replace the whole map; disabled flags of names that survive are kept.
    pub fn swap(&self, sources: Vec<(String, Arc<dyn DataSource>)>) {
        let mut state = self.state.write();
        let names: Vec<String> = sources.iter().map(|(n, _)| n.clone()).collect();
        state.disabled.retain(|n| names.contains(n));
        state.sources = sources.into_iter().collect();
        state.names = names;
        tracing::info!("Data source map swapped: {:?}", state.names);
    }

    pub fn disable(&self, name: &str) {
        if self.state.write().disabled.insert(name.to_string()) {
            tracing::warn!("Data source {} disabled", name);
        }
    }

    pub fn enable(&self, name: &str) {
        if self.state.write().disabled.remove(name) {
            tracing::info!("Data source {} enabled", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().sources.contains_key(name)
    }

    pub fn is_available(&self, name: &str) -> bool {
        let state = self.state.read();
        state.sources.contains_key(name) && !state.disabled.contains(name)
    }

    /// All registered names, including disabled ones.
    pub fn names(&self) -> Vec<String> {
        self.state.read().names.clone()
    }

    pub fn available_names(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .names
            .iter()
            .filter(|n| !state.disabled.contains(*n))
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> DbResult<Arc<dyn DataSource>> {
        let state = self.state.read();
        if state.disabled.contains(name) {
            return Err(DbError::DataSourceDisabled(name.to_string()));
        }
        state
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::DataSourceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoConnections;

    impl DataSource for NoConnections {
        fn get_connection(&self) -> DbResult<Arc<dyn Connection>> {
            Err(DbError::InternalError("no connections in this test".to_string()))
        }
    }

    fn registry(names: &[&str]) -> DataSourceRegistry {
        let registry = DataSourceRegistry::new();
        for name in names {
            registry.register(name, Arc::new(NoConnections));
        }
        registry
    }

    #[test]
    fn test_disable_and_enable() {
        let registry = registry(&["ds0", "ds1"]);
        registry.disable("ds1");
        assert_eq!(registry.available_names(), vec!["ds0".to_string()]);
        assert!(matches!(registry.get("ds1"), Err(DbError::DataSourceDisabled(_))));

        registry.enable("ds1");
        assert!(registry.is_available("ds1"));
        assert_eq!(registry.available_names().len(), 2);
    }

    #[test]
    fn test_missing_source() {
        let registry = registry(&["ds0"]);
        assert!(matches!(registry.get("ds9"), Err(DbError::DataSourceNotFound(_))));
    }

    #[test]
    fn test_swap_replaces_map() {
        let registry = registry(&["ds0", "ds1"]);
        registry.disable("ds1");
        registry.swap(vec![
            ("ds1".to_string(), Arc::new(NoConnections) as Arc<dyn DataSource>),
            ("ds2".to_string(), Arc::new(NoConnections) as Arc<dyn DataSource>),
        ]);
        assert_eq!(registry.names(), vec!["ds1".to_string(), "ds2".to_string()]);
        assert_eq!(registry.available_names(), vec!["ds2".to_string()]);
        assert!(!registry.contains("ds0"));
    }
}
