//! Common test utilities for shardmesh integration tests
//!
//! Provides shared helpers for:
//! - Scripted in-memory data sources that answer queries from canned rows
//! - Recording every call a physical connection receives
//! - Injecting statement, commit and XA prepare failures
//! - Building runtimes over the `t_order` sharding layout

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use shardmesh::transaction::Xid;
use shardmesh::{
    Connection, DataSource, DataSourceRegistry, DbError, DbResult, MemoryQueryResult, QueryResult, ShardingConfig,
    ShardingRuntime, Value, XaResource,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Script {
    /// actual table -> (labels, rows)
    tables: Mutex<HashMap<String, (Vec<String>, Vec<Vec<Value>>)>>,
    calls: Mutex<Vec<String>>,
    fail_fragments: Mutex<Vec<String>>,
    fail_commit: AtomicBool,
    fail_prepare: AtomicBool,
    xa: AtomicBool,
    opened: AtomicUsize,
}

/// A data source whose connections share one script.
#[derive(Clone)]
pub struct ScriptedDataSource {
    pub name: String,
    script: Arc<Script>,
}

impl ScriptedDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Script::default()),
        }
    }

    /// Rows returned for any query naming `table`, already in shard order.
    pub fn with_rows(self, table: &str, labels: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.script.tables.lock().insert(
            table.to_string(),
            (labels.iter().map(|l| l.to_string()).collect(), rows),
        );
        self
    }

    /// Statements containing `fragment` fail.
    pub fn fail_on(&self, fragment: &str) {
        self.script.fail_fragments.lock().push(fragment.to_string());
    }

    pub fn clear_failures(&self) {
        self.script.fail_fragments.lock().clear();
    }

    pub fn fail_commit(&self) {
        self.script.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_prepare(&self) {
        self.script.fail_prepare.store(true, Ordering::SeqCst);
    }

    pub fn enable_xa(&self) {
        self.script.xa.store(true, Ordering::SeqCst);
    }

    /// Every call received by any connection of this source, in order.
    pub fn calls(&self) -> Vec<String> {
        self.script.calls.lock().clone()
    }

    /// SQL text of queries and updates only.
    pub fn statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| {
                call.strip_prefix("query:")
                    .or_else(|| call.strip_prefix("update:"))
                    .or_else(|| call.strip_prefix("batch:"))
                    .map(|sql| sql.to_string())
            })
            .collect()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn opened(&self) -> usize {
        self.script.opened.load(Ordering::SeqCst)
    }
}

impl DataSource for ScriptedDataSource {
    fn get_connection(&self) -> DbResult<Arc<dyn Connection>> {
        self.script.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            name: self.name.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedConnection {
    name: String,
    script: Arc<Script>,
}

impl ScriptedConnection {
    fn record(&self, call: String) {
        self.script.calls.lock().push(call);
    }

    fn check(&self, sql: &str) -> DbResult<()> {
        if self.script.fail_fragments.lock().iter().any(|f| sql.contains(f.as_str())) {
            return Err(DbError::execution(&self.name, format!("injected failure: {}", sql)));
        }
        Ok(())
    }
}

impl Connection for ScriptedConnection {
    fn execute_query(&self, sql: &str, parameters: &[Value]) -> DbResult<Box<dyn QueryResult>> {
        self.record(format!("query:{}", sql));
        if !parameters.is_empty() {
            self.record(format!("params:{:?}", parameters));
        }
        self.check(sql)?;
        let words: Vec<&str> = sql
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .collect();
        let tables = self.script.tables.lock();
        let (labels, rows) = tables
            .iter()
            .find(|(table, _)| words.contains(&table.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_default();
        Ok(Box::new(MemoryQueryResult::new(labels, rows)))
    }

    fn execute_update(&self, sql: &str, _parameters: &[Value]) -> DbResult<u64> {
        self.record(format!("update:{}", sql));
        self.check(sql)?;
        Ok(1)
    }

    fn execute_batch(&self, sql: &str, parameter_sets: &[Vec<Value>]) -> DbResult<Vec<u64>> {
        self.record(format!("batch:{}", sql));
        self.check(sql)?;
        Ok(vec![1; parameter_sets.len()])
    }

    fn set_auto_commit(&self, auto_commit: bool) -> DbResult<()> {
        self.record(format!("auto_commit={}", auto_commit));
        Ok(())
    }

    fn commit(&self) -> DbResult<()> {
        self.record("commit".to_string());
        if self.script.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::execution(&self.name, "injected commit failure"));
        }
        Ok(())
    }

    fn rollback(&self) -> DbResult<()> {
        self.record("rollback".to_string());
        Ok(())
    }

    fn close(&self) -> DbResult<()> {
        self.record("close".to_string());
        Ok(())
    }

    fn xa_resource(&self) -> Option<&dyn XaResource> {
        if self.script.xa.load(Ordering::SeqCst) {
            Some(self as &dyn XaResource)
        } else {
            None
        }
    }
}

impl XaResource for ScriptedConnection {
    fn start(&self, xid: &Xid) -> DbResult<()> {
        self.record(format!("xa_start:{}", xid.branch_qualifier));
        Ok(())
    }

    fn end(&self, _xid: &Xid) -> DbResult<()> {
        self.record("xa_end".to_string());
        Ok(())
    }

    fn prepare(&self, _xid: &Xid) -> DbResult<()> {
        self.record("xa_prepare".to_string());
        if self.script.fail_prepare.load(Ordering::SeqCst) {
            return Err(DbError::execution(&self.name, "injected prepare failure"));
        }
        Ok(())
    }

    fn commit(&self, _xid: &Xid) -> DbResult<()> {
        self.record("xa_commit".to_string());
        Ok(())
    }

    fn rollback(&self, _xid: &Xid) -> DbResult<()> {
        self.record("xa_rollback".to_string());
        Ok(())
    }
}

pub fn registry(sources: &[&ScriptedDataSource]) -> DataSourceRegistry {
    let registry = DataSourceRegistry::new();
    for source in sources {
        registry.register(&source.name, Arc::new((*source).clone()));
    }
    registry
}

/// `t_order` split over `ds0`/`ds1` by user_id and `t_order0`/`t_order1` by order_id.
pub const ORDER_CONFIG: &str = r#"
broadcast_tables = ["t_config"]

[props]
executor_size = 4
sql_show = true

[[tables]]
logic_table = "t_order"
actual_data_nodes = "ds${0..1}.t_order${0..1}"
database_strategy = { type = "inline", sharding_column = "user_id", algorithm_expression = "ds${user_id % 2}" }
table_strategy = { type = "inline", sharding_column = "order_id", algorithm_expression = "t_order${order_id % 2}" }
"#;

pub fn order_config() -> ShardingConfig {
    ShardingConfig::from_toml_str(ORDER_CONFIG).unwrap()
}

pub fn runtime(config: &ShardingConfig, sources: &[&ScriptedDataSource]) -> Arc<ShardingRuntime> {
    init_tracing();
    Arc::new(ShardingRuntime::new(config, registry(sources)).unwrap())
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Integer(*v)).collect()
}
