//! shardmesh: database sharding middleware core.
//!
//! A logical statement is parsed, routed to physical data nodes, executed
//! against every target in parallel and merged back into one result, while
//! the transaction coordinator keeps commit and rollback coherent across the
//! physical connections involved.

pub mod config;
pub mod connection;
pub mod datasource;
pub mod error;
pub mod event;
pub mod execute;
pub mod merge;
pub mod metadata;
pub mod route;
pub mod rule;
pub mod runtime;
pub mod sql;
pub mod transaction;
pub mod value;

pub use config::{BaseConfig, Props, ShardingConfig};
pub use connection::{ExecuteResponse, ShardingConnection};
pub use datasource::{Connection, DataSource, DataSourceRegistry, XaResource};
pub use error::{DbError, DbResult};
pub use event::{ChannelEventSink, EventDispatcher, EventSink, ExecutionEvent, TracingEventSink};
pub use execute::{ExceptionPolicy, ExecuteEngine, ExecutionContext, MemoryQueryResult, QueryResult};
pub use merge::ShardingResultSet;
pub use metadata::TableMetadata;
pub use route::{ExecutionUnit, RouteResult, RoutingEngine};
pub use rule::{DataNode, ShardingRule, TableRule};
pub use runtime::ShardingRuntime;
pub use sql::DatabaseType;
pub use transaction::{TransactionStatus, TransactionType};
pub use value::Value;
