pub mod batch;
pub mod context;
pub mod engine;
pub mod prepare;
pub mod query_result;
pub mod statement;
pub mod template;

pub use batch::{BatchCollector, BatchExecutor, BatchRouteUnit};
pub use context::{ExceptionPolicy, ExecutionContext};
pub use engine::{ExecuteCallback, ExecuteEngine};
pub use prepare::{prepare_groups, ConnectionMode, ConnectionProvider, ExecutionGroup, StatementUnit};
pub use query_result::{MemoryQueryResult, QueryResult};
pub use statement::{
    executor_for, ConnectionStrictExecutor, MemoryStrictExecutor, SqlExecutor, StatementExecutor,
};
pub use template::SqlExecuteTemplate;
