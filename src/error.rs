use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure of a single physical execution unit, attributed to its data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub data_source: String,
    pub sql: String,
    pub message: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.data_source, self.sql, self.message)
    }
}

/// Outcome of a commit/rollback/close applied to one cached connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOutcome {
    pub data_source: String,
    /// `None` when the operation succeeded on this connection
    pub error: Option<String>,
}

impl ConnectionOutcome {
    pub fn ok(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            error: None,
        }
    }

    pub fn failed(data_source: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            data_source: data_source.into(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn describe_outcomes(outcomes: &[ConnectionOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| match &o.error {
            None => format!("{}: ok", o.data_source),
            Some(e) => format!("{}: {}", o.data_source, e),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Data source '{0}' not found")]
    DataSourceNotFound(String),

    #[error("Data source '{0}' is disabled")]
    DataSourceDisabled(String),

    #[error("Execution error on '{data_source}': {message}")]
    Execution { data_source: String, message: String },

    #[error("Batch execution failed: {}", describe_failures(.failures))]
    BatchExecution {
        update_counts: Vec<u64>,
        failures: Vec<UnitFailure>,
    },

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Transaction failed: {}", describe_outcomes(.0))]
    Transaction(Vec<ConnectionOutcome>),

    #[error("Illegal transaction state: {0}")]
    IllegalTransactionState(String),

    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Driver-level failure raised by a physical connection.
    pub fn execution(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        DbError::Execution {
            data_source: data_source.into(),
            message: message.into(),
        }
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}
