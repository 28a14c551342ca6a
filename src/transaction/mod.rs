//! Transaction Coordinator
//!
//! One [`TransactionHandler`] per logical connection, picked by the configured
//! [`TransactionType`], applies begin/commit/rollback to the physical
//! connections cached during the transaction.

pub mod base;
pub mod coordinator;
pub mod journal;
pub mod local;
pub mod xa;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::datasource::Connection;
use crate::error::DbResult;
use crate::event::EventSink;
use crate::sql::SqlStatement;

pub use base::{AsyncDeliveryJob, BaseJournalSink, BaseTransactionHandler, DeliveryCommand, DeliveryReport};
pub use coordinator::TransactionCoordinator;
pub use journal::{FileTransactionLogStorage, MemoryTransactionLogStorage, TransactionLog, TransactionLogStorage};
pub use local::LocalTransactionHandler;
pub use xa::{TwoPhaseCommitProvider, XaTransactionHandler, XaTransactionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    #[default]
    Local,
    Xa,
    Base,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Local => write!(f, "LOCAL"),
            TransactionType::Xa => write!(f, "XA"),
            TransactionType::Base => write!(f, "BASE"),
        }
    }
}

/// Unique identifier for a transaction (timestamp-based for ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        Self(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    NoTransaction,
    Active,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_active(&self) -> bool {
        *self == TransactionStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOperation {
    Begin,
    Commit,
    Rollback,
}

/// A physical connection cached by a logical connection.
#[derive(Clone)]
pub struct CachedConnection {
    pub data_source: String,
    pub connection: Arc<dyn Connection>,
}

impl fmt::Debug for CachedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedConnection")
            .field("data_source", &self.data_source)
            .finish()
    }
}

/// Raised by the logical connection on a transaction state change.
#[derive(Debug, Clone)]
pub struct TransactionEvent {
    pub operation: TransactionOperation,
    pub connections: Vec<CachedConnection>,
    pub auto_commit: bool,
}

/// XA transaction branch identifier: one global id, one branch per data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub global_id: String,
    pub branch_qualifier: String,
}

impl Xid {
    pub fn new() -> Self {
        Self {
            global_id: uuid::Uuid::new_v4().to_string(),
            branch_qualifier: String::new(),
        }
    }

    pub fn branch(&self, data_source: &str) -> Self {
        Self {
            global_id: self.global_id.clone(),
            branch_qualifier: data_source.to_string(),
        }
    }
}

impl Default for Xid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.branch_qualifier.is_empty() {
            write!(f, "{}", self.global_id)
        } else {
            write!(f, "{}:{}", self.global_id, self.branch_qualifier)
        }
    }
}

/// One transaction strategy.
pub trait TransactionHandler: Send {
    fn transaction_type(&self) -> TransactionType;

    fn begin(&mut self, connections: &[CachedConnection]) -> DbResult<()>;

    /// A physical connection opened while the transaction is active.
    fn enlist(&mut self, connection: &CachedConnection) -> DbResult<()>;

    fn commit(&mut self, connections: &[CachedConnection]) -> DbResult<()>;

    fn rollback(&mut self, connections: &[CachedConnection]) -> DbResult<()>;

    /// Reject statements the strategy cannot run mid-transaction.
    fn check_statement(&self, _statement: &SqlStatement) -> DbResult<()> {
        Ok(())
    }

    /// Whether units must run on the caller thread while active.
    fn requires_serial_execution(&self) -> bool {
        false
    }

    /// Extra observer for the units of a write run inside the transaction.
    fn execution_sink(&self) -> Option<Arc<dyn EventSink>> {
        None
    }

    /// Write failures are recorded for later delivery instead of raised.
    fn swallows_execution_failures(&self) -> bool {
        false
    }
}
