use super::{CachedConnection, TransactionHandler, TransactionType};
use crate::error::{ConnectionOutcome, DbError, DbResult};

/// Run `operation` on every connection, even after failures. Any failure
/// yields a composite error listing the outcome of every connection.
pub(crate) fn apply_to_all<F>(connections: &[CachedConnection], action: &str, operation: F) -> DbResult<()>
where
    F: Fn(&CachedConnection) -> DbResult<()>,
{
    let outcomes: Vec<ConnectionOutcome> = connections
        .iter()
        .map(|cached| match operation(cached) {
            Ok(()) => ConnectionOutcome::ok(&cached.data_source),
            Err(e) => {
                tracing::error!("{} failed on {}: {}", action, cached.data_source, e);
                ConnectionOutcome::failed(&cached.data_source, e)
            }
        })
        .collect();

    if outcomes.iter().all(ConnectionOutcome::is_ok) {
        Ok(())
    } else {
        Err(DbError::Transaction(outcomes))
    }
}

/// Independent commit/rollback on every cached connection.
#[derive(Debug, Default)]
pub struct LocalTransactionHandler;

impl LocalTransactionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl TransactionHandler for LocalTransactionHandler {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Local
    }

    fn begin(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        apply_to_all(connections, "Begin", |c| c.connection.set_auto_commit(false))
    }

    fn enlist(&mut self, connection: &CachedConnection) -> DbResult<()> {
        connection.connection.set_auto_commit(false)
    }

    fn commit(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        apply_to_all(connections, "Commit", |c| c.connection.commit())
    }

    fn rollback(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        apply_to_all(connections, "Rollback", |c| c.connection.rollback())
    }
}
