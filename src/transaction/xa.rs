use std::sync::Arc;

use super::local::apply_to_all;
use super::{CachedConnection, TransactionHandler, TransactionType, Xid};
use crate::datasource::XaResource;
use crate::error::{DbError, DbResult};
use crate::sql::SqlStatement;

/// Pluggable two-phase commit coordinator.
pub trait XaTransactionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start the participant's branch of `xid`.
    fn enlist(&self, xid: &Xid, participant: &CachedConnection) -> DbResult<()>;

    fn commit(&self, xid: &Xid, participants: &[CachedConnection]) -> DbResult<()>;

    fn rollback(&self, xid: &Xid, participants: &[CachedConnection]) -> DbResult<()>;
}

fn xa_resource(participant: &CachedConnection) -> DbResult<&dyn XaResource> {
    participant.connection.xa_resource().ok_or_else(|| {
        DbError::OperationNotSupported(format!(
            "Data source '{}' does not support XA",
            participant.data_source
        ))
    })
}

/// Built-in provider: prepare every branch, roll everything back if any
/// prepare fails, otherwise commit every branch.
#[derive(Debug, Default)]
pub struct TwoPhaseCommitProvider;

impl XaTransactionProvider for TwoPhaseCommitProvider {
    fn name(&self) -> &str {
        "two-phase"
    }

    fn enlist(&self, xid: &Xid, participant: &CachedConnection) -> DbResult<()> {
        xa_resource(participant)?.start(&xid.branch(&participant.data_source))
    }

    fn commit(&self, xid: &Xid, participants: &[CachedConnection]) -> DbResult<()> {
        let prepared = apply_to_all(participants, "XA prepare", |p| {
            let resource = xa_resource(p)?;
            let branch = xid.branch(&p.data_source);
            resource.end(&branch)?;
            resource.prepare(&branch)
        });
        if let Err(e) = prepared {
            tracing::warn!("XA transaction {} failed to prepare, rolling back", xid);
            if let Err(rollback_error) = self.rollback_branches(xid, participants) {
                tracing::error!("XA rollback after failed prepare: {}", rollback_error);
            }
            return Err(e);
        }
        apply_to_all(participants, "XA commit", |p| {
            xa_resource(p)?.commit(&xid.branch(&p.data_source))
        })
    }

    fn rollback(&self, xid: &Xid, participants: &[CachedConnection]) -> DbResult<()> {
        let ended = apply_to_all(participants, "XA end", |p| {
            xa_resource(p)?.end(&xid.branch(&p.data_source))
        });
        // an already ended branch can still be rolled back
        if let Err(e) = ended {
            tracing::debug!("XA end before rollback: {}", e);
        }
        self.rollback_branches(xid, participants)
    }
}

impl TwoPhaseCommitProvider {
    fn rollback_branches(&self, xid: &Xid, participants: &[CachedConnection]) -> DbResult<()> {
        apply_to_all(participants, "XA rollback", |p| {
            xa_resource(p)?.rollback(&xid.branch(&p.data_source))
        })
    }
}

pub struct XaTransactionHandler {
    provider: Arc<dyn XaTransactionProvider>,
    xid: Option<Xid>,
}

impl XaTransactionHandler {
    pub fn new(provider: Arc<dyn XaTransactionProvider>) -> Self {
        Self { provider, xid: None }
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    fn active_xid(&self) -> DbResult<&Xid> {
        self.xid
            .as_ref()
            .ok_or_else(|| DbError::IllegalTransactionState("No XA transaction in progress".to_string()))
    }
}

impl TransactionHandler for XaTransactionHandler {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Xa
    }

    fn begin(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        let xid = Xid::new();
        tracing::debug!("XA transaction {} started via {}", xid, self.provider.name());
        let provider = Arc::clone(&self.provider);
        let result = apply_to_all(connections, "XA start", |c| provider.enlist(&xid, c));
        self.xid = Some(xid);
        result
    }

    fn enlist(&mut self, connection: &CachedConnection) -> DbResult<()> {
        let xid = self.active_xid()?;
        self.provider.enlist(xid, connection)
    }

    fn commit(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        match self.xid.take() {
            Some(xid) => self.provider.commit(&xid, connections),
            None => Ok(()),
        }
    }

    fn rollback(&mut self, connections: &[CachedConnection]) -> DbResult<()> {
        match self.xid.take() {
            Some(xid) => self.provider.rollback(&xid, connections),
            None => Ok(()),
        }
    }

    fn check_statement(&self, statement: &SqlStatement) -> DbResult<()> {
        if matches!(statement, SqlStatement::Ddl(_)) {
            return Err(DbError::OperationNotSupported(
                "DDL is not allowed inside an XA transaction".to_string(),
            ));
        }
        Ok(())
    }

    fn requires_serial_execution(&self) -> bool {
        true
    }
}
