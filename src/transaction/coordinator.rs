use std::sync::Arc;

use super::base::BaseTransactionHandler;
use super::journal::TransactionLogStorage;
use super::local::LocalTransactionHandler;
use super::xa::{XaTransactionHandler, XaTransactionProvider};
use super::{
    CachedConnection, TransactionEvent, TransactionHandler, TransactionOperation, TransactionStatus, TransactionType,
};
use crate::error::{DbError, DbResult};
use crate::event::EventSink;
use crate::sql::SqlStatement;

/// Drives one logical connection through
/// `NoTransaction -> Active -> Committed | RolledBack`.
pub struct TransactionCoordinator {
    handler: Box<dyn TransactionHandler>,
    status: TransactionStatus,
}

impl TransactionCoordinator {
    pub fn new(handler: Box<dyn TransactionHandler>) -> Self {
        Self {
            handler,
            status: TransactionStatus::NoTransaction,
        }
    }

    pub fn for_type(
        transaction_type: TransactionType,
        xa_provider: Arc<dyn XaTransactionProvider>,
        storage: Arc<dyn TransactionLogStorage>,
    ) -> Self {
        let handler: Box<dyn TransactionHandler> = match transaction_type {
            TransactionType::Local => Box::new(LocalTransactionHandler::new()),
            TransactionType::Xa => Box::new(XaTransactionHandler::new(xa_provider)),
            TransactionType::Base => Box::new(BaseTransactionHandler::new(storage)),
        };
        Self::new(handler)
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.handler.transaction_type()
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn dispatch(&mut self, event: &TransactionEvent) -> DbResult<()> {
        match event.operation {
            TransactionOperation::Begin => {
                if self.is_active() {
                    return Err(DbError::IllegalTransactionState(
                        "A transaction is already active".to_string(),
                    ));
                }
                self.handler.begin(&event.connections)?;
                self.status = TransactionStatus::Active;
                tracing::debug!(
                    "{} transaction begun on {} cached connection(s)",
                    self.transaction_type(),
                    event.connections.len()
                );
                Ok(())
            }
            TransactionOperation::Commit => {
                if !self.is_active() {
                    tracing::debug!("Commit without an active transaction ignored");
                    return Ok(());
                }
                let result = self.handler.commit(&event.connections);
                // a failed commit still ends the transaction; the error lists every connection
                self.status = if result.is_ok() {
                    TransactionStatus::Committed
                } else {
                    TransactionStatus::RolledBack
                };
                result
            }
            TransactionOperation::Rollback => {
                if !self.is_active() {
                    tracing::debug!("Rollback without an active transaction ignored");
                    return Ok(());
                }
                let result = self.handler.rollback(&event.connections);
                self.status = TransactionStatus::RolledBack;
                result
            }
        }
    }

    /// Join a connection opened after BEGIN to the running transaction.
    pub fn enlist(&mut self, connection: &CachedConnection) -> DbResult<()> {
        if self.is_active() {
            self.handler.enlist(connection)?;
        }
        Ok(())
    }

    pub fn check_statement(&self, statement: &SqlStatement) -> DbResult<()> {
        if self.is_active() {
            self.handler.check_statement(statement)?;
        }
        Ok(())
    }

    pub fn requires_serial_execution(&self) -> bool {
        self.is_active() && self.handler.requires_serial_execution()
    }

    pub fn execution_sink(&self) -> Option<Arc<dyn EventSink>> {
        if self.is_active() {
            self.handler.execution_sink()
        } else {
            None
        }
    }

    pub fn swallows_execution_failures(&self) -> bool {
        self.is_active() && self.handler.swallows_execution_failures()
    }
}
