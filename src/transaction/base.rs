//! BASE transactions: best-effort delivery.
//!
//! Statements run immediately in auto-commit mode. Each one is journaled
//! before it runs and dropped from the journal once it succeeds; failures stay
//! behind for the [`AsyncDeliveryJob`] to retry out of band.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::journal::{TransactionLog, TransactionLogStorage};
use super::{CachedConnection, TransactionHandler, TransactionId, TransactionType};
use crate::config::BaseConfig;
use crate::datasource::DataSourceRegistry;
use crate::error::DbResult;
use crate::event::{EventSink, ExecutionEvent};

pub struct BaseTransactionHandler {
    storage: Arc<dyn TransactionLogStorage>,
    transaction_id: Option<TransactionId>,
}

impl BaseTransactionHandler {
    pub fn new(storage: Arc<dyn TransactionLogStorage>) -> Self {
        Self {
            storage,
            transaction_id: None,
        }
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }
}

impl TransactionHandler for BaseTransactionHandler {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Base
    }

    fn begin(&mut self, _connections: &[CachedConnection]) -> DbResult<()> {
        let id = TransactionId::new();
        tracing::debug!("BASE transaction {} started", id);
        self.transaction_id = Some(id);
        Ok(())
    }

    fn enlist(&mut self, _connection: &CachedConnection) -> DbResult<()> {
        Ok(())
    }

    fn commit(&mut self, _connections: &[CachedConnection]) -> DbResult<()> {
        if let Some(id) = self.transaction_id.take() {
            tracing::debug!("BASE transaction {} finished", id);
        }
        Ok(())
    }

    fn rollback(&mut self, _connections: &[CachedConnection]) -> DbResult<()> {
        if let Some(id) = self.transaction_id.take() {
            tracing::warn!("BASE transaction {} cannot undo statements already applied", id);
        }
        Ok(())
    }

    fn requires_serial_execution(&self) -> bool {
        true
    }

    fn execution_sink(&self) -> Option<Arc<dyn EventSink>> {
        self.transaction_id
            .map(|id| Arc::new(BaseJournalSink::new(Arc::clone(&self.storage), id)) as Arc<dyn EventSink>)
    }

    fn swallows_execution_failures(&self) -> bool {
        self.transaction_id.is_some()
    }
}

/// Journals the units of one write execution.
pub struct BaseJournalSink {
    storage: Arc<dyn TransactionLogStorage>,
    transaction_id: TransactionId,
    /// unit index -> journal ids of its parameter sets
    pending: Mutex<HashMap<usize, Vec<String>>>,
}

impl BaseJournalSink {
    pub fn new(storage: Arc<dyn TransactionLogStorage>, transaction_id: TransactionId) -> Self {
        Self {
            storage,
            transaction_id,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl EventSink for BaseJournalSink {
    fn publish(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::UnitStarted { unit } => {
                let mut ids = Vec::with_capacity(unit.parameter_sets.len());
                for parameters in &unit.parameter_sets {
                    let log = TransactionLog::new(self.transaction_id, &unit.data_source, &unit.sql, parameters.clone());
                    let id = log.id.clone();
                    match self.storage.add(log) {
                        Ok(()) => ids.push(id),
                        Err(e) => tracing::error!("[{}] failed to journal statement: {}", unit.data_source, e),
                    }
                }
                self.pending.lock().insert(unit.index, ids);
            }
            ExecutionEvent::UnitSucceeded { unit } => {
                let ids = self.pending.lock().remove(&unit.index).unwrap_or_default();
                for id in ids {
                    if let Err(e) = self.storage.remove(&id) {
                        tracing::error!("[{}] failed to clear journal entry {}: {}", unit.data_source, id, e);
                    }
                }
            }
            ExecutionEvent::UnitFailed { unit, error } => {
                self.pending.lock().remove(&unit.index);
                tracing::warn!(
                    "[{}] statement left for redelivery in {}: {}",
                    unit.data_source,
                    self.transaction_id,
                    error
                );
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// failed and now out of tries
    pub exhausted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCommand {
    RunNow,
    Shutdown,
}

/// Retries journaled statements until they succeed or run out of tries.
pub struct AsyncDeliveryJob {
    storage: Arc<dyn TransactionLogStorage>,
    registry: DataSourceRegistry,
    max_try_times: u32,
    interval: Duration,
}

impl AsyncDeliveryJob {
    pub fn new(storage: Arc<dyn TransactionLogStorage>, registry: DataSourceRegistry, config: &BaseConfig) -> Self {
        Self {
            storage,
            registry,
            max_try_times: config.max_delivery_try_times,
            interval: Duration::from_millis(config.delivery_interval_ms.max(1)),
        }
    }

    /// One delivery pass. Blocking; connections are used synchronously.
    pub fn run_once(&self) -> DbResult<DeliveryReport> {
        let mut report = DeliveryReport::default();
        for log in self.storage.find_eligible(self.max_try_times, usize::MAX)? {
            match self.deliver(&log) {
                Ok(()) => {
                    self.storage.remove(&log.id)?;
                    report.delivered += 1;
                    tracing::info!("[{}] redelivered {} from {}", log.data_source, log.sql, log.transaction_id);
                }
                Err(e) => {
                    self.storage.increase_try_times(&log.id)?;
                    report.failed += 1;
                    if log.try_times + 1 >= self.max_try_times {
                        report.exhausted += 1;
                        tracing::error!(
                            "[{}] giving up on {} after {} tries: {}",
                            log.data_source,
                            log.sql,
                            log.try_times + 1,
                            e
                        );
                    } else {
                        tracing::debug!("[{}] redelivery failed: {}", log.data_source, e);
                    }
                }
            }
        }
        self.storage.maintain()?;
        Ok(report)
    }

    fn deliver(&self, log: &TransactionLog) -> DbResult<()> {
        let connection = self.registry.get(&log.data_source)?.get_connection()?;
        let result = connection.execute_update(&log.sql, &log.parameters).map(|_| ());
        if let Err(e) = connection.close() {
            tracing::debug!("[{}] close after redelivery: {}", log.data_source, e);
        }
        result
    }

    /// Run on a tokio interval until [`DeliveryCommand::Shutdown`] arrives or
    /// the sender is dropped. Must be called inside a tokio runtime.
    pub fn spawn(self: Arc<Self>) -> (mpsc::Sender<DeliveryCommand>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(DeliveryCommand::RunNow) => self.run_in_background().await,
                        Some(DeliveryCommand::Shutdown) | None => {
                            tracing::info!("BASE delivery job shutting down");
                            break;
                        }
                    },
                    _ = ticker.tick() => self.run_in_background().await,
                }
            }
        });
        (tx, handle)
    }

    async fn run_in_background(self: &Arc<Self>) {
        let job = Arc::clone(self);
        match tokio::task::spawn_blocking(move || job.run_once()).await {
            Ok(Ok(report)) if report != DeliveryReport::default() => {
                tracing::debug!("BASE delivery pass: {:?}", report);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("BASE delivery pass failed: {}", e),
            Err(e) => tracing::error!("BASE delivery task panicked: {}", e),
        }
    }
}
