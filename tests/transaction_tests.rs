//! LOCAL, XA and BASE transactions driven through a logical connection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ints, order_config, registry, runtime, ScriptedDataSource};
use shardmesh::transaction::{
    AsyncDeliveryJob, DeliveryCommand, DeliveryReport, FileTransactionLogStorage, MemoryTransactionLogStorage,
    TransactionId, TransactionLog, TransactionLogStorage,
};
use shardmesh::{
    BaseConfig, DbError, ExecuteResponse, ShardingConfig, TransactionStatus, TransactionType, Value,
};
use tempfile::tempdir;

const UPDATE_BY_USER: &str = "UPDATE t_order SET status = 'paid' WHERE user_id = ?";

fn sources() -> (ScriptedDataSource, ScriptedDataSource) {
    (ScriptedDataSource::new("ds0"), ScriptedDataSource::new("ds1"))
}

fn config(transaction_type: TransactionType) -> ShardingConfig {
    let mut config = order_config();
    config.props.transaction_type = transaction_type;
    config
}

// ==================== LOCAL ====================

#[test]
fn test_local_commit_reaches_every_cached_connection() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.set_auto_commit(false).unwrap();
    assert_eq!(connection.transaction_status(), TransactionStatus::Active);
    assert_eq!(connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap(), 2);
    assert_eq!(connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap(), 2);

    // one pinned connection per data source for the whole transaction
    assert_eq!(ds0.opened(), 1);
    assert_eq!(ds1.opened(), 1);
    assert_eq!(ds0.calls()[0], "auto_commit=false");

    connection.commit().unwrap();
    assert_eq!(connection.transaction_status(), TransactionStatus::Committed);
    assert!(connection.auto_commit());
    assert_eq!(ds0.count("commit"), 1);
    assert_eq!(ds1.count("commit"), 1);
    assert_eq!(ds1.calls().last().map(String::as_str), Some("auto_commit=true"));
}

#[test]
fn test_local_commit_failure_lists_every_connection() {
    let (ds0, ds1) = sources();
    ds0.fail_commit();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();

    let error = connection.commit().unwrap_err();
    let DbError::Transaction(outcomes) = error else {
        panic!("expected a composite transaction error");
    };
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].data_source, "ds0");
    assert!(!outcomes[0].is_ok());
    assert_eq!(outcomes[1].data_source, "ds1");
    assert!(outcomes[1].is_ok());

    // the failing connection did not stop the other commit
    assert_eq!(ds1.count("commit"), 1);
    assert_eq!(connection.transaction_status(), TransactionStatus::RolledBack);
}

#[test]
fn test_begin_applies_to_connections_opened_earlier() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    assert!(!ds0.calls().contains(&"auto_commit=false".to_string()));

    connection.begin().unwrap();
    assert_eq!(ds0.calls().last().map(String::as_str), Some("auto_commit=false"));
    connection.rollback().unwrap();
    assert_eq!(ds0.count("rollback"), 1);
    assert!(ds1.calls().is_empty());
}

#[test]
fn test_commit_without_transaction_is_noop() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.commit().unwrap();
    connection.rollback().unwrap();
    assert_eq!(ds0.count("commit"), 0);
    assert_eq!(ds0.count("rollback"), 0);
    assert_eq!(connection.transaction_status(), TransactionStatus::NoTransaction);
}

#[test]
fn test_transaction_control_statements() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let response = connection.execute_sql("BEGIN", &[]).unwrap();
    assert!(matches!(response, ExecuteResponse::Transaction(TransactionStatus::Active)));
    assert!(!connection.auto_commit());

    connection.execute_sql(UPDATE_BY_USER, &ints(&[1])).unwrap();
    connection.execute_sql("SAVEPOINT before_refund", &[]).unwrap();
    assert!(ds1.statements().contains(&"SAVEPOINT before_refund".to_string()));

    let response = connection.execute_sql("COMMIT", &[]).unwrap();
    assert!(matches!(response, ExecuteResponse::Transaction(TransactionStatus::Committed)));
    assert_eq!(ds1.count("commit"), 1);

    connection.execute_sql("SET autocommit = 0", &[]).unwrap();
    assert_eq!(connection.transaction_status(), TransactionStatus::Active);
    connection.execute_sql("ROLLBACK", &[]).unwrap();
    assert_eq!(ds1.count("rollback"), 1);
    assert!(ds0.calls().is_empty());
}

#[test]
fn test_begin_twice_is_rejected() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.execute_sql("BEGIN", &[]).unwrap();
    assert!(matches!(
        connection.execute_sql("BEGIN", &[]),
        Err(DbError::IllegalTransactionState(_))
    ));
}

#[test]
fn test_close_rolls_back_and_closes_every_connection() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Local), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();
    connection.close().unwrap();

    for source in [&ds0, &ds1] {
        let calls = source.calls();
        let rollback = calls.iter().position(|c| c == "rollback").unwrap();
        let close = calls.iter().position(|c| c == "close").unwrap();
        assert!(rollback < close);
    }
    assert_eq!(connection.cached_connection_count(), 0);
    assert!(connection.is_closed());
    assert!(matches!(
        connection.execute_update(UPDATE_BY_USER, &ints(&[0])),
        Err(DbError::IllegalTransactionState(_))
    ));
}

// ==================== XA ====================

#[test]
fn test_xa_two_phase_commit() {
    let (ds0, ds1) = sources();
    ds0.enable_xa();
    ds1.enable_xa();
    let runtime = runtime(&config(TransactionType::Xa), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();
    connection.commit().unwrap();

    let calls = ds0.calls();
    assert_eq!(calls[0], "xa_start:ds0");
    let tail: Vec<&str> = calls[calls.len() - 3..].iter().map(String::as_str).collect();
    assert_eq!(tail, vec!["xa_end", "xa_prepare", "xa_commit"]);
    assert_eq!(ds1.count("xa_commit"), 1);
    assert_eq!(ds1.calls()[0], "xa_start:ds1");
}

#[test]
fn test_xa_failed_prepare_rolls_back_every_branch() {
    let (ds0, ds1) = sources();
    ds0.enable_xa();
    ds1.enable_xa();
    ds1.fail_prepare();
    let runtime = runtime(&config(TransactionType::Xa), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();
    assert!(matches!(connection.commit(), Err(DbError::Transaction(_))));

    for source in [&ds0, &ds1] {
        assert_eq!(source.count("xa_rollback"), 1);
        assert_eq!(source.count("xa_commit"), 0);
    }
    assert_eq!(connection.transaction_status(), TransactionStatus::RolledBack);
}

#[test]
fn test_xa_rejects_ddl_inside_transaction() {
    let (ds0, ds1) = sources();
    ds0.enable_xa();
    ds1.enable_xa();
    let runtime = runtime(&config(TransactionType::Xa), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    assert!(matches!(
        connection.execute_update("TRUNCATE TABLE t_order", &[]),
        Err(DbError::OperationNotSupported(_))
    ));
    assert!(ds0.statements().is_empty());

    connection.rollback().unwrap();
    connection.execute_update("TRUNCATE TABLE t_order", &[]).unwrap();
    assert_eq!(ds0.statements().len(), 2);
}

#[test]
fn test_xa_without_resource_fails_enlist() {
    let (ds0, ds1) = sources();
    let runtime = runtime(&config(TransactionType::Xa), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    assert!(matches!(
        connection.execute_update(UPDATE_BY_USER, &ints(&[0])),
        Err(DbError::OperationNotSupported(_))
    ));
    assert_eq!(ds0.calls(), vec!["close"]);
    assert_eq!(connection.cached_connection_count(), 0);
}

// ==================== BASE ====================

#[test]
fn test_base_journals_failed_statements_for_redelivery() {
    let (ds0, ds1) = sources();
    ds1.fail_on("t_order1");
    let runtime = runtime(&config(TransactionType::Base), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    // the failure is recorded, not raised
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();
    connection.commit().unwrap();

    let pending = runtime.journal().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].data_source, "ds1");
    assert_eq!(pending[0].sql, "UPDATE t_order1 SET status = 'paid' WHERE user_id = ?");
    assert_eq!(pending[0].parameters, vec![Value::Integer(1)]);

    let job = runtime.delivery_job();
    let report = job.run_once().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.exhausted, 0);

    ds1.clear_failures();
    let report = job.run_once().unwrap();
    assert_eq!(report.delivered, 1);
    assert!(runtime.journal().pending().unwrap().is_empty());
}

#[test]
fn test_base_outside_transaction_raises_failures() {
    let (ds0, ds1) = sources();
    ds1.fail_on("t_order1");
    let runtime = runtime(&config(TransactionType::Base), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    assert!(connection.execute_update(UPDATE_BY_USER, &ints(&[1])).is_err());
    assert!(runtime.journal().pending().unwrap().is_empty());
}

#[test]
fn test_delivery_gives_up_after_max_tries() {
    let (ds0, _) = sources();
    ds0.fail_on("UPDATE");
    let storage = Arc::new(MemoryTransactionLogStorage::new());
    storage
        .add(TransactionLog::new(TransactionId::new(), "ds0", "UPDATE t_order0 SET status = 'x'", vec![]))
        .unwrap();
    let config = BaseConfig {
        max_delivery_try_times: 2,
        ..Default::default()
    };
    let job = AsyncDeliveryJob::new(storage.clone(), registry(&[&ds0]), &config);

    assert_eq!(job.run_once().unwrap().exhausted, 0);
    assert_eq!(job.run_once().unwrap().exhausted, 1);
    assert_eq!(job.run_once().unwrap(), DeliveryReport::default());
    assert_eq!(storage.pending().unwrap()[0].try_times, 2);
    // each attempt used and closed its own connection
    assert_eq!(ds0.opened(), 2);
    assert_eq!(ds0.count("close"), 2);
}

#[test]
fn test_base_journal_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("base.journal");
    let (ds0, ds1) = sources();
    ds0.fail_on("t_order0");

    let mut config = config(TransactionType::Base);
    config.base.journal_path = Some(path.clone());
    {
        let runtime = runtime(&config, &[&ds0, &ds1]);
        let mut connection = runtime.connect();
        connection.begin().unwrap();
        connection.execute_update(UPDATE_BY_USER, &ints(&[2])).unwrap();
        connection.commit().unwrap();
    }

    let reopened = FileTransactionLogStorage::open(&path).unwrap();
    let pending = reopened.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sql, "UPDATE t_order0 SET status = 'paid' WHERE user_id = ?");
}

#[test]
fn test_delivery_pass_compacts_the_journal_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("base.journal");
    let (ds0, ds1) = sources();
    ds1.fail_on("t_order1");

    let mut config = config(TransactionType::Base);
    config.base.journal_path = Some(path.clone());
    config.base.journal_compact_threshold = 2;
    let runtime = runtime(&config, &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.begin().unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[0])).unwrap();
    connection.execute_update(UPDATE_BY_USER, &ints(&[1])).unwrap();
    connection.commit().unwrap();

    let line_count = || std::fs::read_to_string(&path).unwrap().lines().count();
    // three delivered statements (add + remove each) and one still pending
    assert_eq!(line_count(), 7);

    let report = runtime.delivery_job().run_once().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(line_count(), 1);

    let pending = FileTransactionLogStorage::open(&path).unwrap().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].try_times, 1);
}

#[tokio::test]
async fn test_delivery_job_runs_in_background() {
    let (ds0, _) = sources();
    let storage = Arc::new(MemoryTransactionLogStorage::new());
    storage
        .add(TransactionLog::new(TransactionId::new(), "ds0", "UPDATE t_order0 SET status = 'x'", vec![]))
        .unwrap();
    let config = BaseConfig {
        delivery_interval_ms: 3_600_000,
        ..Default::default()
    };
    let job = Arc::new(AsyncDeliveryJob::new(storage.clone(), registry(&[&ds0]), &config));
    let (commands, handle) = job.spawn();

    commands.send(DeliveryCommand::RunNow).await.unwrap();
    for _ in 0..100 {
        if storage.pending().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(storage.pending().unwrap().is_empty());
    assert_eq!(ds0.statements(), vec!["UPDATE t_order0 SET status = 'x'"]);

    commands.send(DeliveryCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}
