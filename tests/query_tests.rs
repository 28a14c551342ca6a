//! Query routing, execution and merging through a logical connection.

mod common;

use common::{ints, order_config, runtime, ScriptedDataSource};
use shardmesh::{DbError, ShardingConfig, Value};

const ORDER_LABELS: &[&str] = &["order_id", "user_id", "amount"];

/// ds0 holds even users, ds1 odd users; t_order0 even orders, t_order1 odd orders.
fn order_sources() -> (ScriptedDataSource, ScriptedDataSource) {
    let ds0 = ScriptedDataSource::new("ds0")
        .with_rows("t_order0", ORDER_LABELS, vec![ints(&[2, 0, 10]), ints(&[6, 2, 30])])
        .with_rows("t_order1", ORDER_LABELS, vec![ints(&[1, 0, 20]), ints(&[9, 4, 50])]);
    let ds1 = ScriptedDataSource::new("ds1")
        .with_rows("t_order0", ORDER_LABELS, vec![ints(&[4, 1, 40]), ints(&[8, 3, 60])])
        .with_rows("t_order1", ORDER_LABELS, vec![ints(&[3, 1, 70]), ints(&[5, 3, 80])]);
    (ds0, ds1)
}

fn order_ids(rows: &[Vec<Value>]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row[0] {
            Value::Integer(id) => id,
            ref other => panic!("unexpected order id {:?}", other),
        })
        .collect()
}

#[test]
fn test_query_without_sharding_condition_hits_every_table() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection.execute_query("SELECT * FROM t_order", &[]).unwrap();
    assert_eq!(result.rows().unwrap().len(), 8);

    assert_eq!(
        ds0.statements(),
        vec!["SELECT * FROM t_order0", "SELECT * FROM t_order1"]
    );
    assert_eq!(
        ds1.statements(),
        vec!["SELECT * FROM t_order0", "SELECT * FROM t_order1"]
    );
}

#[test]
fn test_or_condition_routes_to_union_of_shards() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection
        .execute_query("SELECT * FROM t_order WHERE user_id = 2 OR user_id = 4", &[])
        .unwrap();
    assert_eq!(ds0.statements().len(), 2);
    assert!(ds1.statements().is_empty());

    connection
        .execute_query("SELECT * FROM t_order WHERE order_id = ? OR order_id = ?", &ints(&[1, 2]))
        .unwrap();
    assert_eq!(ds0.statements().len(), 4);
    assert_eq!(ds1.statements().len(), 2);
}

#[test]
fn test_exact_route_runs_single_unit() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let route = connection
        .route("SELECT * FROM t_order WHERE user_id = ? AND order_id = ?", &ints(&[3, 8]))
        .unwrap();
    assert!(route.is_single_unit());
    assert_eq!(route.execution_units[0].data_source, "ds1");
    assert_eq!(
        route.execution_units[0].sql,
        "SELECT * FROM t_order0 WHERE user_id = ? AND order_id = ?"
    );

    let response = connection.execute(route, &ints(&[3, 8])).unwrap();
    let mut result = connection.merge(response).unwrap();
    assert_eq!(result.rows().unwrap().len(), 2);
    assert!(ds0.statements().is_empty());
}

#[test]
fn test_order_by_merge_matches_reference_order() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection
        .execute_query("SELECT order_id, user_id, amount FROM t_order ORDER BY order_id", &[])
        .unwrap();
    assert_eq!(result.column_count(), 3);
    assert_eq!(result.column_label(0).unwrap(), "order_id");
    let rows = result.rows().unwrap();

    let mut reference = vec![
        ints(&[2, 0, 10]),
        ints(&[6, 2, 30]),
        ints(&[1, 0, 20]),
        ints(&[9, 4, 50]),
        ints(&[4, 1, 40]),
        ints(&[8, 3, 60]),
        ints(&[3, 1, 70]),
        ints(&[5, 3, 80]),
    ];
    reference.sort_by_key(|row| match row[0] {
        Value::Integer(id) => id,
        _ => 0,
    });
    assert_eq!(rows, reference);
}

#[test]
fn test_limit_offset_over_shards() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection
        .execute_query("SELECT order_id FROM t_order ORDER BY order_id LIMIT 2, 3", &[])
        .unwrap();
    assert_eq!(order_ids(&result.rows().unwrap()), vec![3, 4, 5]);
    // every shard must return enough rows to cover the global window
    assert!(ds0.statements().iter().all(|sql| sql.ends_with("LIMIT 0, 5")));

    // min(N, total - M) rows
    let mut result = connection
        .execute_query(
            "SELECT order_id FROM t_order ORDER BY order_id LIMIT ? OFFSET ?",
            &ints(&[3, 6]),
        )
        .unwrap();
    assert_eq!(order_ids(&result.rows().unwrap()), vec![8, 9]);
    assert!(ds1.calls().contains(&"params:[Integer(9), Integer(0)]".to_string()));
}

#[test]
fn test_avg_is_rederived_from_sum_and_count() {
    let labels = &["avg_amount", "AVG_DERIVED_COUNT_0", "AVG_DERIVED_SUM_0"];
    let avg_row = |avg: f64, count: i64, sum: i64| vec![Value::Float(avg), Value::Integer(count), Value::Integer(sum)];
    let ds0 = ScriptedDataSource::new("ds0")
        .with_rows("t_order0", labels, vec![avg_row(20.0, 2, 40)])
        .with_rows("t_order1", labels, vec![avg_row(35.0, 2, 70)]);
    let ds1 = ScriptedDataSource::new("ds1")
        .with_rows("t_order0", labels, vec![avg_row(50.0, 2, 100)])
        .with_rows("t_order1", labels, vec![avg_row(80.0, 3, 240)]);
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection
        .execute_query("SELECT AVG(amount) AS avg_amount FROM t_order", &[])
        .unwrap();
    assert_eq!(result.column_count(), 1);
    assert!(result.next().unwrap());
    // 450 / 9, not the mean of the shard averages
    assert_eq!(result.value_by_label("avg_amount").unwrap(), Value::Float(50.0));
    assert!(result.value(1).is_err());
    assert!(!result.next().unwrap());

    assert!(ds0.statements()[0].contains("COUNT(amount) AS AVG_DERIVED_COUNT_0, SUM(amount) AS AVG_DERIVED_SUM_0"));
}

#[test]
fn test_group_by_across_shards_end_to_end() {
    let labels = &["COUNT(*)", "GROUP_BY_DERIVED_0"];
    let ds0 = ScriptedDataSource::new("ds0")
        .with_rows("t_order0", labels, vec![ints(&[2, 0]), ints(&[1, 2])])
        .with_rows("t_order1", labels, vec![ints(&[3, 0])]);
    let ds1 = ScriptedDataSource::new("ds1")
        .with_rows("t_order0", labels, vec![ints(&[4, 1])])
        .with_rows("t_order1", labels, vec![ints(&[5, 3])]);
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection
        .execute_query("SELECT COUNT(*) FROM t_order GROUP BY user_id LIMIT 1, 1", &[])
        .unwrap();
    assert_eq!(result.column_count(), 1);
    // groups 0..=3 count 5, 4, 1, 5; the offset skips user 0
    assert_eq!(result.rows().unwrap(), vec![ints(&[4])]);

    // shards return every group so the global window is cut after merging
    assert_eq!(
        ds0.statements(),
        vec![
            "SELECT COUNT(*), user_id AS GROUP_BY_DERIVED_0 FROM t_order0 GROUP BY user_id LIMIT 0, 9223372036854775807",
            "SELECT COUNT(*), user_id AS GROUP_BY_DERIVED_0 FROM t_order1 GROUP BY user_id LIMIT 0, 9223372036854775807",
        ]
    );
    assert_eq!(ds1.statements().len(), 2);
}

#[test]
fn test_having_across_shards_is_rejected() {
    let labels = &["user_id", "COUNT(*)"];
    let ds0 = ScriptedDataSource::new("ds0");
    let ds1 = ScriptedDataSource::new("ds1")
        .with_rows("t_order0", labels, vec![ints(&[7, 3])])
        .with_rows("t_order1", labels, vec![ints(&[7, 2])]);
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let sql = "SELECT user_id, COUNT(*) FROM t_order WHERE user_id = 7 GROUP BY user_id HAVING COUNT(*) > 2";
    assert!(matches!(
        connection.execute_query(sql, &[]),
        Err(DbError::OperationNotSupported(_))
    ));
    assert!(ds1.statements().is_empty());

    // one shard evaluates HAVING over complete groups
    let sql = "SELECT user_id, COUNT(*) FROM t_order WHERE user_id = 7 AND order_id = 4 GROUP BY user_id HAVING COUNT(*) > 2";
    let mut result = connection.execute_query(sql, &[]).unwrap();
    assert_eq!(result.rows().unwrap(), vec![ints(&[7, 3])]);
    assert_eq!(ds1.statements(), vec![sql.replace("FROM t_order ", "FROM t_order0 ")]);
}

#[test]
fn test_distinct_aggregation_across_shards_is_rejected() {
    let ds0 = ScriptedDataSource::new("ds0")
        .with_rows("t_order0", &["COUNT(DISTINCT user_id)"], vec![ints(&[1])]);
    let ds1 = ScriptedDataSource::new("ds1");
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    // both tables of ds0 would each count user 0 once
    assert!(matches!(
        connection.execute_query("SELECT COUNT(DISTINCT user_id) FROM t_order WHERE user_id = 0", &[]),
        Err(DbError::OperationNotSupported(_))
    ));
    assert!(ds0.statements().is_empty());

    let mut result = connection
        .execute_query(
            "SELECT COUNT(DISTINCT user_id) FROM t_order WHERE user_id = 0 AND order_id = 2",
            &[],
        )
        .unwrap();
    assert_eq!(result.rows().unwrap(), vec![ints(&[1])]);
    assert_eq!(
        ds0.statements(),
        vec!["SELECT COUNT(DISTINCT user_id) FROM t_order0 WHERE user_id = 0 AND order_id = 2"]
    );
}

#[test]
fn test_limit_two_over_two_databases() {
    let config = ShardingConfig::from_toml_str(
        r#"
        [[tables]]
        logic_table = "t_order"
        actual_data_nodes = "ds${0..1}.t_order"
        database_strategy = { type = "inline", sharding_column = "id", algorithm_expression = "ds${id % 2}" }
        "#,
    )
    .unwrap();
    let labels = &["id", "status"];
    let row = |id: i64| vec![Value::Integer(id), Value::from("ok")];
    let ds0 = ScriptedDataSource::new("ds0").with_rows("t_order", labels, vec![row(2), row(4), row(6)]);
    let ds1 = ScriptedDataSource::new("ds1").with_rows("t_order", labels, vec![row(1), row(3), row(5)]);
    let runtime = runtime(&config, &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let sql = "SELECT * FROM t_order ORDER BY id LIMIT 2";
    let mut result = connection.execute_query(sql, &[]).unwrap();
    assert_eq!(result.rows().unwrap(), vec![row(1), row(2)]);
    assert_eq!(ds0.statements(), vec![sql]);
    assert_eq!(ds1.statements(), vec![sql]);
}

#[test]
fn test_connection_strict_when_units_exceed_connection_limit() {
    let (ds0, ds1) = order_sources();
    let mut config = order_config();
    config.props.max_connections_size_per_query = 1;
    let runtime = runtime(&config, &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let mut result = connection
        .execute_query("SELECT order_id FROM t_order ORDER BY order_id", &[])
        .unwrap();
    assert_eq!(order_ids(&result.rows().unwrap()), vec![1, 2, 3, 4, 5, 6, 8, 9]);
    assert_eq!(ds0.opened(), 1);
    assert_eq!(ds1.opened(), 1);
    assert_eq!(connection.cached_connection_count(), 2);
}

#[test]
fn test_memory_strict_opens_connection_per_unit() {
    let (ds0, ds1) = order_sources();
    let mut config = order_config();
    config.props.max_connections_size_per_query = 4;
    let runtime = runtime(&config, &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    connection.execute_query("SELECT * FROM t_order", &[]).unwrap();
    assert_eq!(ds0.opened(), 2);
    // cached connections are reused by the next statement
    connection.execute_query("SELECT * FROM t_order", &[]).unwrap();
    assert_eq!(ds0.opened(), 2);
}

#[test]
fn test_disabled_data_source_fails_routing() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    runtime.registry().disable("ds1");
    let mut connection = runtime.connect();

    let error = connection
        .execute_query("SELECT * FROM t_order WHERE user_id = 1", &[])
        .unwrap_err();
    assert!(matches!(error, DbError::DataSourceDisabled(ref name) if name == "ds1"));

    connection
        .execute_query("SELECT * FROM t_order WHERE user_id = 2", &[])
        .unwrap();
    assert!(ds1.calls().is_empty());
}

#[test]
fn test_reads_follow_master_after_write() {
    let config = ShardingConfig::from_toml_str(
        r#"
        default_data_source = "ms_ds"

        [[master_slave]]
        name = "ms_ds"
        master = "master0"
        slaves = ["slave0"]
        "#,
    )
    .unwrap();
    let master = ScriptedDataSource::new("master0").with_rows("t_user", &["id"], vec![ints(&[1])]);
    let slave = ScriptedDataSource::new("slave0").with_rows("t_user", &["id"], vec![ints(&[1])]);
    let runtime = runtime(&config, &[&master, &slave]);
    let mut connection = runtime.connect();

    connection.execute_query("SELECT id FROM t_user", &[]).unwrap();
    assert_eq!(slave.statements().len(), 1);

    assert_eq!(
        connection.execute_update("UPDATE t_user SET name = 'x' WHERE id = 1", &[]).unwrap(),
        1
    );
    connection.execute_query("SELECT id FROM t_user", &[]).unwrap();
    assert_eq!(master.statements().len(), 2);
    assert_eq!(slave.statements().len(), 1);

    // closing clears the flag
    connection.close().unwrap();
    let mut connection = runtime.connect();
    connection.set_force_master(true);
    connection.execute_query("SELECT id FROM t_user", &[]).unwrap();
    assert_eq!(master.statements().len(), 3);
}

#[test]
fn test_execute_query_rejects_updates() {
    let (ds0, ds1) = order_sources();
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    let error = connection
        .execute_query("DELETE FROM t_order WHERE user_id = 1", &[])
        .unwrap_err();
    assert!(matches!(error, DbError::OperationNotSupported(_)));
    assert!(ds1.calls().is_empty());
}

#[test]
fn test_failure_is_attributed_to_data_source() {
    let (ds0, ds1) = order_sources();
    ds1.fail_on("t_order1");
    let runtime = runtime(&order_config(), &[&ds0, &ds1]);
    let mut connection = runtime.connect();

    match connection.execute_query("SELECT * FROM t_order", &[]) {
        Err(DbError::Execution { data_source, .. }) => assert_eq!(data_source, "ds1"),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("expected failure"),
    }

    connection.set_exception_policy(shardmesh::ExceptionPolicy::Swallow);
    let mut result = connection.execute_query("SELECT * FROM t_order", &[]).unwrap();
    assert!(result.rows().unwrap().is_empty());
}
