//! Integration tests for statement interception.
//!
//! Tests verify that:
//! - Statements reach the wrapped pool in their resolved form
//! - Dual-write runs before the primary statement and never fails the call
//! - Resolver failures stop execute/query_rows before the pool is touched
//! - Single-row queries fall back to the original statement
//! - The last resolved statement is recorded on the shared context

mod common;

use common::{Call, RecordingPool, RecordingSink, init_tracing, orders_resolver};
use shard_pool::models::QueryParam;
use shard_pool::{
    ConnPool, DbError, DbResult, PoolHandle, Resolution, ShardConfig, Sharding, ShardingConfig,
    ShardingConnPool,
};
use std::sync::Arc;

fn config(dual_write: bool) -> ShardingConfig {
    ShardingConfig::new().with_table("orders", ShardConfig::new("user_id").with_dual_write(dual_write))
}

fn setup(dual_write: bool) -> (ShardingConnPool, Arc<RecordingPool>, Arc<RecordingSink>) {
    init_tracing();
    let pool = RecordingPool::new();
    let sink = RecordingSink::new();
    let sharding = Arc::new(Sharding::new(config(dual_write), orders_resolver).with_sink(sink.clone()));
    let adapter = sharding.wrap(PoolHandle::pool(pool.clone()));
    (adapter, pool, sink)
}

fn params() -> Vec<QueryParam> {
    vec![QueryParam::Int(1), QueryParam::Int(3), QueryParam::from("paid")]
}

#[tokio::test]
async fn test_insert_routed_to_shard_table() {
    let (adapter, pool, sink) = setup(false);

    let result = adapter
        .execute("INSERT INTO orders (id, user_id, status) VALUES (?, ?, ?)", &params())
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert_eq!(
        pool.calls(),
        vec![Call::Execute(
            "INSERT INTO orders_03 (id, user_id, status) VALUES (?, ?, ?)".to_string()
        )]
    );

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].sql,
        "INSERT INTO orders_03 (id, user_id, status) VALUES (1, 3, 'paid')"
    );
    assert_eq!(events[0].rows, 1);
    assert_eq!(events[0].error, None);
}

#[tokio::test]
async fn test_unsharded_statement_passes_through() {
    let (adapter, pool, sink) = setup(true);

    adapter
        .execute("UPDATE users SET name = ? WHERE id = ?", &["a".into(), 1.into()])
        .await
        .unwrap();
    let rows = adapter
        .query_rows("SELECT * FROM users", &[])
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        pool.statements(),
        vec![
            "UPDATE users SET name = ? WHERE id = ?".to_string(),
            "SELECT * FROM users".to_string(),
        ]
    );
    assert_eq!(sink.events().len(), 2);
}

#[tokio::test]
async fn test_dual_write_runs_first() {
    let (adapter, pool, sink) = setup(true);

    adapter
        .execute("DELETE FROM orders WHERE user_id = ?", &[3.into()])
        .await
        .unwrap();

    assert_eq!(
        pool.calls(),
        vec![
            Call::Execute("DELETE FROM orders WHERE user_id = ?".to_string()),
            Call::Execute("DELETE FROM orders_03 WHERE user_id = ?".to_string()),
        ]
    );

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sql, "DELETE FROM orders WHERE user_id = 3");
    assert_eq!(events[1].sql, "DELETE FROM orders_03 WHERE user_id = 3");
}

#[tokio::test]
async fn test_dual_write_failure_not_surfaced() {
    let (adapter, pool, sink) = setup(true);
    pool.fail_on("FROM orders WHERE");

    let result = adapter
        .execute("DELETE FROM orders WHERE user_id = ?", &[3.into()])
        .await;

    assert!(result.is_ok());
    assert_eq!(pool.calls().len(), 2);

    // The discarded error still reaches the sink
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].error.is_some());
    assert_eq!(events[0].rows, 0);
    assert_eq!(events[1].error, None);
}

#[tokio::test]
async fn test_dual_write_not_used_for_reads() {
    let (adapter, pool, sink) = setup(true);

    adapter
        .query_rows("SELECT * FROM orders WHERE user_id = ?", &[3.into()])
        .await
        .unwrap();

    assert_eq!(
        pool.calls(),
        vec![Call::QueryRows("SELECT * FROM orders_03 WHERE user_id = ?".to_string())]
    );
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rows, 0);
}

#[tokio::test]
async fn test_primary_error_returned_verbatim() {
    let (adapter, pool, sink) = setup(false);
    pool.fail_on("orders_03");

    let err = adapter
        .execute("INSERT INTO orders (user_id) VALUES (?)", &[3.into()])
        .await
        .unwrap_err();

    match err {
        DbError::Database { sql_state, .. } => assert_eq!(sql_state.as_deref(), Some("42S02")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(sink.events().len(), 1);
    assert!(sink.events()[0].error.is_some());

    let err = adapter
        .query_rows("SELECT * FROM orders", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
}

#[tokio::test]
async fn test_resolver_error_skips_pool() {
    let (adapter, pool, sink) = setup(true);

    let err = adapter
        .execute("DELETE FROM orders UNRESOLVABLE", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Resolution { .. }));

    let err = adapter
        .query_rows("SELECT UNRESOLVABLE FROM orders", &[])
        .await
        .unwrap_err();
    assert!(err.is_resolution());

    assert_eq!(pool.total_calls(), 0);
    assert!(sink.events().is_empty());
    assert_eq!(adapter.sharding().last_query(), None);
}

#[tokio::test]
async fn test_query_row_falls_back_to_original_statement() {
    let (adapter, pool, sink) = setup(false);

    let row = adapter
        .query_row("SELECT UNRESOLVABLE FROM orders WHERE id = ?", &[1.into()])
        .await;

    assert_eq!(
        row.into_result().unwrap()["sql"],
        "SELECT UNRESOLVABLE FROM orders WHERE id = ?"
    );
    assert_eq!(
        pool.calls(),
        vec![Call::QueryRow("SELECT UNRESOLVABLE FROM orders WHERE id = ?".to_string())]
    );
    assert_eq!(
        adapter.sharding().last_query().as_deref(),
        Some("SELECT UNRESOLVABLE FROM orders WHERE id = ?")
    );
    // Single-row queries are not traced
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_query_row_resolved() {
    let (adapter, pool, _sink) = setup(false);

    let row = adapter
        .query_row("SELECT * FROM orders WHERE user_id = ?", &[3.into()])
        .await;

    assert!(row.error().is_none());
    assert_eq!(pool.statements(), vec!["SELECT * FROM orders_03 WHERE user_id = ?".to_string()]);
}

#[tokio::test]
async fn test_last_query_tracks_final_statement() {
    let (adapter, _pool, _sink) = setup(true);

    adapter
        .execute("INSERT INTO orders (user_id) VALUES (?)", &[3.into()])
        .await
        .unwrap();
    assert_eq!(
        adapter.sharding().last_query().as_deref(),
        Some("INSERT INTO orders_03 (user_id) VALUES (?)")
    );

    adapter.query_rows("SELECT 1", &[]).await.unwrap();
    assert_eq!(adapter.sharding().last_query().as_deref(), Some("SELECT 1"));
}

#[tokio::test]
async fn test_register_shared_between_adapters() {
    init_tracing();
    let sharding = Arc::new(Sharding::new(config(false), orders_resolver));
    let first = sharding.wrap(PoolHandle::pool(RecordingPool::new()));
    let second = sharding.wrap(PoolHandle::pool(RecordingPool::new()));

    first.query_rows("SELECT * FROM orders", &[]).await.unwrap();
    second.query_rows("SELECT * FROM users", &[]).await.unwrap();

    assert_eq!(sharding.last_query().as_deref(), Some("SELECT * FROM users"));
}

#[tokio::test]
async fn test_prepare_forwards_original_statement() {
    let (adapter, pool, sink) = setup(false);

    let stmt = adapter
        .prepare("SELECT * FROM orders WHERE user_id = ?")
        .await
        .unwrap();

    assert_eq!(stmt.sql, "SELECT * FROM orders WHERE user_id = ?");
    assert_eq!(
        pool.calls(),
        vec![Call::Prepare("SELECT * FROM orders WHERE user_id = ?".to_string())]
    );
    assert_eq!(adapter.sharding().last_query(), None);
    assert!(sink.events().is_empty());

    pool.fail_on("broken");
    assert!(adapter.prepare("SELECT broken").await.is_err());
}

#[tokio::test]
async fn test_default_log_sink() {
    init_tracing();
    let pool = RecordingPool::new();
    let sharding = Arc::new(Sharding::new(config(true), orders_resolver));
    let adapter = sharding.wrap(PoolHandle::pool(pool.clone()));
    pool.fail_on("FROM orders WHERE");

    adapter
        .execute("DELETE FROM orders WHERE user_id = ?", &[3.into()])
        .await
        .unwrap();
    assert_eq!(pool.calls().len(), 2);
}

#[tokio::test]
async fn test_concurrent_statements() {
    let (adapter, pool, sink) = setup(false);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .execute("UPDATE orders SET n = ? WHERE user_id = 3", &[QueryParam::Int(i)])
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(pool.calls().len(), 8);
    assert_eq!(sink.events().len(), 8);
    assert_eq!(
        adapter.sharding().last_query().as_deref(),
        Some("UPDATE orders_03 SET n = ? WHERE user_id = 3")
    );
}

#[tokio::test]
async fn test_closure_resolver_sees_params() {
    init_tracing();
    let pool = RecordingPool::new();
    let sharding = Arc::new(Sharding::new(
        ShardingConfig::new(),
        |sql: &str, params: &[QueryParam]| -> DbResult<Resolution> {
            Ok(Resolution::unsharded(format!("{sql} /* {} */", params.len())))
        },
    ));
    let adapter = sharding.wrap(PoolHandle::pool(pool.clone()));

    adapter.execute("SELECT ?", &[1.into(), 2.into()]).await.unwrap();
    assert_eq!(pool.statements(), vec!["SELECT ? /* 2 */".to_string()]);
}
