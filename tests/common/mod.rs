//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use shard_pool::models::{
    ExecResult, PreparedStatement, QueryParam, RowMap, Rows, SingleRow, TxOptions,
};
use shard_pool::{
    ConnPool, DbError, DbResult, PoolHandle, Resolution, TraceSink, TxBeginner, TxCommitter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a test subscriber honouring `RUST_LOG`. Set `TEST_JSON_LOGS` for JSON output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let _ = if std::env::var_os("TEST_JSON_LOGS").is_some() {
        registry.with(fmt::layer().json().with_test_writer()).try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_test_writer())
            .try_init()
    };
}

/// One call received by a [`RecordingPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Prepare(String),
    Execute(String),
    QueryRows(String),
    QueryRow(String),
    Ping,
}

impl Call {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Call::Prepare(sql) | Call::Execute(sql) | Call::QueryRows(sql) | Call::QueryRow(sql) => {
                Some(sql)
            }
            Call::Ping => None,
        }
    }
}

/// Pool double that records every call and fails on request.
#[derive(Default)]
pub struct RecordingPool {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<Vec<String>>,
    transaction: Option<Arc<RecordingPool>>,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl RecordingPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A pool whose `begin` hands out `transaction` as a raw transaction.
    pub fn with_transaction(transaction: Arc<RecordingPool>) -> Arc<Self> {
        Arc::new(Self {
            transaction: Some(transaction),
            ..Self::default()
        })
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.sql().map(str::to_string))
            .collect()
    }

    /// Calls of any kind, transaction boundaries included.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len() + self.begins() + self.commits() + self.rollbacks()
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) -> DbResult<()> {
        let sql = call.sql().map(str::to_string);
        self.calls.lock().unwrap().push(call);
        match sql {
            Some(sql) if self.failing.lock().unwrap().iter().any(|f| sql.contains(f)) => {
                Err(DbError::database(
                    format!("Table '{sql}' doesn't exist"),
                    Some("42S02".to_string()),
                    "Check the table name",
                ))
            }
            _ => Ok(()),
        }
    }
}

fn echo_row(sql: &str) -> RowMap {
    let mut row = RowMap::new();
    row.insert("sql".to_string(), json!(sql));
    row
}

#[async_trait]
impl ConnPool for RecordingPool {
    async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
        self.record(Call::Prepare(sql.to_string()))?;
        Ok(PreparedStatement {
            sql: sql.to_string(),
            columns: vec!["sql".to_string()],
        })
    }

    async fn execute(&self, sql: &str, _params: &[QueryParam]) -> DbResult<ExecResult> {
        self.record(Call::Execute(sql.to_string()))?;
        Ok(ExecResult::new(1))
    }

    async fn query_rows(&self, sql: &str, _params: &[QueryParam]) -> DbResult<Rows> {
        self.record(Call::QueryRows(sql.to_string()))?;
        Ok(Rows::from_maps(vec!["sql".to_string()], vec![echo_row(sql)]))
    }

    async fn query_row(&self, sql: &str, _params: &[QueryParam]) -> SingleRow {
        match self.record(Call::QueryRow(sql.to_string())) {
            Ok(()) => SingleRow::new(Ok(Some(echo_row(sql)))),
            Err(err) => SingleRow::from_error(err),
        }
    }

    async fn ping(&self) -> DbResult<()> {
        self.record(Call::Ping)
    }
}

#[async_trait]
impl TxBeginner for RecordingPool {
    async fn begin(&self, _options: &TxOptions) -> DbResult<PoolHandle> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        match &self.transaction {
            Some(tx) => Ok(PoolHandle::raw_transaction(Arc::clone(tx))),
            None => Err(DbError::transaction("begin not supported by this pool")),
        }
    }
}

#[async_trait]
impl TxCommitter for RecordingPool {
    async fn commit(&self) -> DbResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One event received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub sql: String,
    pub rows: u64,
    pub error: Option<String>,
}

/// Trace sink that renders and keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TraceSink for RecordingSink {
    fn trace(&self, begin: Instant, explain: &dyn Fn() -> (String, u64), error: Option<&DbError>) {
        assert!(begin <= Instant::now());
        let (sql, rows) = explain();
        self.events.lock().unwrap().push(TraceEvent {
            sql,
            rows,
            error: error.map(|e| e.to_string()),
        });
    }
}

/// Routes `orders` to `orders_03`; statements containing `UNRESOLVABLE` fail.
pub fn orders_resolver(sql: &str, _params: &[QueryParam]) -> DbResult<Resolution> {
    if sql.contains("UNRESOLVABLE") {
        return Err(DbError::resolution("cannot resolve statement"));
    }
    if sql.contains("orders") {
        return Ok(Resolution {
            dual_write_sql: sql.to_string(),
            sql: sql.replace("orders", "orders_03"),
            table: Some("orders".to_string()),
        });
    }
    Ok(Resolution::unsharded(sql))
}
