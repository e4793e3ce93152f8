//! The sharding pool adapter.
//!
//! [`ShardingConnPool`] implements the same capability set as the pool it
//! wraps. Statements are resolved before they reach the pool; transaction
//! boundaries are forwarded or absorbed depending on what was wrapped.

use super::Sharding;
use crate::db::{ConnPool, PoolHandle, TxBeginner, TxCommitter};
use crate::error::DbResult;
use crate::models::{ExecResult, PreparedStatement, QueryParam, Rows, SingleRow, TxOptions};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Diagnostic identity of every adapter.
pub const CONN_POOL_NAME: &str = "sharding:conn_pool";

/// How commit and rollback are handled, fixed when the adapter is built.
#[derive(Clone)]
enum TxBoundary {
    /// Wrapping a raw transaction; its owner commits.
    Owned,
    Delegate(Arc<dyn TxCommitter>),
    /// Nothing to end.
    Detached,
}

/// Pool adapter that routes statements to shard tables.
#[derive(Clone)]
pub struct ShardingConnPool {
    sharding: Arc<Sharding>,
    inner: Arc<dyn ConnPool>,
    beginner: Option<Arc<dyn TxBeginner>>,
    boundary: TxBoundary,
}

impl ShardingConnPool {
    pub fn new(sharding: Arc<Sharding>, handle: PoolHandle) -> Self {
        let boundary = if handle.is_raw_transaction() {
            TxBoundary::Owned
        } else if let Some(committer) = handle.committer_capability() {
            TxBoundary::Delegate(Arc::clone(committer))
        } else {
            TxBoundary::Detached
        };

        Self {
            beginner: handle.beginner_capability().cloned(),
            inner: Arc::clone(handle.conn()),
            sharding,
            boundary,
        }
    }

    pub fn sharding(&self) -> &Arc<Sharding> {
        &self.sharding
    }

    /// Use this adapter wherever a pool or a transaction handle is expected.
    pub fn into_handle(self) -> PoolHandle {
        PoolHandle::transactional(Arc::new(self))
    }
}

impl fmt::Display for ShardingConnPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(CONN_POOL_NAME)
    }
}

impl fmt::Debug for ShardingConnPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let boundary = match self.boundary {
            TxBoundary::Owned => "owned",
            TxBoundary::Delegate(_) => "delegate",
            TxBoundary::Detached => "detached",
        };
        f.debug_struct("ShardingConnPool")
            .field("can_begin", &self.beginner.is_some())
            .field("boundary", &boundary)
            .finish()
    }
}

#[async_trait]
impl ConnPool for ShardingConnPool {
    /// Prepared statements are not resolved; the text is forwarded unchanged.
    async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
        self.inner.prepare(sql).await
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let begin = Instant::now();
        let resolution = self.sharding.resolve(sql, params)?;
        self.sharding.record_query(&resolution.sql);

        if let Some(table) = &resolution.table {
            if self.sharding.dual_write_enabled(table) {
                let dual = self.inner.execute(&resolution.dual_write_sql, params).await;
                let rows = dual.as_ref().map_or(0, |r| r.rows_affected);
                if let Err(err) = &dual {
                    warn!(table = %table, error = %err, "Dual write failed");
                }
                self.sharding.sink().trace(
                    begin,
                    &|| (self.sharding.explain(&resolution.dual_write_sql, params), rows),
                    dual.as_ref().err(),
                );
            }
        }

        let result = self.inner.execute(&resolution.sql, params).await;
        let rows = result.as_ref().map_or(0, |r| r.rows_affected);
        self.sharding.sink().trace(
            begin,
            &|| (self.sharding.explain(&resolution.sql, params), rows),
            result.as_ref().err(),
        );
        result
    }

    async fn query_rows(&self, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        let begin = Instant::now();
        let resolution = self.sharding.resolve(sql, params)?;
        self.sharding.record_query(&resolution.sql);

        let result = self.inner.query_rows(&resolution.sql, params).await;
        self.sharding.sink().trace(
            begin,
            &|| (self.sharding.explain(&resolution.sql, params), 0),
            result.as_ref().err(),
        );
        result
    }

    /// Resolution is best effort: on failure the original text is sent.
    async fn query_row(&self, sql: &str, params: &[QueryParam]) -> SingleRow {
        let sql = match self.sharding.resolve(sql, params) {
            Ok(resolution) => resolution.sql,
            Err(err) => {
                debug!(sql = %sql, error = %err, "Resolution failed, using original statement");
                sql.to_string()
            }
        };
        self.sharding.record_query(&sql);
        self.inner.query_row(&sql, params).await
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TxBeginner for ShardingConnPool {
    async fn begin(&self, options: &TxOptions) -> DbResult<PoolHandle> {
        match &self.beginner {
            Some(beginner) => beginner.begin(options).await,
            None => Ok(self.clone().into_handle()),
        }
    }
}

#[async_trait]
impl TxCommitter for ShardingConnPool {
    async fn commit(&self) -> DbResult<()> {
        match &self.boundary {
            TxBoundary::Delegate(committer) => committer.commit().await,
            TxBoundary::Owned | TxBoundary::Detached => Ok(()),
        }
    }

    async fn rollback(&self) -> DbResult<()> {
        match &self.boundary {
            TxBoundary::Delegate(committer) => committer.rollback().await,
            TxBoundary::Owned | TxBoundary::Detached => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardingConfig;
    use crate::error::DbError;
    use crate::sharding::Resolution;

    struct EchoPool;

    #[async_trait]
    impl ConnPool for EchoPool {
        async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
            Ok(PreparedStatement {
                sql: sql.to_string(),
                columns: Vec::new(),
            })
        }

        async fn execute(&self, _sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
            Ok(ExecResult::new(params.len() as u64))
        }

        async fn query_rows(&self, _sql: &str, _params: &[QueryParam]) -> DbResult<Rows> {
            Ok(Rows::default())
        }

        async fn query_row(&self, _sql: &str, _params: &[QueryParam]) -> SingleRow {
            SingleRow::new(Ok(None))
        }

        async fn ping(&self) -> DbResult<()> {
            Err(DbError::connection("down", "restart it"))
        }
    }

    fn adapter() -> ShardingConnPool {
        let sharding = Arc::new(Sharding::new(
            ShardingConfig::new(),
            |sql: &str, _: &[QueryParam]| -> DbResult<Resolution> {
                Ok(Resolution::unsharded(sql.replace("orders", "orders_01")))
            },
        ));
        sharding.wrap(PoolHandle::pool(Arc::new(EchoPool)))
    }

    #[test]
    fn test_identity() {
        assert_eq!(adapter().to_string(), "sharding:conn_pool");
    }

    #[tokio::test]
    async fn test_prepare_is_not_resolved() {
        let stmt = adapter().prepare("SELECT * FROM orders").await.unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM orders");
    }

    #[tokio::test]
    async fn test_execute_returns_inner_result() {
        let pool = adapter();
        let result = pool
            .execute("DELETE FROM orders WHERE id = ?", &[QueryParam::Int(1)])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(
            pool.sharding().last_query().as_deref(),
            Some("DELETE FROM orders_01 WHERE id = ?")
        );
    }

    #[tokio::test]
    async fn test_ping_ignores_inner_pool() {
        assert!(adapter().ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_bare_pool_begin_returns_self() {
        let pool = adapter();
        let handle = pool.begin(&TxOptions::default()).await.unwrap();
        assert!(handle.can_begin());
        assert!(handle.can_commit());
        assert!(!handle.is_raw_transaction());
        handle.commit().await.unwrap();
        handle.rollback().await.unwrap();
    }
}
