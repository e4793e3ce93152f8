//! Pool capability set.
//!
//! Every pool, transaction handle and adapter in this crate speaks [`ConnPool`].
//! Beginning and ending transactions are optional capabilities ([`TxBeginner`],
//! [`TxCommitter`]); a [`PoolHandle`] records which of them a pool offers so the
//! choice is made once, when the handle is built, rather than on every call.

use crate::error::DbResult;
use crate::models::{ExecResult, PreparedStatement, QueryParam, Rows, SingleRow, TxOptions};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Statement-execution entry points shared by pools and transaction handles.
#[async_trait]
pub trait ConnPool: Send + Sync {
    async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement>;

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult>;

    async fn query_rows(&self, sql: &str, params: &[QueryParam]) -> DbResult<Rows>;

    /// Errors are carried inside the returned [`SingleRow`].
    async fn query_row(&self, sql: &str, params: &[QueryParam]) -> SingleRow;

    async fn ping(&self) -> DbResult<()>;
}

/// Pools that can open a transaction.
#[async_trait]
pub trait TxBeginner: Send + Sync {
    async fn begin(&self, options: &TxOptions) -> DbResult<PoolHandle>;
}

/// Handles that can end a transaction.
#[async_trait]
pub trait TxCommitter: Send + Sync {
    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;
}

/// A pool together with the transaction capabilities it exposes.
#[derive(Clone)]
pub struct PoolHandle {
    conn: Arc<dyn ConnPool>,
    beginner: Option<Arc<dyn TxBeginner>>,
    committer: Option<Arc<dyn TxCommitter>>,
    raw_transaction: bool,
}

impl PoolHandle {
    /// A pool with no transaction capabilities.
    pub fn pool<P>(pool: Arc<P>) -> Self
    where
        P: ConnPool + 'static,
    {
        Self {
            conn: pool,
            beginner: None,
            committer: None,
            raw_transaction: false,
        }
    }

    /// A pool that can begin transactions.
    pub fn beginner<P>(pool: Arc<P>) -> Self
    where
        P: ConnPool + TxBeginner + 'static,
    {
        Self {
            conn: pool.clone(),
            beginner: Some(pool),
            committer: None,
            raw_transaction: false,
        }
    }

    /// A transaction-scoped pool whose commit and rollback may be delegated to.
    pub fn committer<P>(pool: Arc<P>) -> Self
    where
        P: ConnPool + TxCommitter + 'static,
    {
        Self {
            conn: pool.clone(),
            beginner: None,
            committer: Some(pool),
            raw_transaction: false,
        }
    }

    /// A live low-level transaction. Its owner ends it; wrappers must not.
    pub fn raw_transaction<P>(tx: Arc<P>) -> Self
    where
        P: ConnPool + TxCommitter + 'static,
    {
        Self {
            conn: tx.clone(),
            beginner: None,
            committer: Some(tx),
            raw_transaction: true,
        }
    }

    /// A pool offering every capability.
    pub fn transactional<P>(pool: Arc<P>) -> Self
    where
        P: ConnPool + TxBeginner + TxCommitter + 'static,
    {
        Self {
            conn: pool.clone(),
            beginner: Some(pool.clone()),
            committer: Some(pool),
            raw_transaction: false,
        }
    }

    pub fn conn(&self) -> &Arc<dyn ConnPool> {
        &self.conn
    }

    pub fn beginner_capability(&self) -> Option<&Arc<dyn TxBeginner>> {
        self.beginner.as_ref()
    }

    pub fn committer_capability(&self) -> Option<&Arc<dyn TxCommitter>> {
        self.committer.as_ref()
    }

    pub fn can_begin(&self) -> bool {
        self.beginner.is_some()
    }

    pub fn can_commit(&self) -> bool {
        self.committer.is_some()
    }

    pub fn is_raw_transaction(&self) -> bool {
        self.raw_transaction
    }

    /// Commit through the handle's own committer. No-op without one.
    pub async fn commit(&self) -> DbResult<()> {
        match &self.committer {
            Some(committer) => committer.commit().await,
            None => Ok(()),
        }
    }

    /// Roll back through the handle's own committer. No-op without one.
    pub async fn rollback(&self) -> DbResult<()> {
        match &self.committer {
            Some(committer) => committer.rollback().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("can_begin", &self.can_begin())
            .field("can_commit", &self.can_commit())
            .field("raw_transaction", &self.raw_transaction)
            .finish()
    }
}
