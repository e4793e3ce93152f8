//! Live database transactions.
//!
//! A [`DbTransaction`] owns one backend transaction until it is committed or
//! rolled back. Statements run on the transaction's connection; once the
//! transaction has ended every further call fails.

use crate::db::conn::{ConnPool, TxCommitter};
use crate::db::pool::to_rows;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecResult, PreparedStatement, QueryParam, Rows, SingleRow};
use async_trait::async_trait;
use sqlx::{Column, Connection, MySql, Postgres, Sqlite, Statement, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

/// Backend transaction held by a [`DbTransaction`].
pub enum TxConn {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl TxConn {
    fn db_type(&self) -> DatabaseType {
        match self {
            TxConn::MySql(_) => DatabaseType::MySQL,
            TxConn::Postgres(_) => DatabaseType::PostgreSQL,
            TxConn::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// A transaction handle. Dropping it without committing rolls back.
pub struct DbTransaction {
    db_type: DatabaseType,
    tx: Mutex<Option<TxConn>>,
}

impl DbTransaction {
    pub fn new(conn: TxConn) -> Self {
        Self {
            db_type: conn.db_type(),
            tx: Mutex::new(Some(conn)),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn take(&self) -> DbResult<TxConn> {
        self.tx.lock().await.take().ok_or_else(inactive)
    }
}

fn inactive() -> DbError {
    DbError::transaction("Transaction is no longer active")
}

#[async_trait]
impl ConnPool for DbTransaction {
    async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
        let mut guard = self.tx.lock().await;
        let conn = guard.as_mut().ok_or_else(inactive)?;
        let columns = impl_db_dispatch!(TxConn, conn, |tx| {
            let statement = sqlx::Executor::prepare(&mut **tx, sql).await?;
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        });
        Ok(PreparedStatement {
            sql: sql.to_string(),
            columns,
        })
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let mut guard = self.tx.lock().await;
        let conn = guard.as_mut().ok_or_else(inactive)?;
        debug!(sql = %sql, params = params.len(), "Executing statement in transaction");
        let result = impl_db_dispatch!(TxConn, conn, |tx, bind| {
            if params.is_empty() {
                sqlx::Executor::execute(&mut **tx, sql)
                    .await
                    .map(ExecResult::from)
            } else {
                bind(sqlx::query(sql), params)
                    .execute(&mut **tx)
                    .await
                    .map(ExecResult::from)
            }
        });
        result.map_err(DbError::from)
    }

    async fn query_rows(&self, sql: &str, params: &[QueryParam]) -> DbResult<Rows> {
        let mut guard = self.tx.lock().await;
        let conn = guard.as_mut().ok_or_else(inactive)?;
        let rows = impl_db_dispatch!(TxConn, conn, |tx, bind| {
            let fetched = bind(sqlx::query(sql), params)
                .fetch_all(&mut **tx)
                .await?;
            to_rows(&fetched)
        });
        Ok(rows)
    }

    async fn query_row(&self, sql: &str, params: &[QueryParam]) -> SingleRow {
        let mut guard = self.tx.lock().await;
        let Some(conn) = guard.as_mut() else {
            return SingleRow::from_error(inactive());
        };
        let row = impl_db_dispatch!(TxConn, conn, |tx, bind| {
            bind(sqlx::query(sql), params)
                .fetch_optional(&mut **tx)
                .await
                .map(|r| r.map(|r| r.to_json_map()))
        });
        SingleRow::new(row.map_err(DbError::from))
    }

    async fn ping(&self) -> DbResult<()> {
        let mut guard = self.tx.lock().await;
        let conn = guard.as_mut().ok_or_else(inactive)?;
        impl_db_dispatch!(TxConn, conn, |tx| {
            tx.ping().await?;
        });
        Ok(())
    }
}

#[async_trait]
impl TxCommitter for DbTransaction {
    async fn commit(&self) -> DbResult<()> {
        let conn = self.take().await?;
        impl_db_dispatch!(TxConn, conn, |tx| tx.commit().await)?;
        debug!(db_type = %self.db_type, "Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        let conn = self.take().await?;
        impl_db_dispatch!(TxConn, conn, |tx| tx.rollback().await)?;
        debug!(db_type = %self.db_type, "Transaction rolled back");
        Ok(())
    }
}
