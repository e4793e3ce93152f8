//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The pool capability set shared by pools, transactions and adapters
//! - sqlx-backed connection pools and transactions
//! - Parameter binding and row decoding
//! - Database dispatch macros for reducing code duplication

pub mod conn;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use conn::{ConnPool, PoolHandle, TxBeginner, TxCommitter};
pub use pool::DbPool;
pub use transaction::{DbTransaction, TxConn};
pub use types::RowToJson;
