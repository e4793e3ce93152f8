//! Data models for the sharding pool.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, IsolationLevel, TxOptions};
pub use query::{ExecResult, PreparedStatement, QueryParam, RowMap, Rows, SingleRow};
