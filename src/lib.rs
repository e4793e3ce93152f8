//! Shard Pool Library
//!
//! This library provides a connection-pool adapter that rewrites SQL aimed at
//! logical tables so it runs against physical shard tables, with an sqlx-backed
//! pool (SQLite, PostgreSQL, MySQL) to put it in front of.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sharding;

pub use config::{DatabaseConfig, ShardConfig, ShardingConfig};
pub use db::{ConnPool, DbPool, PoolHandle, TxBeginner, TxCommitter};
pub use error::{DbError, DbResult};
pub use sharding::{
    LogSink, Resolution, Resolver, ShardAlgorithm, ShardKey, Sharding, ShardingConnPool,
    SqlResolver, TraceSink,
};
