//! Sharding context and pool adapter.
//!
//! A [`Sharding`] holds everything adapters share: the per-table configuration,
//! the resolver, the trace sink and the last resolved statement. Wrap any
//! [`PoolHandle`] with [`Sharding::wrap`] to get a [`ShardingConnPool`] that
//! rewrites statements before they reach the pool.
//!
//! ```ignore
//! let config = ShardingConfig::new().with_table("orders", ShardConfig::new("user_id"));
//! let resolver = SqlResolver::from_config(DatabaseType::MySQL, &config, my_algorithm);
//! let sharding = Arc::new(Sharding::new(config, resolver));
//!
//! let pool = sharding.wrap(DbPool::connect(&db_config).await?.into_handle());
//! pool.execute("INSERT INTO orders (user_id, amount) VALUES (?, ?)", &params).await?;
//! ```

pub mod conn_pool;
pub mod explain;
pub mod resolver;
pub mod trace;

pub use conn_pool::{CONN_POOL_NAME, ShardingConnPool};
pub use explain::explain;
pub use resolver::{Resolution, Resolver, ShardAlgorithm, ShardKey, SqlResolver};
pub use trace::{LogSink, TraceSink};

use crate::config::ShardingConfig;
use crate::db::PoolHandle;
use crate::error::DbResult;
use crate::models::{DatabaseType, QueryParam};
use sqlparser::dialect::GenericDialect;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared sharding state for every adapter built from it.
pub struct Sharding {
    config: ShardingConfig,
    db_type: Option<DatabaseType>,
    last_query: RwLock<Option<String>>,
    resolver: Arc<dyn Resolver>,
    sink: Arc<dyn TraceSink>,
}

impl Sharding {
    /// Create a context logging traced statements through [`LogSink`].
    pub fn new(config: ShardingConfig, resolver: impl Resolver + 'static) -> Self {
        let sink = Arc::new(LogSink::from_config(&config));
        Self {
            config,
            db_type: resolver.db_type(),
            last_query: RwLock::new(None),
            resolver: Arc::new(resolver),
            sink,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Backend whose dialect is used to render traced statements.
    ///
    /// Defaults to the resolver's backend; closure resolvers have none and
    /// statements are then tokenized with a generic dialect.
    pub fn with_db_type(mut self, db_type: DatabaseType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    pub fn db_type(&self) -> Option<DatabaseType> {
        self.db_type
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    pub fn resolve(&self, sql: &str, params: &[QueryParam]) -> DbResult<Resolution> {
        self.resolver.resolve(sql, params)
    }

    /// The statement most recently sent by any adapter sharing this context.
    pub fn last_query(&self) -> Option<String> {
        self.last_query
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_query(&self, sql: &str) {
        let mut slot = self
            .last_query
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(sql.to_string());
    }

    pub fn explain(&self, sql: &str, params: &[QueryParam]) -> String {
        match self.db_type {
            Some(db_type) => explain(resolver::get_dialect(db_type).as_ref(), sql, params),
            None => explain(&GenericDialect {}, sql, params),
        }
    }

    pub fn dual_write_enabled(&self, table: &str) -> bool {
        self.config.table(table).is_some_and(|cfg| cfg.dual_write)
    }

    pub(crate) fn sink(&self) -> &dyn TraceSink {
        self.sink.as_ref()
    }

    /// Put an adapter in front of `handle`.
    pub fn wrap(self: &Arc<Self>, handle: PoolHandle) -> ShardingConnPool {
        ShardingConnPool::new(Arc::clone(self), handle)
    }
}

impl fmt::Debug for Sharding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sharding")
            .field("config", &self.config)
            .field("db_type", &self.db_type)
            .field("last_query", &self.last_query())
            .finish()
    }
}
