//! Database dispatch macros for reducing code duplication.
//!
//! Both the pool and the transaction wrapper hold one of three sqlx backends. The
//! macro below expands a single body into one match arm per backend, binding the
//! backend value and the matching parameter binder under caller-chosen names.

/// Generate one match arm per backend for an enum with `MySql`, `Postgres`
/// and `SQLite` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, self, |pool, bind| {
///     bind(sqlx::query(sql), params).execute(pool).await
/// })
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, |$p:ident, $bind:ident| $body:expr) => {
        match $value {
            $enum::MySql($p) => {
                let $bind = $crate::db::params::bind_mysql_params;
                $body
            }
            $enum::Postgres($p) => {
                let $bind = $crate::db::params::bind_postgres_params;
                $body
            }
            $enum::SQLite($p) => {
                let $bind = $crate::db::params::bind_sqlite_params;
                $body
            }
        }
    };
    ($enum:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $enum::MySql($p) => $body,
            $enum::Postgres($p) => $body,
            $enum::SQLite($p) => $body,
        }
    };
}

pub use impl_db_dispatch;
