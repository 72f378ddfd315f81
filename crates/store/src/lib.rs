//! `store` crate — sqlx-backed persistence for `repository`.
//!
//! Provides configuration loading, a connection pool, embedded migrations, a
//! SQL statement builder and [`SqlConnection`], the [`repository::Connection`]
//! implementation for SQLite and PostgreSQL.

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod sql;

mod row;

pub use config::{ConfigError, DatabaseConfig, Dialect};
pub use connection::SqlConnection;
pub use error::{DbError, SqlxErrorExt};
pub use pool::{create_pool, run_migrations, DbPool};
