//! Typed errors for the store crate.

use repository::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from connecting, migrating and transaction control.
///
/// Statement failures surface as [`StoreError`] through the
/// [`Connection`](repository::Connection) implementation instead.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("transaction error: {0}")]
    Transaction(&'static str),
}

/// Extension trait for converting `sqlx::Error` into [`StoreError`].
///
/// Both types are foreign to this crate, so a `From` impl is not possible.
pub trait SqlxErrorExt {
    fn into_store_error(self, table: &str) -> StoreError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_store_error(self, table: &str) -> StoreError {
        if let sqlx::Error::Database(db) = &self {
            use sqlx::error::ErrorKind;
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) {
                return StoreError::Constraint {
                    table: table.to_string(),
                    message: db.message().to_string(),
                };
            }
            if is_missing_table(db.as_ref()) {
                return StoreError::UnknownTable(table.to_string());
            }
        }

        let unavailable = matches!(
            self,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
        );
        let decode = matches!(
            self,
            sqlx::Error::ColumnDecode { .. }
                | sqlx::Error::Decode(_)
                | sqlx::Error::ColumnNotFound(_)
                | sqlx::Error::TypeNotFound { .. }
        );

        if unavailable {
            StoreError::Unavailable(self.to_string())
        } else if decode {
            StoreError::Decode {
                table: table.to_string(),
                message: self.to_string(),
            }
        } else {
            StoreError::backend(self)
        }
    }
}

fn is_missing_table(db: &dyn sqlx::error::DatabaseError) -> bool {
    // 42P01: undefined_table
    db.code().as_deref() == Some("42P01") || db.message().starts_with("no such table")
}
