//! The `Connection` trait, implemented by every storage backend.

use std::fmt;

use async_trait::async_trait;

use crate::entity::TableSpec;
use crate::error::StoreError;
use crate::query::{Filter, Record, Relations};

/// Host and database a connection talks to.
///
/// Two handles with equal identities are interchangeable as far as repository
/// caching is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub host: String,
    pub database: String,
}

impl ConnectionIdentity {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.database)
    }
}

/// A handle to a database session or transaction.
///
/// Handles are cheap to clone and shared between repositories; the repository
/// only ever reads them to dispatch statements. Lifecycle (open, commit,
/// close) belongs to whoever created the handle.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    fn identity(&self) -> ConnectionIdentity;

    /// Rows of `table` matching `filter`, at most `limit` of them, with
    /// `relations` attached.
    async fn select(
        &self,
        table: &TableSpec,
        filter: &Filter,
        relations: &Relations,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Insert one row and return it as stored, generated key included.
    async fn insert(&self, table: &TableSpec, record: Record) -> Result<Record, StoreError>;

    /// Set the columns in `values` on every row matching `filter`.
    ///
    /// Returns the number of affected rows.
    async fn update(
        &self,
        table: &TableSpec,
        values: Record,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// Delete every row matching `filter`, returning the count.
    async fn delete(&self, table: &TableSpec, filter: &Filter) -> Result<u64, StoreError>;
}
