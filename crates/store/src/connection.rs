//! The sqlx-backed [`Connection`].
//!
//! A handle either runs each statement on the pool or inside one open
//! transaction. Transaction handles are created with [`SqlConnection::begin`]
//! and passed to repository operations as their `trx` argument; whoever began
//! the transaction commits or rolls it back.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use repository::{
    Cardinality, Condition, Connection, ConnectionIdentity, Filter, Record, Relations, StoreError, TableSpec,
};

use crate::config::{DatabaseConfig, Dialect};
use crate::error::{DbError, SqlxErrorExt};
use crate::pool::{create_pool, DbPool};
use crate::row::{decode_row, decode_rows};
use crate::sql::{build_delete, build_insert, build_select, build_update, Param, Statement};

type SharedTx = Arc<Mutex<Option<Transaction<'static, Any>>>>;

#[derive(Clone)]
enum Handle {
    Pool(DbPool),
    Tx(SharedTx),
}

/// A pooled or transaction-scoped database handle.
#[derive(Clone)]
pub struct SqlConnection {
    identity: ConnectionIdentity,
    dialect: Dialect,
    handle: Handle,
}

impl SqlConnection {
    pub fn new(pool: DbPool, dialect: Dialect, identity: ConnectionIdentity) -> Self {
        Self {
            identity,
            dialect,
            handle: Handle::Pool(pool),
        }
    }

    /// Create a pool for `config` and wrap it.
    ///
    /// Every unnamed in-memory SQLite pool is its own database, so each gets a
    /// distinct identity (`:memory:#<n>`). An explicit `database` pins it.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let pool = create_pool(config).await?;
        let mut identity = config.identity();
        if config.is_sqlite_memory() && config.database.is_none() {
            static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);
            let n = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            identity.database = format!("{}#{n}", identity.database);
        }
        Ok(Self::new(pool, config.dialect()?, identity))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The pool, unless this handle is transaction-scoped.
    pub fn pool(&self) -> Option<&DbPool> {
        match &self.handle {
            Handle::Pool(pool) => Some(pool),
            Handle::Tx(_) => None,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.handle, Handle::Tx(_))
    }

    /// Open a transaction. The returned handle shares this one's identity.
    pub async fn begin(&self) -> Result<SqlConnection, DbError> {
        let Handle::Pool(pool) = &self.handle else {
            return Err(DbError::Transaction("nested transactions are not supported"));
        };
        let tx = pool.begin().await?;
        debug!(identity = %self.identity, "transaction started");
        Ok(Self {
            identity: self.identity.clone(),
            dialect: self.dialect,
            handle: Handle::Tx(Arc::new(Mutex::new(Some(tx)))),
        })
    }

    /// Commit the transaction. Every clone of this handle is closed afterwards.
    pub async fn commit(&self) -> Result<(), DbError> {
        let tx = self.take_tx().await?;
        tx.commit().await?;
        debug!(identity = %self.identity, "transaction committed");
        Ok(())
    }

    /// Roll the transaction back. Every clone of this handle is closed afterwards.
    pub async fn rollback(&self) -> Result<(), DbError> {
        let tx = self.take_tx().await?;
        tx.rollback().await?;
        debug!(identity = %self.identity, "transaction rolled back");
        Ok(())
    }

    async fn take_tx(&self) -> Result<Transaction<'static, Any>, DbError> {
        let Handle::Tx(shared) = &self.handle else {
            return Err(DbError::Transaction("not a transaction handle"));
        };
        shared
            .lock()
            .await
            .take()
            .ok_or(DbError::Transaction("transaction already closed"))
    }

    async fn fetch_all(&self, table: &TableSpec, stmt: Statement) -> Result<Vec<AnyRow>, StoreError> {
        debug!(table = table.table, sql = %stmt.sql, params = stmt.params.len(), "fetch");
        let Statement { sql, params } = stmt;
        let query = bind(sqlx::query(&sql), params);
        let result = match &self.handle {
            Handle::Pool(pool) => query.fetch_all(pool).await,
            Handle::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
                query.fetch_all(&mut **tx).await
            }
        };
        result.map_err(|err| err.into_store_error(table.table))
    }

    async fn execute(&self, table: &TableSpec, stmt: Statement) -> Result<u64, StoreError> {
        debug!(table = table.table, sql = %stmt.sql, params = stmt.params.len(), "execute");
        let Statement { sql, params } = stmt;
        let query = bind(sqlx::query(&sql), params);
        let result = match &self.handle {
            Handle::Pool(pool) => query.execute(pool).await,
            Handle::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
                query.execute(&mut **tx).await
            }
        };
        result
            .map(|done| done.rows_affected())
            .map_err(|err| err.into_store_error(table.table))
    }

    async fn select_rows(
        &self,
        table: &TableSpec,
        filter: &Filter,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, StoreError> {
        let stmt = build_select(self.dialect, table, filter, limit)?;
        let rows = self.fetch_all(table, stmt).await?;
        decode_rows(table, &rows)
    }

    /// Load each requested relation with one extra `IN` query and attach it.
    async fn attach_relations(
        &self,
        table: &TableSpec,
        rows: &mut [Record],
        relations: &Relations,
    ) -> Result<(), StoreError> {
        for name in relations.names() {
            let relation = table.relation(name).ok_or_else(|| StoreError::UnknownRelation {
                table: table.table.to_string(),
                relation: name.clone(),
            })?;
            let target = (relation.target)();

            let mut keys: Vec<Value> = Vec::new();
            for row in rows.iter() {
                match row.get(relation.local_column) {
                    Some(v) if !v.is_null() && !keys.contains(v) => keys.push(v.clone()),
                    _ => {}
                }
            }
            let related = if keys.is_empty() {
                Vec::new()
            } else {
                let mut filter = Filter::new();
                filter.push(Condition::In(relation.foreign_column.to_string(), keys));
                self.select_rows(&target, &filter, None).await?
            };

            for row in rows.iter_mut() {
                let local = row.get(relation.local_column).cloned().unwrap_or(Value::Null);
                let mut matches = related
                    .iter()
                    .filter(|r| !local.is_null() && r.get(relation.foreign_column) == Some(&local))
                    .cloned()
                    .map(Value::Object);
                let attached = match relation.cardinality {
                    Cardinality::Many => Value::Array(matches.collect()),
                    Cardinality::One => matches.next().unwrap_or(Value::Null),
                };
                row.insert(relation.name.to_string(), attached);
            }
        }
        Ok(())
    }
}

fn bind<'q>(mut query: Query<'q, Any, AnyArguments<'q>>, params: Vec<Param>) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            Param::Bool(b) => query.bind(b),
            Param::Int(i) => query.bind(i),
            Param::Float(f) => query.bind(f),
            Param::Text(s) => query.bind(s),
        };
    }
    query
}

#[async_trait]
impl Connection for SqlConnection {
    fn identity(&self) -> ConnectionIdentity {
        self.identity.clone()
    }

    async fn select(
        &self,
        table: &TableSpec,
        filter: &Filter,
        relations: &Relations,
        limit: Option<u64>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut rows = self.select_rows(table, filter, limit).await?;
        self.attach_relations(table, &mut rows, relations).await?;
        Ok(rows)
    }

    async fn insert(&self, table: &TableSpec, record: Record) -> Result<Record, StoreError> {
        let stmt = build_insert(self.dialect, table, &record)?;
        let rows = self.fetch_all(table, stmt).await?;
        match rows.first() {
            Some(row) => decode_row(table, row),
            None => Err(StoreError::Decode {
                table: table.table.to_string(),
                message: "insert returned no row".to_string(),
            }),
        }
    }

    async fn update(
        &self,
        table: &TableSpec,
        values: Record,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let stmt = build_update(self.dialect, table, &values, filter)?;
        self.execute(table, stmt).await
    }

    async fn delete(&self, table: &TableSpec, filter: &Filter) -> Result<u64, StoreError> {
        let stmt = build_delete(self.dialect, table, filter)?;
        self.execute(table, stmt).await
    }
}

impl fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConnection")
            .field("identity", &self.identity)
            .field("dialect", &self.dialect)
            .field("transaction", &self.is_transaction())
            .finish()
    }
}
