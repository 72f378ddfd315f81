//! Entity-scoped CRUD facade over one connection.
//!
//! Every operation takes an optional connection override (`trx`), typically a
//! transaction-scoped handle; `None` uses the connection the repository was
//! built with. Inputs are borrowed and copied before anything is sent to the
//! backend, so callers' values are never modified.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::entity::{validate_descriptor, EntityKind};
use crate::error::{KeyValue, RepositoryError, ValidationError};
use crate::query::{Attributes, Condition, Filter, Query, Record, Relations, WhereIn};
use crate::schema::describe;

/// Data-access facade for entity kind `K` over connection `C`.
pub struct Repository<K: EntityKind, C: Connection> {
    connection: C,
    key_columns: Vec<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind, C: Connection> Repository<K, C> {
    /// Bind `connection` to entity kind `K`.
    ///
    /// # Errors
    /// [`RepositoryError::Configuration`] if `K` is not a well-formed entity
    /// kind (no key columns, undeclared key column, duplicate field, …).
    pub fn new(connection: C) -> Result<Self, RepositoryError> {
        validate_descriptor::<K>()?;

        let key_columns: Vec<String> = K::KEY_COLUMNS.iter().map(|c| c.to_string()).collect();
        info!(
            entity = K::NAME,
            connection = %connection.identity(),
            key = ?key_columns,
            "repository constructed"
        );

        Ok(Self {
            connection,
            key_columns,
            _kind: PhantomData,
        })
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn entity_name(&self) -> &'static str {
        K::NAME
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Statement builder on `trx` or the bound connection.
    pub fn query<'a>(&'a self, trx: Option<&'a C>) -> Query<'a, C> {
        K::query(trx.unwrap_or(&self.connection))
    }

    /// Create an entity from raw attributes without persisting it.
    pub fn from_json(&self, attrs: Option<&Attributes>) -> Result<Record, RepositoryError> {
        Ok(K::from_json(attrs)?)
    }

    /// Persist a new entity, returning it as stored (generated key included).
    ///
    /// `entity` may be a [`Record`] or any serializable struct.
    pub async fn create<T>(&self, entity: &T, trx: Option<&C>) -> Result<Record, RepositoryError>
    where
        T: Serialize + ?Sized,
    {
        let record = K::from_value(to_value::<K, _>(entity)?)?;
        let created = self.query(trx).insert(record).await?;
        debug!(entity = K::NAME, "entity created");
        Ok(created)
    }

    /// Incrementally update the entity identified by its key column(s).
    ///
    /// Only attributes present in `entity` are written; an explicit `null`
    /// clears the column. Returns the number of affected rows.
    ///
    /// # Errors
    /// - [`ValidationError::MissingKey`] if a key column is absent or null.
    /// - [`RepositoryError::NotFound`] if no row has that key.
    pub async fn update<T>(&self, entity: &T, trx: Option<&C>) -> Result<u64, RepositoryError>
    where
        T: Serialize + ?Sized,
    {
        let (affected, _) = self.patch(entity, trx).await?;
        Ok(affected)
    }

    /// [`update`](Self::update), then reload the row on the same connection.
    pub async fn update_and_fetch<T>(&self, entity: &T, trx: Option<&C>) -> Result<Record, RepositoryError>
    where
        T: Serialize + ?Sized,
    {
        let (_, key) = self.patch(entity, trx).await?;
        self.query(trx)
            .where_filter(self.key_filter(&key)?)
            .fetch_optional()
            .await?
            .ok_or(RepositoryError::NotFound(key))
    }

    async fn patch<T>(&self, entity: &T, trx: Option<&C>) -> Result<(u64, KeyValue), RepositoryError>
    where
        T: Serialize + ?Sized,
    {
        let mut values = match to_value::<K, _>(entity)? {
            Value::Object(values) => values,
            other => {
                return Err(ValidationError::NotAnObject { entity: K::NAME, found: describe(&other) }.into())
            }
        };
        K::validate_patch(&values)?;

        let key = self.extract_key(&values)?;
        for column in &self.key_columns {
            values.remove(column);
        }
        let filter = self.key_filter(&key)?;

        let affected = if values.is_empty() {
            // Nothing to set; report whether the row exists.
            self.query(trx).where_filter(filter).fetch_all().await?.len() as u64
        } else {
            self.query(trx).where_filter(filter).patch(values).await?
        };

        if affected == 0 {
            warn!(entity = K::NAME, key = %key, "update matched no row");
            return Err(RepositoryError::NotFound(key));
        }
        debug!(entity = K::NAME, key = %key, affected, "entity updated");
        Ok((affected, key))
    }

    /// Entities whose attributes equal `filter`; an empty filter matches all.
    pub async fn find(
        &self,
        filter: &Attributes,
        relations: impl Into<Relations>,
        trx: Option<&C>,
    ) -> Result<Vec<Record>, RepositoryError> {
        Ok(self
            .query(trx)
            .where_eq(filter)
            .with_relations(relations.into())
            .fetch_all()
            .await?)
    }

    /// Entities for which `NOT (a = x AND b = y …)` holds.
    pub async fn find_where_not(
        &self,
        filter: &Attributes,
        trx: Option<&C>,
    ) -> Result<Vec<Record>, RepositoryError> {
        Ok(self.query(trx).where_not(filter).fetch_all().await?)
    }

    /// Entities matching membership criteria.
    ///
    /// Accepts `("column", vec![…])` or an attribute mapping where arrays mean
    /// "any of" and scalars mean "equal to".
    pub async fn find_where_in(
        &self,
        criteria: impl Into<WhereIn>,
        relations: impl Into<Relations>,
        trx: Option<&C>,
    ) -> Result<Vec<Record>, RepositoryError> {
        Ok(self
            .query(trx)
            .where_filter(criteria.into().into_filter())
            .with_relations(relations.into())
            .fetch_all()
            .await?)
    }

    /// First entity matching `filter`, if any.
    pub async fn find_one(
        &self,
        filter: &Attributes,
        relations: impl Into<Relations>,
        trx: Option<&C>,
    ) -> Result<Option<Record>, RepositoryError> {
        Ok(self
            .query(trx)
            .where_eq(filter)
            .with_relations(relations.into())
            .fetch_optional()
            .await?)
    }

    pub async fn find_one_by_id(
        &self,
        key: impl Into<KeyValue>,
        relations: impl Into<Relations>,
        trx: Option<&C>,
    ) -> Result<Option<Record>, RepositoryError> {
        let filter = self.key_filter(&key.into())?;
        Ok(self
            .query(trx)
            .where_filter(filter)
            .with_relations(relations.into())
            .fetch_optional()
            .await?)
    }

    /// Delete every entity whose attributes equal `filter`.
    pub async fn delete_by(&self, filter: &Attributes, trx: Option<&C>) -> Result<u64, RepositoryError> {
        let deleted = self.query(trx).where_eq(filter).delete().await?;
        debug!(entity = K::NAME, deleted, "entities deleted");
        Ok(deleted)
    }

    pub async fn delete_by_id(
        &self,
        key: impl Into<KeyValue>,
        trx: Option<&C>,
    ) -> Result<u64, RepositoryError> {
        let filter = self.key_filter(&key.into())?;
        Ok(self.query(trx).where_filter(filter).delete().await?)
    }

    fn extract_key(&self, values: &Attributes) -> Result<KeyValue, ValidationError> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            match values.get(column) {
                Some(v) if !v.is_null() => parts.push(v.clone()),
                _ => {
                    return Err(ValidationError::MissingKey { entity: K::NAME, column: column.clone() })
                }
            }
        }
        Ok(if parts.len() == 1 {
            KeyValue::Single(parts.remove(0))
        } else {
            KeyValue::Composite(parts)
        })
    }

    fn key_filter(&self, key: &KeyValue) -> Result<Filter, ValidationError> {
        if key.len() != self.key_columns.len() {
            return Err(ValidationError::KeyArity {
                entity: K::NAME,
                expected: self.key_columns.len(),
                found: key.len(),
            });
        }
        let mut filter = Filter::new();
        for (column, value) in self.key_columns.iter().zip(key.values()) {
            filter.push(Condition::Eq(column.clone(), value));
        }
        Ok(filter)
    }
}

impl<K: EntityKind, C: Connection> fmt::Debug for Repository<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &K::NAME)
            .field("connection", &self.connection.identity())
            .field("key_columns", &self.key_columns)
            .finish()
    }
}

fn to_value<K: EntityKind, T: Serialize + ?Sized>(entity: &T) -> Result<Value, ValidationError> {
    serde_json::to_value(entity).map_err(|err| ValidationError::Unserializable {
        entity: K::NAME,
        message: err.to_string(),
    })
}
