//! `repository` crate — generic entity repositories over a pluggable connection.
//!
//! An [`EntityKind`] describes one kind of persisted record (table, key columns,
//! schema, relations). A [`Connection`] executes the statements a [`Query`]
//! builds. [`Repository`] ties the two together and [`RepositoryFactory`] hands
//! out one repository per (connection, entity kind) pair.
//!
//! No SQL lives here. The `store` crate provides the sqlx-backed connection and
//! [`memory::MemoryConnection`] provides an in-process one.

pub mod connection;
pub mod entity;
pub mod error;
pub mod factory;
pub mod memory;
pub mod query;
pub mod repository;
pub mod schema;

pub use connection::{Connection, ConnectionIdentity};
pub use entity::{Cardinality, EntityKind, Relation, TableSpec};
pub use error::{KeyValue, RepositoryError, StoreError, ValidationError};
pub use factory::{get_custom_repository, get_repository, CustomRepository, RepositoryFactory};
pub use query::{Attributes, Condition, Filter, Query, Record, Relations, WhereIn};
pub use repository::Repository;
pub use schema::{Field, FieldType};

#[cfg(test)]
mod test_models;
#[cfg(test)]
mod repository_tests;
