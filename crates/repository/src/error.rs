//! Error taxonomy for the repository layer.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::schema::FieldType;

/// Errors surfaced by [`Repository`](crate::Repository) and
/// [`RepositoryFactory`](crate::RepositoryFactory) operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Wiring mistake detected at construction or registration time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Attributes do not satisfy the entity kind's schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An update matched no row for the given key.
    #[error("Entity with id {0} does not exist")]
    NotFound(KeyValue),

    /// Persistence-layer failure, passed through untranslated.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Schema violations reported by [`EntityKind::from_json`](crate::EntityKind::from_json)
/// and friends.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{entity}: expected a JSON object, got {found}")]
    NotAnObject { entity: &'static str, found: String },

    #[error("{entity}: value cannot be serialized: {message}")]
    Unserializable { entity: &'static str, message: String },

    #[error("{entity}: unknown field '{field}'")]
    UnknownField { entity: &'static str, field: String },

    #[error("{entity}: missing required field '{field}'")]
    MissingField { entity: &'static str, field: &'static str },

    #[error("{entity}: field '{field}' must be {expected}, got {found}")]
    WrongType {
        entity: &'static str,
        field: &'static str,
        expected: FieldType,
        found: String,
    },

    #[error("{entity}: key column '{column}' is missing")]
    MissingKey { entity: &'static str, column: String },

    #[error("{entity}: expected {expected} key value(s), got {found}")]
    KeyArity {
        entity: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Errors raised by a [`Connection`](crate::Connection) backend.
///
/// The repository never inspects these; they reach the caller as
/// [`RepositoryError::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("constraint violation on '{table}': {message}")]
    Constraint { table: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown relation '{relation}' on '{table}'")]
    UnknownRelation { table: String, relation: String },

    #[error("invalid {kind} identifier: {ident}")]
    InvalidIdentifier { kind: &'static str, ident: String },

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("cannot decode row from '{table}': {message}")]
    Decode { table: String, message: String },
}

impl StoreError {
    /// Wrap any driver error as [`StoreError::Backend`].
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Key value used to address a single row.
///
/// `Composite` values are given in key-column order.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Single(Value),
    Composite(Vec<Value>),
}

impl KeyValue {
    pub fn values(&self) -> Vec<Value> {
        match self {
            KeyValue::Single(v) => vec![v.clone()],
            KeyValue::Composite(vs) => vs.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KeyValue::Single(_) => 1,
            KeyValue::Composite(vs) => vs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn scalar(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
            match v {
                Value::String(s) => write!(f, "{s}"),
                other => write!(f, "{other}"),
            }
        }
        match self {
            KeyValue::Single(v) => scalar(f, v),
            KeyValue::Composite(vs) => {
                for (idx, v) in vs.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    scalar(f, v)?;
                }
                Ok(())
            }
        }
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        KeyValue::Single(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Single(Value::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Single(Value::from(value))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Single(Value::from(value))
    }
}

impl From<Vec<Value>> for KeyValue {
    fn from(values: Vec<Value>) -> Self {
        KeyValue::Composite(values)
    }
}
