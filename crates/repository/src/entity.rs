//! The `EntityKind` trait: table, key, schema and relations of one record kind.

use std::collections::HashSet;

use serde_json::Value;

use crate::connection::Connection;
use crate::error::{RepositoryError, ValidationError};
use crate::query::{Attributes, Query, Record};
use crate::schema::{self, describe, Field, Mode};

/// How many related rows a [`Relation`] yields per parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Attached as a single object (or null).
    One,
    /// Attached as an array.
    Many,
}

/// An eagerly loadable relation declared on an entity kind.
///
/// Rows of `target` whose `foreign_column` equals the parent's `local_column`
/// are attached to the parent under `name`.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub cardinality: Cardinality,
    pub local_column: &'static str,
    pub foreign_column: &'static str,
    pub target: fn() -> TableSpec,
}

impl Relation {
    pub const fn has_many(
        name: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
        target: fn() -> TableSpec,
    ) -> Self {
        Self { name, cardinality: Cardinality::Many, local_column, foreign_column, target }
    }

    pub const fn belongs_to(
        name: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
        target: fn() -> TableSpec,
    ) -> Self {
        Self { name, cardinality: Cardinality::One, local_column, foreign_column, target }
    }
}

/// Everything a backend needs to know about a table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub entity: &'static str,
    pub table: &'static str,
    pub key_columns: &'static [&'static str],
    pub fields: &'static [Field],
    pub relations: &'static [Relation],
}

impl TableSpec {
    /// Declared column names, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static Relation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// A kind of persisted record: its table, key, schema and relations.
///
/// Implemented on a marker type:
///
/// ```ignore
/// struct SimpleModel;
///
/// impl EntityKind for SimpleModel {
///     const NAME: &'static str = "SimpleModel";
///     const TABLE: &'static str = "models";
///     const FIELDS: &'static [Field] = &[
///         Field::integer("id"),
///         Field::string("name"),
///         Field::string("description").nullable(),
///     ];
/// }
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid entity-kind model",
    label = "this type does not implement `EntityKind`",
    note = "implement `repository::EntityKind` for the model type"
)]
pub trait EntityKind: Send + Sync + 'static {
    /// Stable name, part of the repository cache key.
    const NAME: &'static str;
    const TABLE: &'static str;
    const KEY_COLUMNS: &'static [&'static str] = &["id"];
    const FIELDS: &'static [Field];
    const RELATIONS: &'static [Relation] = &[];
    /// Accept attributes not listed in `FIELDS`.
    const ADDITIONAL_PROPERTIES: bool = false;

    fn table() -> TableSpec {
        TableSpec {
            entity: Self::NAME,
            table: Self::TABLE,
            key_columns: Self::KEY_COLUMNS,
            fields: Self::FIELDS,
            relations: Self::RELATIONS,
        }
    }

    /// Build an in-memory entity from raw attributes without persisting it.
    ///
    /// `None` behaves like an empty mapping.
    fn from_json(attrs: Option<&Attributes>) -> Result<Record, ValidationError> {
        let record = attrs.cloned().unwrap_or_default();
        schema::validate(Self::NAME, Self::FIELDS, Self::ADDITIONAL_PROPERTIES, &record, Mode::Full)?;
        Ok(record)
    }

    /// Like [`from_json`](Self::from_json) for an arbitrary JSON value.
    fn from_value(value: Value) -> Result<Record, ValidationError> {
        match value {
            Value::Object(record) => {
                schema::validate(Self::NAME, Self::FIELDS, Self::ADDITIONAL_PROPERTIES, &record, Mode::Full)?;
                Ok(record)
            }
            other => Err(ValidationError::NotAnObject { entity: Self::NAME, found: describe(&other) }),
        }
    }

    /// Check the supplied attributes of an incremental update.
    fn validate_patch(attrs: &Attributes) -> Result<(), ValidationError> {
        schema::validate(Self::NAME, Self::FIELDS, Self::ADDITIONAL_PROPERTIES, attrs, Mode::Patch)
    }

    /// Start a statement against this kind's table.
    fn query<C: Connection>(connection: &C) -> Query<'_, C> {
        Query::new(Self::table(), connection)
    }
}

/// Reject descriptors that cannot address rows.
///
/// Runs once per repository construction.
pub(crate) fn validate_descriptor<K: EntityKind>() -> Result<(), RepositoryError> {
    let invalid = |reason: String| {
        RepositoryError::Configuration(format!(
            "{} is not a valid entity-kind model: {reason}",
            K::NAME
        ))
    };

    if K::NAME.is_empty() {
        return Err(invalid("empty name".into()));
    }
    if K::TABLE.is_empty() {
        return Err(invalid("empty table name".into()));
    }
    if K::KEY_COLUMNS.is_empty() {
        return Err(invalid("no key columns".into()));
    }

    let mut seen = HashSet::new();
    for field in K::FIELDS {
        if !seen.insert(field.name) {
            return Err(invalid(format!("field '{}' declared twice", field.name)));
        }
    }

    let declared = |column: &str| K::ADDITIONAL_PROPERTIES || seen.contains(column);
    for column in K::KEY_COLUMNS {
        if !declared(*column) {
            return Err(invalid(format!("key column '{column}' is not a declared field")));
        }
    }
    for relation in K::RELATIONS {
        if !declared(relation.local_column) {
            return Err(invalid(format!(
                "relation '{}' uses undeclared column '{}'",
                relation.name, relation.local_column
            )));
        }
    }

    Ok(())
}
