//! Field-level schema used to validate records before they reach a backend.
//!
//! Mirrors a JSON-schema `properties` block: each [`Field`] has a type, may
//! accept `null`, and may be required. Fields are declared as `const` data on
//! an [`EntityKind`](crate::EntityKind).

use std::fmt;

use serde_json::Value;

use crate::error::ValidationError;
use crate::query::Attributes;

/// Value type accepted by a [`Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
    /// String holding a UUID.
    Uuid,
    /// String holding an RFC 3339 timestamp.
    DateTime,
    /// Any JSON value.
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer  => write!(f, "integer"),
            Self::Number   => write!(f, "number"),
            Self::String   => write!(f, "string"),
            Self::Boolean  => write!(f, "boolean"),
            Self::Object   => write!(f, "object"),
            Self::Array    => write!(f, "array"),
            Self::Uuid     => write!(f, "uuid string"),
            Self::DateTime => write!(f, "date-time string"),
            Self::Any      => write!(f, "any value"),
        }
    }
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Number, Value::Number(_)) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Object, Value::Object(_)) => true,
            (Self::Array, Value::Array(_)) => true,
            (Self::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
            (Self::DateTime, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        }
    }
}

/// One declared attribute of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub nullable: bool,
    pub required: bool,
}

impl Field {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, nullable: false, required: false }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Accept `null` in addition to the declared type.
    pub const fn nullable(self) -> Self {
        Self { nullable: true, ..self }
    }

    pub const fn required(self) -> Self {
        Self { required: true, ..self }
    }
}

/// How strictly a record is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Whole entity: required fields must be present.
    Full,
    /// Incremental update: only the supplied fields are checked.
    Patch,
}

/// Check `attrs` against `fields`, returning the first violation.
pub(crate) fn validate(
    entity: &'static str,
    fields: &'static [Field],
    additional_properties: bool,
    attrs: &Attributes,
    mode: Mode,
) -> Result<(), ValidationError> {
    for (name, value) in attrs {
        let Some(field) = fields.iter().find(|f| f.name == name.as_str()) else {
            if additional_properties {
                continue;
            }
            return Err(ValidationError::UnknownField { entity, field: name.clone() });
        };

        if value.is_null() {
            if !field.nullable && field.ty != FieldType::Any {
                return Err(ValidationError::WrongType {
                    entity,
                    field: field.name,
                    expected: field.ty,
                    found: "null".into(),
                });
            }
            continue;
        }

        if !field.ty.accepts(value) {
            return Err(ValidationError::WrongType {
                entity,
                field: field.name,
                expected: field.ty,
                found: describe(value),
            });
        }
    }

    if mode == Mode::Full {
        if let Some(missing) = fields.iter().find(|f| f.required && !attrs.contains_key(f.name)) {
            return Err(ValidationError::MissingField { entity, field: missing.name });
        }
    }

    Ok(())
}

/// Short JSON type name for error messages.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}
