//! Entity kinds shared by the crate's tests.

use serde_json::Value;

use crate::entity::{EntityKind, Relation};
use crate::query::Attributes;
use crate::schema::Field;

pub struct SimpleModel;

impl EntityKind for SimpleModel {
    const NAME: &'static str = "SimpleModel";
    const TABLE: &'static str = "models";
    const FIELDS: &'static [Field] = &[
        Field::integer("id"),
        Field::string("name"),
        Field::string("code").nullable(),
        Field::string("description").nullable(),
    ];
}

/// Same table as [`SimpleModel`], different kind.
pub struct SimpleModel2;

impl EntityKind for SimpleModel2 {
    const NAME: &'static str = "SimpleModel2";
    const TABLE: &'static str = "models";
    const FIELDS: &'static [Field] = SimpleModel::FIELDS;
}

pub struct SimpleModelCustomId;

impl EntityKind for SimpleModelCustomId {
    const NAME: &'static str = "SimpleModelCustomId";
    const TABLE: &'static str = "custom_id_models";
    const KEY_COLUMNS: &'static [&'static str] = &["code"];
    const FIELDS: &'static [Field] = &[
        Field::string("code"),
        Field::string("name"),
        Field::string("surname").nullable(),
        Field::string("description").nullable(),
    ];
}

pub struct CompositeKeyModel;

impl EntityKind for CompositeKeyModel {
    const NAME: &'static str = "CompositeKeyModel";
    const TABLE: &'static str = "composite_models";
    const KEY_COLUMNS: &'static [&'static str] = &["name", "code"];
    const FIELDS: &'static [Field] = &[
        Field::string("name"),
        Field::string("code"),
        Field::string("description").nullable(),
    ];
}

pub struct ParentModel;

impl EntityKind for ParentModel {
    const NAME: &'static str = "ParentModel";
    const TABLE: &'static str = "parents";
    const FIELDS: &'static [Field] = &[Field::integer("id"), Field::string("name").required()];
    const RELATIONS: &'static [Relation] = &[Relation::has_many(
        "children",
        "id",
        "parent_id",
        <ChildModel as EntityKind>::table,
    )];
}

pub struct ChildModel;

impl EntityKind for ChildModel {
    const NAME: &'static str = "ChildModel";
    const TABLE: &'static str = "children";
    const FIELDS: &'static [Field] = &[
        Field::integer("id"),
        Field::integer("parent_id").nullable(),
        Field::string("name"),
    ];
    const RELATIONS: &'static [Relation] = &[Relation::belongs_to(
        "parent",
        "parent_id",
        "id",
        <ParentModel as EntityKind>::table,
    )];
}

/// Declares a key column it has no field for.
pub struct BrokenModel;

impl EntityKind for BrokenModel {
    const NAME: &'static str = "BrokenModel";
    const TABLE: &'static str = "broken";
    const KEY_COLUMNS: &'static [&'static str] = &["uuid"];
    const FIELDS: &'static [Field] = &[Field::string("name")];
}

/// Build [`Attributes`] from a `json!` object literal.
pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
