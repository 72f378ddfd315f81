//! The demo entity kind backed by the migrated `models` table.

use repository::{EntityKind, Field};

pub struct Model;

impl EntityKind for Model {
    const NAME: &'static str = "Model";
    const TABLE: &'static str = "models";
    const FIELDS: &'static [Field] = &[
        Field::integer("id"),
        Field::string("name"),
        Field::string("code").nullable(),
        Field::string("surname").nullable(),
        Field::string("description").nullable(),
    ];
}
