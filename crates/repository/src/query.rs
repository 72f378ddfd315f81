//! Filters, relation lists and the [`Query`] builder an entity kind hands out.
//!
//! A `Query` collects conditions for one table and dispatches the finished
//! statement to a [`Connection`]. It never renders SQL itself; backends decide
//! how a [`Filter`] is expressed.

use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::Connection;
use crate::entity::TableSpec;
use crate::error::StoreError;

/// Attribute name → value mapping used as filter input.
pub type Attributes = Map<String, Value>;

/// An entity instance as returned by a backend.
pub type Record = Map<String, Value>;

/// One predicate in a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`, or `column IS NULL` when `value` is null.
    Eq(String, Value),
    /// `column IN (values…)`. An empty list matches nothing.
    In(String, Vec<Value>),
    /// `NOT (c1 AND c2 AND …)`, a single inverted compound condition.
    Not(Vec<Condition>),
}

/// Conjunction of [`Condition`]s. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One equality condition per attribute.
    pub fn from_attributes(attrs: &Attributes) -> Self {
        let mut filter = Self::new();
        for (column, value) in attrs {
            filter.push(Condition::Eq(column.clone(), value.clone()));
        }
        filter
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against an in-memory record.
    ///
    /// Absent attributes compare as null.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| condition_matches(c, record))
    }
}

fn condition_matches(condition: &Condition, record: &Record) -> bool {
    match condition {
        Condition::Eq(column, value) => record.get(column).unwrap_or(&Value::Null) == value,
        Condition::In(column, values) => {
            let actual = record.get(column).unwrap_or(&Value::Null);
            values.iter().any(|v| v == actual)
        }
        Condition::Not(inner) => !inner.iter().all(|c| condition_matches(c, record)),
    }
}

/// Relations to load eagerly alongside the primary rows.
///
/// The names are forwarded to the backend untouched; the entity kind's
/// [`Relation`](crate::Relation) list defines what they mean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations(Vec<String>);

impl Relations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Relations {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl From<String> for Relations {
    fn from(name: String) -> Self {
        Self(vec![name])
    }
}

impl From<Vec<String>> for Relations {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<&[&str]> for Relations {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Relations {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|s| s.to_string()).collect())
    }
}

/// Membership criteria accepted by
/// [`Repository::find_where_in`](crate::Repository::find_where_in).
#[derive(Debug, Clone, PartialEq)]
pub enum WhereIn {
    /// One column against a list of candidate values.
    Column(String, Vec<Value>),
    /// Per-attribute criteria: arrays become membership filters, scalars
    /// become equality filters. All are ANDed.
    Attributes(Attributes),
}

impl WhereIn {
    pub fn into_filter(self) -> Filter {
        let mut filter = Filter::new();
        match self {
            WhereIn::Column(column, values) => filter.push(Condition::In(column, values)),
            WhereIn::Attributes(attrs) => {
                for (column, value) in attrs {
                    match value {
                        Value::Array(values) => filter.push(Condition::In(column, values)),
                        scalar => filter.push(Condition::Eq(column, scalar)),
                    }
                }
            }
        }
        filter
    }
}

impl From<Attributes> for WhereIn {
    fn from(attrs: Attributes) -> Self {
        WhereIn::Attributes(attrs)
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for WhereIn {
    fn from((column, values): (S, Vec<Value>)) -> Self {
        WhereIn::Column(column.into(), values)
    }
}

/// Statement builder bound to one table and one connection.
///
/// Obtained from [`EntityKind::query`](crate::EntityKind::query).
#[derive(Debug)]
pub struct Query<'c, C: Connection> {
    table: TableSpec,
    connection: &'c C,
    filter: Filter,
    relations: Relations,
    limit: Option<u64>,
}

impl<'c, C: Connection> Query<'c, C> {
    pub fn new(table: TableSpec, connection: &'c C) -> Self {
        Self {
            table,
            connection,
            filter: Filter::new(),
            relations: Relations::none(),
            limit: None,
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// AND one equality condition per attribute.
    pub fn where_eq(mut self, attrs: &Attributes) -> Self {
        for (column, value) in attrs {
            self.filter.push(Condition::Eq(column.clone(), value.clone()));
        }
        self
    }

    /// AND `NOT (a = x AND b = y …)`. An empty mapping adds nothing.
    pub fn where_not(mut self, attrs: &Attributes) -> Self {
        if !attrs.is_empty() {
            self.filter
                .push(Condition::Not(Filter::from_attributes(attrs).conditions));
        }
        self
    }

    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.filter.push(Condition::In(column.to_string(), values));
        self
    }

    /// AND every condition of an already assembled filter.
    pub fn where_filter(mut self, filter: Filter) -> Self {
        self.filter.conditions.extend(filter.conditions);
        self
    }

    pub fn with_relations(mut self, relations: Relations) -> Self {
        self.relations = relations;
        self
    }

    /// Return at most `n` rows.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub async fn fetch_all(self) -> Result<Vec<Record>, StoreError> {
        debug!(table = self.table.table, conditions = self.filter.conditions.len(), limit = ?self.limit, "select");
        self.connection
            .select(&self.table, &self.filter, &self.relations, self.limit)
            .await
    }

    pub async fn fetch_optional(self) -> Result<Option<Record>, StoreError> {
        Ok(self.limit(1).fetch_all().await?.into_iter().next())
    }

    pub async fn insert(self, record: Record) -> Result<Record, StoreError> {
        debug!(table = self.table.table, "insert");
        self.connection.insert(&self.table, record).await
    }

    /// Set only the supplied columns on every matching row.
    pub async fn patch(self, values: Record) -> Result<u64, StoreError> {
        debug!(table = self.table.table, columns = values.len(), "update");
        self.connection
            .update(&self.table, values, &self.filter)
            .await
    }

    pub async fn delete(self) -> Result<u64, StoreError> {
        debug!(table = self.table.table, "delete");
        self.connection.delete(&self.table, &self.filter).await
    }
}
