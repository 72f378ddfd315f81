//! An in-process [`Connection`] backed by hash maps.
//!
//! Useful in unit and integration tests where a real database is either
//! unavailable or irrelevant. Clones share the same tables, so a repository and
//! the test that inspects it see the same rows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::connection::{Connection, ConnectionIdentity};
use crate::entity::{Cardinality, TableSpec};
use crate::error::StoreError;
use crate::query::{Condition, Filter, Record, Relations};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    /// When set, every statement fails with `StoreError::Unavailable`.
    outage: Option<String>,
}

/// In-memory storage shared between clones.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    identity: ConnectionIdentity,
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            identity: ConnectionIdentity::new(host, database),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// All rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Insert rows verbatim, bypassing key generation and constraints.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) {
        let mut state = self.lock();
        state.tables.entry(table.to_string()).or_default().rows.extend(rows);
    }

    /// Make every following statement fail until [`restore`](Self::restore).
    pub fn simulate_outage(&self, reason: impl Into<String>) {
        self.lock().outage = Some(reason.into());
    }

    pub fn restore(&self) {
        self.lock().outage = None;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let state = self.lock();
        match &state.outage {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(state),
        }
    }
}

fn check_columns(table: &TableSpec, filter: &Filter) -> Result<(), StoreError> {
    fn walk(table: &TableSpec, condition: &Condition) -> Result<(), StoreError> {
        match condition {
            Condition::Eq(column, _) | Condition::In(column, _) => known_column(table, column),
            Condition::Not(inner) => inner.iter().try_for_each(|c| walk(table, c)),
        }
    }
    filter.conditions().iter().try_for_each(|c| walk(table, c))
}

fn known_column(table: &TableSpec, column: &str) -> Result<(), StoreError> {
    if table.columns().any(|c| c == column) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier { kind: "column", ident: column.to_string() })
    }
}

fn key_of(table: &TableSpec, record: &Record) -> Vec<Value> {
    table
        .key_columns
        .iter()
        .map(|c| record.get(*c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Fill in declared columns the caller left out, as a table default would.
fn with_defaults(table: &TableSpec, mut record: Record) -> Record {
    for column in table.columns() {
        record.entry(column).or_insert(Value::Null);
    }
    record
}

fn attach_relations(
    state: &State,
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
        let related = state
            .tables
            .get(target.table)
            .map(|t| t.rows.as_slice())
            .unwrap_or_default();

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

#[async_trait]
impl Connection for MemoryConnection {
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
        check_columns(table, filter)?;
        let state = self.guard()?;
        let take = limit.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let mut rows: Vec<Record> = state
            .tables
            .get(table.table)
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).take(take).cloned().collect())
            .unwrap_or_default();
        attach_relations(&state, table, &mut rows, relations)?;
        Ok(rows)
    }

    async fn insert(&self, table: &TableSpec, record: Record) -> Result<Record, StoreError> {
        for column in record.keys() {
            known_column(table, column)?;
        }
        let mut state = self.guard()?;
        let stored = state.tables.entry(table.table.to_string()).or_default();

        let mut record = with_defaults(table, record);
        if let [key] = table.key_columns {
            if record.get(*key).map_or(true, Value::is_null) {
                stored.next_id += 1;
                record.insert(key.to_string(), Value::from(stored.next_id));
            } else if let Some(id) = record.get(*key).and_then(Value::as_i64) {
                stored.next_id = stored.next_id.max(id);
            }
        }

        let key = key_of(table, &record);
        if stored.rows.iter().any(|r| key_of(table, r) == key) {
            return Err(StoreError::Constraint {
                table: table.table.to_string(),
                message: format!("duplicate key {key:?}"),
            });
        }

        stored.rows.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &TableSpec,
        values: Record,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        check_columns(table, filter)?;
        for column in values.keys() {
            known_column(table, column)?;
        }
        let mut state = self.guard()?;
        let Some(stored) = state.tables.get_mut(table.table) else {
            return Ok(0);
        };

        let mut affected = 0;
        for row in stored.rows.iter_mut().filter(|r| filter.matches(r)) {
            for (column, value) in &values {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, table: &TableSpec, filter: &Filter) -> Result<u64, StoreError> {
        check_columns(table, filter)?;
        let mut state = self.guard()?;
        let Some(stored) = state.tables.get_mut(table.table) else {
            return Ok(0);
        };

        let before = stored.rows.len();
        stored.rows.retain(|r| !filter.matches(r));
        Ok((before - stored.rows.len()) as u64)
    }
}
