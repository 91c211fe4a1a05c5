//! Column schemas and their reconciliation.
//!
//! A schema only ever grows: reconciliation keeps every existing column at
//! its position and appends unseen columns in first-seen order.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::record::Record;
use super::table::Table;

/// Ordered column list with a set for membership tests.
#[derive(Debug, Clone, Default)]
pub struct ColumnSchema {
    columns: Vec<String>,
    index: HashSet<String>,
}

impl ColumnSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema, dropping blank and duplicate names.
    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut schema = Self::new();
        for column in columns {
            schema.push(column.as_ref());
        }
        schema
    }

    /// Append a column. Returns false when it was already present or blank.
    pub fn push(&mut self, column: &str) -> bool {
        if column.trim().is_empty() || self.index.contains(column) {
            return false;
        }
        self.index.insert(column.to_string());
        self.columns.push(column.to_string());
        true
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.index.contains(column)
    }

    #[must_use]
    pub fn position(&self, column: &str) -> Option<usize> {
        if !self.contains(column) {
            return None;
        }
        self.columns.iter().position(|c| c == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when `self` keeps every column of `other` at the same position.
    #[must_use]
    pub fn extends(&self, other: &Self) -> bool {
        self.columns.len() >= other.columns.len()
            && self.columns.iter().zip(&other.columns).all(|(a, b)| a == b)
    }
}

impl PartialEq for ColumnSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for ColumnSchema {}

impl Serialize for ColumnSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.columns.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColumnSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(Self::from_columns)
    }
}

/// Result of merging observed columns into a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub columns: ColumnSchema,
    pub schema_changed: bool,
    /// Newly appended columns, in order.
    pub added: Vec<String>,
}

/// Ordered union of `existing` and `incoming`.
pub fn reconcile<'a, I>(table: Table, existing: &ColumnSchema, incoming: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns = existing.clone();
    let mut added = Vec::new();
    for column in incoming {
        if columns.push(column) {
            added.push(column.to_string());
        }
    }
    if !added.is_empty() {
        debug!(table = %table, added = ?added, "schema extended");
    }
    Reconciliation {
        columns,
        schema_changed: !added.is_empty(),
        added,
    }
}

/// Fold [`reconcile`] over every column of every record of a batch.
pub fn reconcile_records<'a, I>(table: Table, existing: &ColumnSchema, records: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a Record>,
{
    reconcile(table, existing, records.into_iter().flat_map(Record::columns))
}

/// Process-wide canonical schema per table.
///
/// Both backends observe into the same entry, so a column seen on either side
/// is kept by both.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Mutex<HashMap<Table, ColumnSchema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, table: Table) -> Option<ColumnSchema> {
        self.schemas.lock().get(&table).cloned()
    }

    /// Merge observed columns into the canonical schema and return it.
    pub fn observe(&self, table: Table, observed: &ColumnSchema) -> ColumnSchema {
        let mut schemas = self.schemas.lock();
        let entry = schemas.entry(table).or_default();
        let merged = reconcile(table, entry, observed.iter());
        if merged.schema_changed {
            *entry = merged.columns;
        }
        entry.clone()
    }

    pub fn forget(&self, table: Table) {
        self.schemas.lock().remove(&table);
    }

    /// Tables with a cached schema, in catalog order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Table, ColumnSchema)> {
        let schemas = self.schemas.lock();
        Table::ALL
            .into_iter()
            .filter_map(|table| schemas.get(&table).map(|s| (table, s.clone())))
            .collect()
    }
}
