//! Ordered records.

use std::fmt;

use chrono::NaiveDate;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Map;

use super::schema::ColumnSchema;
use super::table::Table;
use super::value::Value;
use crate::error::{Result, StoreError};

static EMPTY: Value = Value::Empty;

/// One row: column name to value, in insertion order.
///
/// Two records are equal when every column holds an equal value, a column
/// missing on one side counting as [`Value::Empty`]. Column order is ignored.
#[derive(Debug, Clone, Default)]
pub struct Record {
    cells: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub const fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// Builder form of [`Record::set`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a cell, keeping the column's position when it already exists.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column, value)),
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Cell value, [`Value::Empty`] when the column is absent.
    #[must_use]
    pub fn value(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&EMPTY)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(Value::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn number(&self, column: &str) -> Option<f64> {
        self.value(column).as_f64()
    }

    #[must_use]
    pub fn flag(&self, column: &str) -> bool {
        self.value(column).as_bool()
    }

    #[must_use]
    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        self.value(column).as_date()
    }

    /// Parse a JSON-in-cell column back into a document.
    #[must_use]
    pub fn json(&self, column: &str) -> Option<serde_json::Value> {
        self.text(column)
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// Build a record from caller input.
    ///
    /// Nested arrays and objects are accepted only in the table's JSON
    /// columns, where they are stored as compact JSON text.
    pub fn from_json_object(table: Table, object: &Map<String, serde_json::Value>) -> Result<Self> {
        let mut record = Self::new();
        for (column, raw) in object {
            let value = match Value::from_json(raw) {
                Some(value) => value,
                None if table.is_json_column(column) => Value::Text(raw.to_string()),
                None => {
                    return Err(StoreError::malformed(
                        table.name(),
                        column,
                        "nested values are only allowed in JSON columns",
                    ));
                }
            };
            record.set(column.clone(), value);
        }
        record.validate(table)?;
        Ok(record)
    }

    /// Build a record from stored data; any nested value becomes JSON text.
    #[must_use]
    pub fn from_json_map(object: &Map<String, serde_json::Value>) -> Self {
        let mut record = Self::new();
        for (column, raw) in object {
            let value = Value::from_json(raw).unwrap_or_else(|| Value::Text(raw.to_string()));
            record.set(column.clone(), value);
        }
        record
    }

    #[must_use]
    pub fn to_json_map(&self) -> Map<String, serde_json::Value> {
        self.cells
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// Reject blank column names and numbers that cannot be stored.
    pub fn validate(&self, table: Table) -> Result<()> {
        for (column, value) in &self.cells {
            if column.trim().is_empty() {
                return Err(StoreError::malformed(table.name(), column, "column name is blank"));
            }
            if !value.is_storable() {
                return Err(StoreError::malformed(
                    table.name(),
                    column,
                    "numbers must be finite",
                ));
            }
        }
        Ok(())
    }

    /// Lay the record out on `schema`: every schema column in order, missing
    /// ones empty. A column outside the schema is a conflict.
    pub fn conform(&self, table: Table, schema: &ColumnSchema) -> Result<Self> {
        if let Some(stray) = self.columns().find(|column| !schema.contains(column)) {
            return Err(StoreError::schema_conflict(
                table.name(),
                format!("column '{stray}' is not part of the table schema"),
            ));
        }
        Ok(Self {
            cells: schema
                .iter()
                .map(|column| (column.to_string(), self.value(column).clone()))
                .collect(),
        })
    }

    /// Cells in schema order, for positional backends.
    #[must_use]
    pub fn row_values(&self, schema: &ColumnSchema) -> Vec<Value> {
        schema.iter().map(|column| self.value(column).clone()).collect()
    }

    /// Rebuild a record from a positional row. Missing trailing cells are empty.
    #[must_use]
    pub fn from_row(schema: &ColumnSchema, row: &[Value]) -> Self {
        Self {
            cells: schema
                .iter()
                .enumerate()
                .map(|(i, column)| (column.to_string(), row.get(i).cloned().unwrap_or_default()))
                .collect(),
        }
    }

    /// Normalized key of this record.
    ///
    /// Fails when no key column is given or a key cell is empty, since such a
    /// key cannot identify a row.
    pub fn key_of(&self, table: Table, key_columns: &[String]) -> Result<Vec<String>> {
        if key_columns.is_empty() {
            return Err(StoreError::schema_conflict(
                table.name(),
                "upsert needs at least one key column",
            ));
        }
        key_columns
            .iter()
            .map(|column| {
                let key = self.value(column).key_text();
                if key.is_empty() {
                    Err(StoreError::schema_conflict(
                        table.name(),
                        format!("key column '{column}' is empty"),
                    ))
                } else {
                    Ok(key)
                }
            })
            .collect()
    }

    #[must_use]
    pub fn matches_key(&self, key_columns: &[String], key: &[String]) -> bool {
        key_columns.len() == key.len()
            && key_columns
                .iter()
                .zip(key)
                .all(|(column, wanted)| self.value(column).key_text() == *wanted)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.iter().all(|(column, value)| other.value(column) == value)
            && other.iter().all(|(column, value)| self.value(column) == value)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Record, A::Error> {
                let mut record = Record::new();
                while let Some((column, raw)) = access.next_entry::<String, serde_json::Value>()? {
                    let value =
                        Value::from_json(&raw).unwrap_or_else(|| Value::Text(raw.to_string()));
                    record.set(column, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn set_keeps_position_of_existing_columns() {
        let mut record = Record::new().with("a", 1).with("b", 2);
        record.set("a", 3);
        assert_eq!(record.columns().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(record.number("a"), Some(3.0));
    }

    #[test]
    fn equality_treats_missing_as_empty() {
        let short = Record::new().with("parcelle", "A1");
        let long = Record::new().with("produit", Value::Empty).with("parcelle", "A1");
        assert_eq!(short, long);
        assert_ne!(short, Record::new().with("parcelle", "A2"));
    }

    #[test]
    fn nested_values_only_in_json_columns() {
        let ok = Record::from_json_object(
            Table::Traitements,
            &object(json!({"parcelle": "A1", "caracteristiques": {"dose": 2}})),
        )
        .unwrap();
        assert_eq!(ok.json("caracteristiques"), Some(json!({"dose": 2})));

        let err = Record::from_json_object(
            Table::Traitements,
            &object(json!({"parcelle": ["A1", "A2"]})),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::MalformedRecord { column, .. } if column == "parcelle"));
    }

    #[test]
    fn conform_backfills_and_orders() {
        let schema = ColumnSchema::from_columns(["date", "tmin", "tmax"]);
        let record = Record::new().with("tmax", 28.5).with("date", "2024-07-01");
        let conformed = record.conform(Table::Meteo, &schema).unwrap();
        assert_eq!(conformed.columns().collect::<Vec<_>>(), ["date", "tmin", "tmax"]);
        assert!(conformed.value("tmin").is_empty());
    }

    #[test]
    fn conform_rejects_stray_columns() {
        let schema = ColumnSchema::from_columns(["date"]);
        let record = Record::new().with("pluie", 3);
        assert!(matches!(
            record.conform(Table::Meteo, &schema),
            Err(StoreError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn validate_rejects_nan() {
        let record = Record::new().with("dose", f64::NAN);
        assert!(record.validate(Table::Traitements).is_err());
    }

    #[test]
    fn key_requires_non_empty_cells() {
        let keys = vec!["annee".to_string(), "type".to_string()];
        let record = Record::new().with("annee", 2024);
        assert!(matches!(
            record.key_of(Table::Vendanges, &keys),
            Err(StoreError::SchemaConflict { .. })
        ));
        assert!(record.key_of(Table::Vendanges, &[]).is_err());
    }

    #[test]
    fn key_matches_across_representations() {
        let keys = vec!["annee".to_string()];
        let key = Record::new().with("annee", "2024").key_of(Table::Vendanges, &keys).unwrap();
        assert!(Record::new().with("annee", 2024).matches_key(&keys, &key));
        assert!(!Record::new().with("annee", 2023).matches_key(&keys, &key));
    }

    #[test]
    fn serde_preserves_column_order() {
        let record: Record = serde_json::from_str(r#"{"z": 1, "a": "x", "m": null}"#).unwrap();
        assert_eq!(record.columns().collect::<Vec<_>>(), ["z", "a", "m"]);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"z":1,"a":"x","m":null}"#);
    }

    #[test]
    fn row_round_trip_backfills_short_rows() {
        let schema = ColumnSchema::from_columns(["nom", "type", "dar"]);
        let record = Record::from_row(&schema, &[Value::text("Bouillie"), Value::text("cuivre")]);
        assert!(record.value("dar").is_empty());
        assert_eq!(record.row_values(&schema).len(), 3);
    }
}
