//! Local file backend: one pretty-printed JSON document per table.
//!
//! ```json
//! { "table": "vendanges", "columns": ["annee", "type"], "rows": [ ... ] }
//! ```
//!
//! `config.json` also carries the parsed settings under `document`. Files
//! written by older releases are still read: bare arrays of row objects,
//! the nested per-table documents (`{"traitements": [...]}`, date maps,
//! `campagnes`), `NaN` tokens, a plain settings object for `config`, and the
//! legacy file names (`meteo_historique.json`, ...).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{Applied, BackendKind, TableBackend, TableSnapshot};
use crate::core::{ColumnSchema, Record, Table, reconcile_records};
use crate::error::{Result, StoreError};
use crate::utils::fs::{ensure_dir, read_optional, write_atomic};

type JsonRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<serde_json::Value>,
}

/// Table files under one data directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn table_path(&self, table: Table) -> PathBuf {
        self.root.join(format!("{}.json", table.name()))
    }

    fn legacy_path(&self, table: Table) -> Option<PathBuf> {
        table
            .legacy_key()
            .map(|key| self.root.join(format!("{key}.json")))
    }

    /// Create the data directory, failing early when it is not writable.
    pub fn init(&self) -> Result<()> {
        ensure_dir(&self.root).map_err(|err| unavailable(&self.root, err))
    }

    fn read_file(&self, table: Table) -> Result<Option<(PathBuf, String)>> {
        let primary = self.table_path(table);
        if let Some(raw) = read_optional(&primary).map_err(|err| unavailable(&primary, err))? {
            return Ok(Some((primary, raw)));
        }
        let Some(legacy) = self.legacy_path(table) else {
            return Ok(None);
        };
        let raw = read_optional(&legacy).map_err(|err| unavailable(&legacy, err))?;
        Ok(raw.map(|raw| {
            debug!(table = %table, path = %legacy.display(), "reading legacy table file");
            (legacy, raw)
        }))
    }
}

impl TableBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn probe(&self) -> Result<()> {
        self.init()
    }

    fn read_all(&self, table: Table) -> Result<TableSnapshot> {
        let Some((path, raw)) = self.read_file(table)? else {
            return Ok(TableSnapshot::empty(table));
        };
        let snapshot = parse_table_file(table, &raw).map_err(|err| unavailable(&path, err))?;
        debug!(
            table = %table,
            rows = snapshot.records.len(),
            columns = snapshot.columns.len(),
            "local table read"
        );
        Ok(snapshot)
    }

    fn write_all(&self, snapshot: &TableSnapshot) -> Result<()> {
        let table = snapshot.table;
        let path = self.table_path(table);
        let rows = snapshot
            .records
            .iter()
            .map(|record| record.conform(table, &snapshot.columns))
            .collect::<Result<Vec<_>>>()?;
        let file = TableFile {
            table: Some(table.name().to_string()),
            columns: snapshot.columns.as_slice().to_vec(),
            document: config_document(table, &rows),
            rows,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&path, &bytes).map_err(|err| unavailable(&path, err))?;
        debug!(table = %table, rows = snapshot.records.len(), "local table written");
        Ok(())
    }

    fn overwrite_header(&self, table: Table, columns: &ColumnSchema) -> Result<()> {
        let mut snapshot = self.read_all(table)?;
        let merged = reconcile_records(table, columns, &snapshot.records).columns;
        snapshot.records = snapshot
            .records
            .iter()
            .map(|record| record.conform(table, &merged))
            .collect::<Result<Vec<_>>>()?;
        snapshot.columns = merged;
        self.write_all(&snapshot)
    }

    fn append_row(&self, table: Table, columns: &ColumnSchema, record: &Record) -> Result<()> {
        let mut snapshot = self.read_all(table)?;
        snapshot.columns = columns.clone();
        snapshot.records.push(record.clone());
        self.write_all(&snapshot)
    }

    fn update_row(
        &self,
        before: &TableSnapshot,
        index: usize,
        columns: &ColumnSchema,
        record: &Record,
    ) -> Result<()> {
        let mut snapshot = before.clone();
        snapshot.columns = columns.clone();
        match snapshot.records.get_mut(index) {
            Some(slot) => *slot = record.clone(),
            None => {
                return Err(StoreError::StorageUnavailable(format!(
                    "{}: row {index} does not exist",
                    self.table_path(before.table).display()
                )));
            }
        }
        self.write_all(&snapshot)
    }

    /// Whole-file rewrite: the local medium has no cheaper row write.
    fn commit(&self, _before: &TableSnapshot, applied: &Applied) -> Result<()> {
        self.write_all(&applied.after)
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::StorageUnavailable(format!("{}: {err}", path.display()))
}

fn parse_table_file(table: Table, raw: &str) -> Result<TableSnapshot> {
    if raw.trim().is_empty() {
        return Ok(TableSnapshot::empty(table));
    }
    let value: serde_json::Value = serde_json::from_str(&sanitize_non_finite(raw))?;
    match value {
        serde_json::Value::Null => Ok(TableSnapshot::empty(table)),
        serde_json::Value::Array(items) => {
            let records = items
                .iter()
                .map(|item| row_object(item).map(|map| Record::from_json_map(&map)))
                .collect::<Result<Vec<_>>>()?;
            Ok(snapshot_from(table, &[], records))
        }
        serde_json::Value::Object(map) if map.contains_key("rows") || map.contains_key("columns") => {
            let file: TableFile = serde_json::from_value(serde_json::Value::Object(map))?;
            if let Some(name) = file.table.as_deref() {
                if Table::from_name(name).ok() != Some(table) {
                    warn!(table = %table, found = name, "table file names another table");
                }
            }
            let mut records = file.rows;
            if records.is_empty() && table == Table::Config {
                records.extend(file.document.as_ref().map(document_record));
            }
            Ok(snapshot_from(table, &file.columns, records))
        }
        serde_json::Value::Object(map) if table == Table::Config => {
            let document = serde_json::Value::Object(map);
            Ok(snapshot_from(table, &[], vec![document_record(&document)]))
        }
        serde_json::Value::Object(map) => {
            let records = legacy_rows(table, &map)?
                .iter()
                .map(Record::from_json_map)
                .collect();
            Ok(snapshot_from(table, &[], records))
        }
        other => Err(unrecognized(&other)),
    }
}

/// Campaign columns taken from the nested sections of a legacy vendanges
/// document: `(column, section, field)`.
const CAMPAIGN_FIELDS: &[(&str, &str, &str)] = &[
    ("rdt_theo", "parametres", "rendement_theorique"),
    ("prix_u", "parametres", "prix_u"),
    ("prime_u", "parametres", "prime_u"),
    ("frais_vinif_u", "parametres", "frais_vinif_u"),
    ("total_ha", "surface_vendangee", "total_ha"),
    ("notes_surface", "surface_vendangee", "notes"),
    ("validee", "validation", "validee"),
    ("hl_reel", "validation", "hl_reel"),
    ("prix_u_reel", "validation", "prix_u_reel"),
    ("prime_reelle", "validation", "prime_reelle"),
    ("frais_reels", "validation", "frais_reels"),
    ("date_validation", "validation", "date_validation"),
    ("poids_kg_hist", "donnees_historiques", "poids_kg"),
    ("hl_hist", "donnees_historiques", "hl"),
    ("ca_brut_hist", "donnees_historiques", "ca_brut"),
    ("ca_net_hist", "donnees_historiques", "ca_net"),
    ("total_ha_hist", "donnees_historiques", "total_ha"),
    ("euro_hl_hist", "donnees_historiques", "euro_hl"),
    ("poids_ha_hist", "donnees_historiques", "poids_ha"),
    ("rendement_reel_hist", "donnees_historiques", "rendement_reel"),
];

/// Flatten the per-table documents older releases wrote into row objects.
///
/// - `traitements`, `produits`, `fertilisation`: a list under `traitements`,
///   `produits` or `apports`.
/// - `meteo`: a map from date to the day's values.
/// - `gdd`: a map from date to the accumulated value.
/// - `alertes`: `campagnes`, one row per entry of each campaign's `analyses`.
/// - `vendanges`: `campagnes`, one `CAMPAGNE` row per campaign followed by
///   one `TICKET` row per ticket.
fn legacy_rows(table: Table, document: &JsonRow) -> Result<Vec<JsonRow>> {
    match table {
        Table::Traitements => list_rows(document, "traitements"),
        Table::Produits => list_rows(document, "produits"),
        Table::Fertilisation => list_rows(document, "apports"),
        Table::Meteo => document
            .iter()
            .map(|(date, values)| {
                let mut row = JsonRow::new();
                row.insert("date".into(), date.clone().into());
                row.extend(row_object(values)?);
                Ok(row)
            })
            .collect(),
        Table::Gdd => Ok(document
            .iter()
            .map(|(date, value)| {
                let mut row = JsonRow::new();
                row.insert("date".into(), date.clone().into());
                row.insert("value".into(), value.clone());
                row
            })
            .collect()),
        Table::Alertes => {
            let mut rows = Vec::new();
            for campaign in list_rows(document, "campagnes")? {
                let annee = field(&campaign, "annee");
                for analysis in nested_rows(&campaign, "analyses")? {
                    let mut row = JsonRow::new();
                    row.insert("annee".into(), annee.clone());
                    row.extend(analysis);
                    rows.push(row);
                }
            }
            Ok(rows)
        }
        Table::Vendanges => {
            let mut rows = Vec::new();
            for campaign in list_rows(document, "campagnes")? {
                let annee = field(&campaign, "annee");
                let mut row = JsonRow::new();
                row.insert("annee".into(), annee.clone());
                row.insert("type".into(), "CAMPAGNE".into());
                row.insert("status".into(), field(&campaign, "status"));
                for (column, section, key) in CAMPAIGN_FIELDS {
                    let value = campaign
                        .get(*section)
                        .and_then(|nested| nested.get(*key))
                        .cloned()
                        .unwrap_or_default();
                    row.insert((*column).into(), value);
                }
                rows.push(row);

                for ticket in nested_rows(&campaign, "tickets")? {
                    let mut row = JsonRow::new();
                    row.insert("annee".into(), annee.clone());
                    row.insert("type".into(), "TICKET".into());
                    row.extend(ticket);
                    rows.push(row);
                }
            }
            Ok(rows)
        }
        Table::Config => Err(unrecognized(&serde_json::Value::Object(document.clone()))),
    }
}

/// The list under `key`; an empty document is an empty table.
fn list_rows(document: &JsonRow, key: &str) -> Result<Vec<JsonRow>> {
    if document.is_empty() {
        return Ok(Vec::new());
    }
    if !document.contains_key(key) {
        return Err(StoreError::StorageUnavailable(format!(
            "unrecognized table layout: object without `{key}`"
        )));
    }
    nested_rows(document, key)
}

fn nested_rows(object: &JsonRow, key: &str) -> Result<Vec<JsonRow>> {
    match object.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items.iter().map(row_object).collect(),
        Some(other) => Err(unrecognized(other)),
    }
}

fn row_object(item: &serde_json::Value) -> Result<JsonRow> {
    match item {
        serde_json::Value::Object(map) => Ok(map.clone()),
        other => Err(StoreError::StorageUnavailable(format!(
            "expected row objects, found {other}"
        ))),
    }
}

fn field(object: &JsonRow, key: &str) -> serde_json::Value {
    object.get(key).cloned().unwrap_or_default()
}

fn unrecognized(value: &serde_json::Value) -> StoreError {
    StoreError::StorageUnavailable(format!("unrecognized table layout: {}", json_kind(value)))
}

fn snapshot_from(table: Table, declared: &[String], records: Vec<Record>) -> TableSnapshot {
    let columns = reconcile_records(table, &ColumnSchema::from_columns(declared), &records).columns;
    let records = records
        .iter()
        .map(|record| Record::from_row(&columns, &record.row_values(&columns)))
        .collect();
    TableSnapshot::new(table, columns, records)
}

fn document_record(document: &serde_json::Value) -> Record {
    Record::new().with(Table::DOCUMENT_COLUMN, document.to_string())
}

fn config_document(table: Table, rows: &[Record]) -> Option<serde_json::Value> {
    if table != Table::Config {
        return None;
    }
    rows.first().and_then(|row| row.json(Table::DOCUMENT_COLUMN))
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Replace bare `NaN`, `Infinity` and `-Infinity` tokens with `null`.
fn sanitize_non_finite(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = rest.chars().next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        } else if let Some(token) = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|token| rest.starts_with(token))
        {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}
