//! Backend abstraction shared by the local files and the remote spreadsheet.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{ColumnSchema, Record, Table, reconcile, reconcile_records};
use crate::error::Result;

/// Which medium served or stored a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// A write, as requested by a caller and as queued for mirroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Append { record: Record },
    Upsert { record: Record, key: Vec<String> },
    Replace { records: Vec<Record> },
}

impl Mutation {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Append { .. } => "append",
            Self::Upsert { .. } => "upsert",
            Self::Replace { .. } => "replace",
        }
    }
}

/// Which rows a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Appended(usize),
    Updated(usize),
    Replaced,
}

/// Full content of one table on one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub table: Table,
    pub columns: ColumnSchema,
    /// Records conformed to `columns`, in storage order.
    pub records: Vec<Record>,
    /// 1-based storage row of each record, when the backend has gaps.
    pub row_numbers: Vec<usize>,
    /// False when the stored header has blank or repeated cells, so column
    /// `i` of `columns` is not physical column `i`.
    pub compact_header: bool,
}

impl TableSnapshot {
    #[must_use]
    pub fn empty(table: Table) -> Self {
        Self {
            table,
            columns: ColumnSchema::new(),
            records: Vec::new(),
            row_numbers: Vec::new(),
            compact_header: true,
        }
    }

    #[must_use]
    pub fn new(table: Table, columns: ColumnSchema, records: Vec<Record>) -> Self {
        Self {
            table,
            columns,
            records,
            row_numbers: Vec::new(),
            compact_header: true,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// No header at all, or a header without the table's mandatory column.
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        self.columns.is_empty()
            || self
                .table
                .mandatory_column()
                .is_some_and(|column| !self.columns.contains(column))
    }

    /// Storage row of record `index`; the header occupies row 1.
    #[must_use]
    pub fn row_number(&self, index: usize) -> usize {
        self.row_numbers.get(index).copied().unwrap_or(index + 2)
    }

    /// First record whose key matches.
    #[must_use]
    pub fn position_of(&self, key_columns: &[String], key: &[String]) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.matches_key(key_columns, key))
    }

    /// Compute the snapshot that results from `mutation`.
    ///
    /// Nothing is written; a rejected mutation leaves no trace.
    pub fn apply(&self, mutation: &Mutation) -> Result<Applied> {
        let table = self.table;
        match mutation {
            Mutation::Append { record } => {
                record.validate(table)?;
                let mut after = self.extended(&[record])?;
                after.records.push(record.conform(table, &after.columns)?);
                let index = after.records.len() - 1;
                Ok(Applied {
                    after,
                    change: RowChange::Appended(index),
                })
            }
            Mutation::Upsert { record, key } => {
                record.validate(table)?;
                let wanted = record.key_of(table, key)?;
                let mut after = self.extended(&[record])?;
                let conformed = record.conform(table, &after.columns)?;
                let change = match self.position_of(key, &wanted) {
                    Some(index) => {
                        after.records[index] = conformed;
                        RowChange::Updated(index)
                    }
                    None => {
                        after.records.push(conformed);
                        RowChange::Appended(after.records.len() - 1)
                    }
                };
                Ok(Applied { after, change })
            }
            Mutation::Replace { records } => {
                for record in records {
                    record.validate(table)?;
                }
                let columns = reconcile_records(table, &self.columns, records).columns;
                let records = records
                    .iter()
                    .map(|record| record.conform(table, &columns))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Applied {
                    after: Self::new(table, columns, records),
                    change: RowChange::Replaced,
                })
            }
        }
    }

    /// Copy with the columns of `records` merged in and rows back-filled.
    fn extended(&self, records: &[&Record]) -> Result<Self> {
        let merged = reconcile(
            self.table,
            &self.columns,
            records.iter().flat_map(|record| record.columns()),
        );
        if !merged.schema_changed {
            return Ok(self.clone());
        }
        let records = self
            .records
            .iter()
            .map(|record| record.conform(self.table, &merged.columns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table: self.table,
            columns: merged.columns,
            records,
            row_numbers: self.row_numbers.clone(),
            compact_header: self.compact_header,
        })
    }
}

/// Outcome of [`TableSnapshot::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub after: TableSnapshot,
    pub change: RowChange,
}

impl Applied {
    /// The record as stored, for appends and upserts.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.position().and_then(|index| self.after.records.get(index))
    }

    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        match self.change {
            RowChange::Appended(index) | RowChange::Updated(index) => Some(index),
            RowChange::Replaced => None,
        }
    }

    #[must_use]
    pub const fn replaced_existing(&self) -> bool {
        matches!(self.change, RowChange::Updated(_))
    }
}

/// A durable medium holding one tabular dataset per table.
///
/// Implementations never reorder rows and never drop columns.
pub trait TableBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap reachability check.
    fn probe(&self) -> Result<()>;

    /// Whole table. A table that was never written is an empty snapshot.
    fn read_all(&self, table: Table) -> Result<TableSnapshot>;

    /// Replace header and every row.
    fn write_all(&self, snapshot: &TableSnapshot) -> Result<()>;

    fn overwrite_header(&self, table: Table, columns: &ColumnSchema) -> Result<()>;

    fn append_row(&self, table: Table, columns: &ColumnSchema, record: &Record) -> Result<()>;

    /// Overwrite record `index` of `before`, a snapshot read from this backend.
    fn update_row(
        &self,
        before: &TableSnapshot,
        index: usize,
        columns: &ColumnSchema,
        record: &Record,
    ) -> Result<()>;

    /// Persist `applied`, computed from `before`, with row-level writes.
    ///
    /// The header is extended first so data rows always land under the
    /// reconciled column order. A header with gaps is compacted by a full
    /// rewrite, since row writes address columns by position.
    fn commit(&self, before: &TableSnapshot, applied: &Applied) -> Result<()> {
        let after = &applied.after;
        if !before.compact_header {
            return self.write_all(after);
        }
        match applied.change {
            RowChange::Replaced => self.write_all(after),
            RowChange::Appended(index) => {
                if after.columns != before.columns {
                    self.overwrite_header(after.table, &after.columns)?;
                }
                self.append_row(after.table, &after.columns, &after.records[index])
            }
            RowChange::Updated(index) => {
                if after.columns != before.columns {
                    self.overwrite_header(after.table, &after.columns)?;
                }
                self.update_row(before, index, &after.columns, &after.records[index])
            }
        }
    }
}

impl<T: TableBackend + ?Sized> TableBackend for Arc<T> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn probe(&self) -> Result<()> {
        (**self).probe()
    }

    fn read_all(&self, table: Table) -> Result<TableSnapshot> {
        (**self).read_all(table)
    }

    fn write_all(&self, snapshot: &TableSnapshot) -> Result<()> {
        (**self).write_all(snapshot)
    }

    fn overwrite_header(&self, table: Table, columns: &ColumnSchema) -> Result<()> {
        (**self).overwrite_header(table, columns)
    }

    fn append_row(&self, table: Table, columns: &ColumnSchema, record: &Record) -> Result<()> {
        (**self).append_row(table, columns, record)
    }

    fn update_row(
        &self,
        before: &TableSnapshot,
        index: usize,
        columns: &ColumnSchema,
        record: &Record,
    ) -> Result<()> {
        (**self).update_row(before, index, columns, record)
    }

    fn commit(&self, before: &TableSnapshot, applied: &Applied) -> Result<()> {
        (**self).commit(before, applied)
    }
}
