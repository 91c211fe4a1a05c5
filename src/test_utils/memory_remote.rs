//! In-memory stand-in for the remote spreadsheet.
//!
//! Keeps one value grid per worksheet and goes through the same grid
//! decoding as [`SheetsBackend`](crate::storage::SheetsBackend), so blank
//! rows, row numbers and header handling behave like the real service.
//! Faults can be injected to exercise the fallback paths.
//!
//! ```rust,ignore
//! let sheets = Arc::new(MemorySheets::new());
//! sheets.inject(RemoteFault::Operation("append_row".into()));
//! let store = TableStore::builder(dir).remote(Box::new(Arc::clone(&sheets))).build()?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::{ColumnSchema, Record, Table, Value};
use crate::error::{Result, StoreError};
use crate::storage::sheets::{cell_to_value, data_row, grid_to_snapshot, header_row};
use crate::storage::{BackendKind, TableBackend, TableSnapshot};

type Grid = Vec<Vec<serde_json::Value>>;

/// Failure to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFault {
    /// Every operation fails, probes included.
    All,
    /// Only the named trait method fails (`"read_all"`, `"append_row"`, ...).
    Operation(String),
    /// Every operation touching this table fails.
    Table(Table),
    /// The named write is applied, then reported as failed.
    LostReply(String),
}

#[derive(Debug, Default)]
pub struct MemorySheets {
    grids: Mutex<HashMap<Table, Grid>>,
    faults: Mutex<Vec<RemoteFault>>,
    probes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemorySheets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a worksheet with `header` and `rows`.
    pub fn seed(&self, table: Table, header: &[&str], rows: Vec<Vec<Value>>) {
        let mut grid: Grid = vec![header.iter().map(|h| serde_json::json!(h)).collect()];
        grid.extend(
            rows.into_iter()
                .map(|row| row.iter().map(Value::to_json).collect::<Vec<_>>()),
        );
        self.grids.lock().insert(table, grid);
    }

    /// Append a raw row, bypassing fault injection.
    pub fn push_raw(&self, table: Table, row: Vec<serde_json::Value>) {
        self.grids.lock().entry(table).or_default().push(row);
    }

    pub fn inject(&self, fault: RemoteFault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Header cells of a worksheet, as text.
    #[must_use]
    pub fn header(&self, table: Table) -> Vec<String> {
        self.grids
            .lock()
            .get(&table)
            .and_then(|grid| grid.first())
            .map(|row| {
                row.iter()
                    .map(|cell| cell_to_value(cell).cell_text().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Data rows of a worksheet, blank rows included.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Vec<Value>> {
        self.grids
            .lock()
            .get(&table)
            .map(|grid| {
                grid.iter()
                    .skip(1)
                    .map(|row| row.iter().map(cell_to_value).collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decoded records of a worksheet.
    #[must_use]
    pub fn records(&self, table: Table) -> Vec<Record> {
        let grids = self.grids.lock();
        let grid = grids.get(&table).map(Vec::as_slice).unwrap_or_default();
        grid_to_snapshot(table, grid).records
    }

    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of successful write operations of any kind.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, op: &str, table: Option<Table>) -> Result<()> {
        let faults = self.faults.lock();
        let hit = faults.iter().any(|fault| match fault {
            RemoteFault::All => true,
            RemoteFault::Operation(name) => name == op,
            RemoteFault::Table(target) => Some(*target) == table,
            RemoteFault::LostReply(_) => false,
        });
        if hit {
            return Err(StoreError::RemoteUnavailable(format!("injected fault: {op}")));
        }
        Ok(())
    }

    fn reply(&self, op: &str) -> Result<()> {
        let lost = self
            .faults
            .lock()
            .iter()
            .any(|fault| matches!(fault, RemoteFault::LostReply(name) if name == op));
        if lost {
            return Err(StoreError::RemoteUnavailable(format!("reply lost: {op}")));
        }
        Ok(())
    }

    fn written(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl TableBackend for MemorySheets {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check("probe", None)
    }

    fn read_all(&self, table: Table) -> Result<TableSnapshot> {
        self.check("read_all", Some(table))?;
        let grids = self.grids.lock();
        let grid = grids.get(&table).map(Vec::as_slice).unwrap_or_default();
        Ok(grid_to_snapshot(table, grid))
    }

    fn write_all(&self, snapshot: &TableSnapshot) -> Result<()> {
        self.check("write_all", Some(snapshot.table))?;
        let mut grid = vec![header_row(&snapshot.columns)];
        grid.extend(
            snapshot
                .records
                .iter()
                .map(|record| data_row(&snapshot.columns, record)),
        );
        self.grids.lock().insert(snapshot.table, grid);
        self.written();
        Ok(())
    }

    fn overwrite_header(&self, table: Table, columns: &ColumnSchema) -> Result<()> {
        self.check("overwrite_header", Some(table))?;
        let mut grids = self.grids.lock();
        let grid = grids.entry(table).or_default();
        let header = header_row(columns);
        match grid.first_mut() {
            Some(first) => *first = header,
            None => grid.push(header),
        }
        self.written();
        Ok(())
    }

    fn append_row(&self, table: Table, columns: &ColumnSchema, record: &Record) -> Result<()> {
        self.check("append_row", Some(table))?;
        let mut grids = self.grids.lock();
        let grid = grids.entry(table).or_default();
        while grid.len() > 1 && grid.last().is_some_and(|row| is_blank(row)) {
            grid.pop();
        }
        grid.push(data_row(columns, record));
        self.written();
        self.reply("append_row")
    }

    fn update_row(
        &self,
        before: &TableSnapshot,
        index: usize,
        columns: &ColumnSchema,
        record: &Record,
    ) -> Result<()> {
        self.check("update_row", Some(before.table))?;
        let row = before.row_number(index);
        let mut grids = self.grids.lock();
        let grid = grids.entry(before.table).or_default();
        if grid.len() < row {
            grid.resize_with(row, Vec::new);
        }
        grid[row - 1] = data_row(columns, record);
        self.written();
        self.reply("update_row")
    }
}

fn is_blank(row: &[serde_json::Value]) -> bool {
    row.iter().all(|cell| cell_to_value(cell).is_empty())
}
