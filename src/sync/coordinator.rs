//! Write-through and read-refresh between the two backends.
//!
//! Writes are applied to the local files first, then mirrored. Reads make the
//! remote the source of truth and refresh the local copy from it. A remote
//! failure never fails the call: it demotes the selector, queues the mirror
//! in the outbox and shows up as a [`Warning`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::outbox::{Outbox, PendingMirror};
use super::selector::{BackendHandle, BackendSelector, ConnectivityState};
use super::{Outcome, Warning, WarningKind};
use crate::core::{ColumnSchema, SchemaRegistry, Table, reconcile};
use crate::error::Result;
use crate::storage::{Applied, BackendKind, LocalBackend, Mutation, TableBackend, TableSnapshot};

/// Result of an explicit catch-up on one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSync {
    pub table: Table,
    pub replayed: usize,
    pub rows: usize,
    pub pending: usize,
    pub served_by: BackendKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub tables: Vec<TableSync>,
}

impl SyncReport {
    #[must_use]
    pub fn replayed(&self) -> usize {
        self.tables.iter().map(|t| t.replayed).sum()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.tables.iter().map(|t| t.pending).sum()
    }
}

/// Snapshot of the synchronization state, for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub remote_configured: bool,
    pub connectivity: ConnectivityState,
    pub handles: Vec<BackendHandle>,
    pub pending: BTreeMap<Table, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_replay: Option<DateTime<Utc>>,
    pub schemas: BTreeMap<Table, ColumnSchema>,
}

pub struct SyncCoordinator {
    local: LocalBackend,
    selector: BackendSelector,
    outbox: Outbox,
    registry: SchemaRegistry,
}

impl SyncCoordinator {
    pub fn new(local: LocalBackend, selector: BackendSelector) -> Self {
        let outbox = Outbox::new(local.root());
        Self {
            local,
            selector,
            outbox,
            registry: SchemaRegistry::new(),
        }
    }

    #[must_use]
    pub const fn local(&self) -> &LocalBackend {
        &self.local
    }

    #[must_use]
    pub const fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Current content of `table`.
    pub fn read(&self, table: Table) -> Result<Outcome<TableSnapshot>> {
        let mut warnings = Vec::new();
        let (snapshot, served_by, _) = self.read_inner(table, &mut warnings)?;
        Ok(Outcome::new(snapshot, served_by, warnings))
    }

    /// Apply `mutation` locally, then mirror it.
    pub fn write(&self, table: Table, mutation: Mutation) -> Result<Outcome<Applied>> {
        let mut warnings = Vec::new();
        let mut remote = self.remote_for(table, &mut warnings);

        if let Some(backend) = remote {
            let current = self.local.read_all(table)?;
            if let Err(err) = self.replay(table, backend, &current, &mut warnings) {
                if !err.is_remote() {
                    return Err(err);
                }
                warnings.push(self.selector.demote(table, &err.to_string()));
                remote = None;
            }
        }

        let before = self.local.read_all(table)?;
        let applied = before.apply(&mutation)?;
        self.local.commit(&before, &applied)?;
        self.registry.observe(table, &applied.after.columns);

        let served_by = match remote {
            Some(backend) => match self.mirror(table, backend, &mutation, &applied.after) {
                Ok(()) => BackendKind::Remote,
                Err(err) => {
                    let reason = err.to_string();
                    if err.is_remote() {
                        warnings.push(self.selector.demote(table, &reason));
                    } else {
                        warn!(table = %table, error = %reason, "mirror rejected, queued for retry");
                    }
                    let entry = self.defer(table, mutation, &reason, &mut warnings)?;
                    // A remote failure may have come after the write landed.
                    if err.is_remote() {
                        self.outbox.record_attempt(&entry.id)?;
                    }
                    BackendKind::Local
                }
            },
            None => {
                if self.selector.remote_configured() {
                    self.defer(table, mutation, "remote unavailable", &mut warnings)?;
                }
                BackendKind::Local
            }
        };

        Ok(Outcome::new(applied, served_by, warnings))
    }

    /// Re-probe the remote and catch up every table with queued mirrors.
    ///
    /// With no explicit tables, every table with pending entries is synced.
    pub fn sync(&self, tables: &[Table]) -> Result<Outcome<SyncReport>> {
        self.selector.reset();
        let mut warnings = Vec::new();
        let targets: Vec<Table> = if tables.is_empty() {
            self.outbox.summary()?.into_keys().collect()
        } else {
            tables.to_vec()
        };

        let mut report = SyncReport::default();
        let mut served_by = BackendKind::Remote;
        if targets.is_empty() {
            warnings.extend(self.selector.ensure_probed(None));
            if self.selector.state() != ConnectivityState::Healthy {
                served_by = BackendKind::Local;
            }
        }
        for table in targets {
            let (snapshot, kind, replayed) = self.read_inner(table, &mut warnings)?;
            if kind == BackendKind::Local {
                served_by = BackendKind::Local;
            }
            report.tables.push(TableSync {
                table,
                replayed,
                rows: snapshot.records.len(),
                pending: self.outbox.pending_for(table)?.len(),
                served_by: kind,
            });
        }
        Ok(Outcome::new(report, served_by, warnings))
    }

    pub fn status(&self) -> Result<StatusReport> {
        self.selector.ensure_probed(None);
        Ok(StatusReport {
            remote_configured: self.selector.remote_configured(),
            connectivity: self.selector.state(),
            handles: self.selector.handles(),
            pending: self.outbox.summary()?,
            last_replay: self.outbox.last_replay()?,
            schemas: self.registry.snapshot().into_iter().collect(),
        })
    }

    fn read_inner(
        &self,
        table: Table,
        warnings: &mut Vec<Warning>,
    ) -> Result<(TableSnapshot, BackendKind, usize)> {
        let local = self.local.read_all(table)?;
        let Some(remote) = self.remote_for(table, warnings) else {
            if self.selector.remote_configured() {
                warnings.push(Warning::new(
                    WarningKind::ServedLocal,
                    Some(table),
                    "remote unavailable, serving the local copy",
                ));
            }
            self.registry.observe(table, &local.columns);
            return Ok((local, BackendKind::Local, 0));
        };

        let replayed = match self.replay(table, remote, &local, warnings) {
            Ok(replayed) => replayed,
            Err(err) if err.is_remote() => {
                warnings.push(self.selector.demote(table, &err.to_string()));
                return Ok((local, BackendKind::Local, 0));
            }
            Err(err) => return Err(err),
        };

        let remote_snapshot = match remote.read_all(table) {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_remote() => {
                warnings.push(self.selector.demote(table, &err.to_string()));
                return Ok((local, BackendKind::Local, replayed));
            }
            Err(err) => return Err(err),
        };

        if remote_snapshot.is_vacant() {
            self.registry.observe(table, &local.columns);
            if local.is_empty() {
                return Ok((local, BackendKind::Remote, replayed));
            }
            return match self.migrate(remote, &local) {
                Ok(()) => Ok((local, BackendKind::Remote, replayed)),
                Err(err) if err.is_remote() => {
                    warnings.push(self.selector.demote(table, &err.to_string()));
                    Ok((local, BackendKind::Local, replayed))
                }
                Err(err) => Err(err),
            };
        }

        let refreshed = self.refresh_local(&local, remote_snapshot)?;
        Ok((refreshed, BackendKind::Remote, replayed))
    }

    /// Overwrite the local copy with the remote rows, keeping local columns.
    fn refresh_local(&self, local: &TableSnapshot, remote: TableSnapshot) -> Result<TableSnapshot> {
        let table = local.table;
        let canonical = self.registry.observe(table, &local.columns);
        let columns = reconcile(table, &canonical, remote.columns.iter()).columns;
        let records = remote
            .records
            .iter()
            .map(|record| record.conform(table, &columns))
            .collect::<Result<Vec<_>>>()?;
        let refreshed = TableSnapshot {
            table,
            columns,
            records,
            row_numbers: remote.row_numbers,
            compact_header: true,
        };

        if refreshed.columns != local.columns || refreshed.records != local.records {
            self.local.write_all(&refreshed)?;
        }
        self.registry.observe(table, &refreshed.columns);
        Ok(refreshed)
    }

    fn migrate(&self, remote: &dyn TableBackend, local: &TableSnapshot) -> Result<()> {
        remote.write_all(local)?;
        info!(
            table = %local.table,
            rows = local.records.len(),
            "remote worksheet was vacant, local table migrated"
        );
        Ok(())
    }

    fn mirror(
        &self,
        table: Table,
        remote: &dyn TableBackend,
        mutation: &Mutation,
        local_after: &TableSnapshot,
    ) -> Result<()> {
        let before = remote.read_all(table)?;
        if before.is_vacant() {
            return self.migrate(remote, local_after);
        }
        self.apply_remote(remote, &before, mutation)
    }

    /// Apply `mutation` to the remote's current rows under the canonical schema.
    fn apply_remote(
        &self,
        remote: &dyn TableBackend,
        before: &TableSnapshot,
        mutation: &Mutation,
    ) -> Result<()> {
        let table = before.table;
        let canonical = self.registry.get(table).unwrap_or_default();
        let mut base = before.clone();
        base.columns = reconcile(table, &before.columns, canonical.iter()).columns;
        let applied = base.apply(mutation)?;
        remote.commit(before, &applied)
    }

    /// Replay queued mirrors of `table`, oldest first.
    ///
    /// Stops at the first remote failure; entries that the remote rejects for
    /// any other reason are dropped with a warning.
    fn replay(
        &self,
        table: Table,
        remote: &dyn TableBackend,
        local: &TableSnapshot,
        warnings: &mut Vec<Warning>,
    ) -> Result<usize> {
        let pending = self.outbox.pending_for(table)?;
        if pending.is_empty() {
            return Ok(0);
        }

        self.registry.observe(table, &local.columns);
        if remote.read_all(table)?.is_vacant() {
            self.migrate(remote, local)?;
            let replayed = self.outbox.complete_table(table)?;
            info!(table = %table, replayed = replayed, "pending mirrors replaced by migration");
            return Ok(replayed);
        }

        let mut replayed = 0;
        let window = pending.len();
        for entry in pending {
            self.outbox.record_attempt(&entry.id)?;
            let before = remote.read_all(table)?;
            if entry.attempts > 0 && already_landed(&before, &entry.mutation, window) {
                debug!(table = %table, id = %entry.id, "queued append already on the remote");
                self.outbox.complete(&entry.id)?;
                replayed += 1;
                continue;
            }
            match self.apply_remote(remote, &before, &entry.mutation) {
                Ok(()) => {
                    self.outbox.complete(&entry.id)?;
                    replayed += 1;
                }
                Err(err) if err.is_remote() => return Err(err),
                Err(err) => {
                    warn!(table = %table, id = %entry.id, error = %err, "dropping queued mirror");
                    warnings.push(Warning::new(
                        WarningKind::MirrorDropped,
                        Some(table),
                        format!("queued {} dropped: {err}", entry.mutation.name()),
                    ));
                    self.outbox.complete(&entry.id)?;
                }
            }
        }
        info!(table = %table, replayed = replayed, "pending mirrors replayed");
        Ok(replayed)
    }

    fn remote_for(&self, table: Table, warnings: &mut Vec<Warning>) -> Option<&dyn TableBackend> {
        let (handle, warning) = self.selector.select(table);
        warnings.extend(warning);
        match handle.kind {
            BackendKind::Remote => self.selector.remote(),
            BackendKind::Local => None,
        }
    }

    fn defer(
        &self,
        table: Table,
        mutation: Mutation,
        reason: &str,
        warnings: &mut Vec<Warning>,
    ) -> Result<PendingMirror> {
        let entry = self.outbox.enqueue(table, mutation)?;
        warnings.push(Warning::new(
            WarningKind::MirrorDeferred,
            Some(table),
            format!("saved locally, mirror queued ({reason})"),
        ));
        Ok(entry)
    }
}

/// An append whose earlier attempt may have reached the remote counts as
/// landed when its record is among the last `window` remote rows. Upserts and
/// replacements are idempotent and always replayed.
fn already_landed(remote: &TableSnapshot, mutation: &Mutation, window: usize) -> bool {
    match mutation {
        Mutation::Append { record } => remote.records.iter().rev().take(window).any(|row| row == record),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;
    use crate::test_utils::{MemorySheets, RemoteFault};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn coordinator(sheets: &Arc<MemorySheets>) -> (TempDir, SyncCoordinator) {
        let temp = TempDir::new().unwrap();
        let local = LocalBackend::new(temp.path());
        let selector = BackendSelector::with_remote(Box::new(Arc::clone(sheets)));
        (temp, SyncCoordinator::new(local, selector))
    }

    fn append(parcelle: &str) -> Mutation {
        Mutation::Append {
            record: Record::new().with("parcelle", parcelle),
        }
    }

    #[test]
    fn write_goes_local_then_remote() {
        let sheets = Arc::new(MemorySheets::new());
        let (_temp, coordinator) = coordinator(&sheets);

        let outcome = coordinator.write(Table::Traitements, append("A1")).unwrap();
        assert_eq!(outcome.served_by, BackendKind::Remote);
        assert!(outcome.warnings.is_empty());
        assert_eq!(coordinator.local().read_all(Table::Traitements).unwrap().records.len(), 1);
        assert_eq!(sheets.rows(Table::Traitements).len(), 1);
    }

    #[test]
    fn remote_failure_queues_the_mirror() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.seed(Table::Traitements, &["parcelle"], vec![]);
        let (_temp, coordinator) = coordinator(&sheets);
        coordinator.read(Table::Traitements).unwrap();
        sheets.inject(RemoteFault::Operation("append_row".into()));

        let outcome = coordinator.write(Table::Traitements, append("A1")).unwrap();
        assert_eq!(outcome.served_by, BackendKind::Local);
        let kinds: Vec<_> = outcome.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, [WarningKind::RemoteUnavailable, WarningKind::MirrorDeferred]);
        assert!(coordinator.outbox().has_pending(Table::Traitements).unwrap());
    }

    #[test]
    fn pending_mirrors_replay_before_reads() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.seed(Table::Traitements, &["parcelle"], vec![vec!["B7".into()]]);
        sheets.inject(RemoteFault::All);
        let (_temp, coordinator) = coordinator(&sheets);

        coordinator.write(Table::Traitements, append("A1")).unwrap();
        assert_eq!(sheets.rows(Table::Traitements).len(), 1);

        sheets.clear_faults();
        coordinator.selector().reset();
        let outcome = coordinator.read(Table::Traitements).unwrap();

        assert_eq!(outcome.served_by, BackendKind::Remote);
        let parcelles: Vec<_> = outcome
            .value
            .records
            .iter()
            .map(|r| r.text("parcelle").unwrap().to_string())
            .collect();
        assert_eq!(parcelles, ["B7", "A1"]);
        assert!(!coordinator.outbox().has_pending(Table::Traitements).unwrap());
    }

    #[test]
    fn vacant_remote_receives_local_rows() {
        let sheets = Arc::new(MemorySheets::new());
        let (temp, coordinator) = coordinator(&sheets);
        let seed = LocalBackend::new(temp.path());
        let before = seed.read_all(Table::Meteo).unwrap();
        let applied = before
            .apply(&Mutation::Append {
                record: Record::new().with("date", "2024-05-01").with("tmax", 24),
            })
            .unwrap();
        seed.commit(&before, &applied).unwrap();

        let outcome = coordinator.read(Table::Meteo).unwrap();
        assert_eq!(outcome.value.records.len(), 1);
        assert_eq!(sheets.header(Table::Meteo), ["date", "tmax"]);
        assert_eq!(sheets.rows(Table::Meteo).len(), 1);
    }

    #[test]
    fn read_refresh_keeps_local_only_columns() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.seed(Table::Gdd, &["date", "gdd"], vec![vec!["2024-05-01".into(), 3.5.into()]]);
        let (temp, coordinator) = coordinator(&sheets);
        LocalBackend::new(temp.path())
            .write_all(&TableSnapshot::new(
                Table::Gdd,
                ColumnSchema::from_columns(["date", "station"]),
                vec![],
            ))
            .unwrap();

        let outcome = coordinator.read(Table::Gdd).unwrap();
        assert_eq!(outcome.value.columns.as_slice(), ["date", "station", "gdd"]);
        let local = coordinator.local().read_all(Table::Gdd).unwrap();
        assert_eq!(local.records.len(), 1);
        assert_eq!(local.columns.as_slice(), ["date", "station", "gdd"]);
    }

    #[test]
    fn status_reports_pending_counts() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.inject(RemoteFault::All);
        let (_temp, coordinator) = coordinator(&sheets);
        coordinator.write(Table::Traitements, append("A1")).unwrap();

        let status = coordinator.status().unwrap();
        assert!(status.remote_configured);
        assert_eq!(status.pending.get(&Table::Traitements), Some(&1));
        assert!(matches!(status.connectivity, ConnectivityState::Demoted { .. }));
    }

    #[test]
    fn explicit_sync_reprobes_and_drains() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.inject(RemoteFault::All);
        let (_temp, coordinator) = coordinator(&sheets);
        coordinator.write(Table::Traitements, append("A1")).unwrap();
        coordinator.write(Table::Traitements, append("A2")).unwrap();

        sheets.clear_faults();
        let outcome = coordinator.sync(&[]).unwrap();
        assert_eq!(outcome.served_by, BackendKind::Remote);
        assert_eq!(outcome.value.pending(), 0);
        assert_eq!(sheets.rows(Table::Traitements).len(), 2);
    }

    #[test]
    fn landed_append_with_a_lost_reply_is_not_duplicated() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.seed(Table::Traitements, &["parcelle"], vec![vec!["B7".into()]]);
        let (_temp, coordinator) = coordinator(&sheets);
        coordinator.read(Table::Traitements).unwrap();
        sheets.inject(RemoteFault::LostReply("append_row".into()));

        let outcome = coordinator.write(Table::Traitements, append("A1")).unwrap();
        assert_eq!(outcome.served_by, BackendKind::Local);
        assert_eq!(sheets.rows(Table::Traitements).len(), 2);

        sheets.clear_faults();
        let report = coordinator.sync(&[Table::Traitements]).unwrap().value;
        assert_eq!(report.replayed(), 1);
        assert_eq!(report.pending(), 0);
        let parcelles: Vec<_> = sheets
            .records(Table::Traitements)
            .iter()
            .map(|r| r.text("parcelle").unwrap().to_string())
            .collect();
        assert_eq!(parcelles, ["B7", "A1"]);
    }

    #[test]
    fn attempted_append_that_never_landed_is_replayed() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.seed(Table::Traitements, &["parcelle"], vec![]);
        let (_temp, coordinator) = coordinator(&sheets);
        coordinator.read(Table::Traitements).unwrap();
        sheets.inject(RemoteFault::Operation("append_row".into()));

        coordinator.write(Table::Traitements, append("A1")).unwrap();
        let queued = coordinator.outbox().pending_for(Table::Traitements).unwrap();
        assert_eq!(queued[0].attempts, 1);
        assert!(sheets.rows(Table::Traitements).is_empty());

        sheets.clear_faults();
        coordinator.sync(&[Table::Traitements]).unwrap();
        assert_eq!(sheets.records(Table::Traitements).len(), 1);
        assert!(!coordinator.outbox().has_pending(Table::Traitements).unwrap());
    }
}
