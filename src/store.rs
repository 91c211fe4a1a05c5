//! Table store facade.
//!
//! The only entry point callers need: `load`, `append`, `upsert`, `replace`
//! and the config-document helpers. Backend choice, schema reconciliation
//! and mirroring all happen behind it. Every result is an [`Outcome`] that
//! names the backend that served it and the warnings raised on the way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::SheetsCredentials;
use crate::config::{Config, RemoteConfig};
use crate::core::{Record, Table};
use crate::error::{Result, StoreError};
use crate::storage::{LocalBackend, Mutation, SheetsBackend, TableBackend, TableSnapshot};
use crate::sync::coordinator::StatusReport;
use crate::sync::{BackendSelector, Outcome, SyncCoordinator, SyncReport};

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertResult {
    pub record: Record,
    /// Position of the record in the table after the write.
    pub position: usize,
    /// True when an existing row was overwritten.
    pub replaced: bool,
}

pub struct TableStore {
    coordinator: SyncCoordinator,
    keys: HashMap<Table, Vec<String>>,
    locks: [Mutex<()>; Table::ALL.len()],
}

impl TableStore {
    pub fn builder(data_dir: impl Into<PathBuf>) -> TableStoreBuilder {
        TableStoreBuilder::new(data_dir.into())
    }

    /// Store for the data directory and credentials named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder(config.data_dir())
            .secrets(config.secrets_path())
            .remote_config(config.remote.clone());
        for table in Table::ALL {
            builder = builder.key(table, config.key_for(table));
        }
        builder.build()
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.coordinator.local().root()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Records of `table` in storage order. A table never written is empty.
    pub fn load(&self, table: Table) -> Result<Outcome<Vec<Record>>> {
        Ok(self.load_table(table)?.map(|snapshot| snapshot.records))
    }

    /// Like [`load`](Self::load), with the column schema.
    pub fn load_table(&self, table: Table) -> Result<Outcome<TableSnapshot>> {
        let _guard = self.lock(table);
        self.coordinator.read(table)
    }

    /// Add `record` at the end of `table`.
    ///
    /// Unseen columns extend the schema; the returned record holds every
    /// column of the table, empty where `record` had no value.
    pub fn append(&self, table: Table, record: Record) -> Result<Outcome<Record>> {
        let _guard = self.lock(table);
        let outcome = self.coordinator.write(table, Mutation::Append { record })?;
        stored_record(table, outcome.map(|applied| applied.record().cloned()))
    }

    /// Replace the first record matching `record` on the key columns, or append.
    ///
    /// Without explicit key columns the table's configured natural key is used.
    pub fn upsert(
        &self,
        table: Table,
        record: Record,
        key: Option<&[String]>,
    ) -> Result<Outcome<UpsertResult>> {
        let key = match key {
            Some(columns) if !columns.is_empty() => columns.to_vec(),
            _ => self.key_for(table),
        };
        if key.is_empty() {
            return Err(StoreError::schema_conflict(
                table.name(),
                "no key columns for upsert",
            ));
        }

        let _guard = self.lock(table);
        let outcome = self
            .coordinator
            .write(table, Mutation::Upsert { record, key })?;
        let replaced = outcome.value.replaced_existing();
        let position = outcome.value.position();
        let outcome = stored_record(table, outcome.map(|applied| applied.record().cloned()))?;
        let position = position.unwrap_or_default();
        Ok(outcome.map(|record| UpsertResult {
            record,
            position,
            replaced,
        }))
    }

    /// Overwrite the whole table with `records`.
    ///
    /// Existing columns survive even when no record uses them.
    pub fn replace(&self, table: Table, records: Vec<Record>) -> Result<Outcome<Vec<Record>>> {
        let _guard = self.lock(table);
        let outcome = self.coordinator.write(table, Mutation::Replace { records })?;
        Ok(outcome.map(|applied| applied.after.records))
    }

    /// JSON document held in the single `json_content` cell of `table`.
    pub fn load_document(&self, table: Table) -> Result<Outcome<Option<serde_json::Value>>> {
        let outcome = self.load(table)?;
        let document = outcome
            .value
            .iter()
            .find_map(|record| record.text(Table::DOCUMENT_COLUMN))
            .map(|raw| {
                serde_json::from_str(raw).map_err(|err| {
                    StoreError::malformed(table.name(), Table::DOCUMENT_COLUMN, err.to_string())
                })
            })
            .transpose()?;
        Ok(outcome.map(|_| document))
    }

    /// Store `document` as the only record of `table`.
    pub fn save_document(
        &self,
        table: Table,
        document: &serde_json::Value,
    ) -> Result<Outcome<serde_json::Value>> {
        if !document.is_object() {
            return Err(StoreError::malformed(
                table.name(),
                Table::DOCUMENT_COLUMN,
                "document must be a JSON object",
            ));
        }
        let encoded = serde_json::to_string(document)?;
        let record = Record::new().with(Table::DOCUMENT_COLUMN, encoded);
        let outcome = self.replace(table, vec![record])?;
        Ok(outcome.map(|_| document.clone()))
    }

    /// Re-probe the remote and replay queued mirrors.
    pub fn sync(&self, tables: &[Table]) -> Result<Outcome<SyncReport>> {
        let _guards: Vec<_> = Table::ALL.iter().map(|table| self.lock(*table)).collect();
        self.coordinator.sync(tables)
    }

    pub fn status(&self) -> Result<StatusReport> {
        self.coordinator.status()
    }

    /// Forget the connectivity verdict; the remote is probed again on next use.
    pub fn reset_connectivity(&self) {
        self.coordinator.selector().reset();
    }

    /// Key columns used by [`upsert`](Self::upsert) when none are given.
    #[must_use]
    pub fn key_for(&self, table: Table) -> Vec<String> {
        self.keys.get(&table).cloned().unwrap_or_else(|| {
            table
                .default_key()
                .iter()
                .map(|column| (*column).to_string())
                .collect()
        })
    }

    fn lock(&self, table: Table) -> MutexGuard<'_, ()> {
        self.locks[table as usize].lock()
    }
}

/// The record an append or upsert produced.
fn stored_record(table: Table, outcome: Outcome<Option<Record>>) -> Result<Outcome<Record>> {
    if outcome.value.is_none() {
        return Err(StoreError::StorageUnavailable(format!(
            "{table}: write produced no record"
        )));
    }
    Ok(outcome.map(Option::unwrap_or_default))
}

/// Builder for [`TableStore`].
pub struct TableStoreBuilder {
    data_dir: PathBuf,
    remote: Option<Box<dyn TableBackend>>,
    secrets_path: Option<PathBuf>,
    remote_config: RemoteConfig,
    keys: HashMap<Table, Vec<String>>,
}

impl TableStoreBuilder {
    fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            remote: None,
            secrets_path: None,
            remote_config: RemoteConfig::default(),
            keys: HashMap::new(),
        }
    }

    /// Use `remote` instead of building a spreadsheet client from credentials.
    #[must_use]
    pub fn remote(mut self, remote: Box<dyn TableBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Credentials document; its absence means local-only.
    #[must_use]
    pub fn secrets(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn remote_config(mut self, remote_config: RemoteConfig) -> Self {
        self.remote_config = remote_config;
        self
    }

    /// Natural key of `table`; an empty list keeps the default.
    #[must_use]
    pub fn key(mut self, table: Table, columns: Vec<String>) -> Self {
        if !columns.is_empty() {
            self.keys.insert(table, columns);
        }
        self
    }

    pub fn build(self) -> Result<TableStore> {
        let local = LocalBackend::new(&self.data_dir);
        local.init()?;

        let selector = match self.remote {
            Some(remote) => BackendSelector::with_remote(remote),
            None => self.remote_from_credentials(),
        };
        debug!(
            data_dir = %self.data_dir.display(),
            remote = selector.remote_configured(),
            "table store ready"
        );

        Ok(TableStore {
            coordinator: SyncCoordinator::new(local, selector),
            keys: self.keys,
            locks: std::array::from_fn(|_| Mutex::new(())),
        })
    }

    fn remote_from_credentials(&self) -> BackendSelector {
        let Some(path) = self.secrets_path.as_deref() else {
            return BackendSelector::local_only();
        };
        let credentials = match SheetsCredentials::load(path) {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                debug!(path = %path.display(), "no credentials document, local-only");
                return BackendSelector::local_only();
            }
            Err(err) => return misconfigured(&err),
        };
        match SheetsBackend::new(&credentials, &self.remote_config) {
            Ok(backend) => BackendSelector::with_remote(Box::new(backend)),
            Err(err) => misconfigured(&err),
        }
    }
}

fn misconfigured(err: &StoreError) -> BackendSelector {
    warn!(error = %err, "credentials unusable, remote disabled");
    BackendSelector::misconfigured(err.to_string())
}
