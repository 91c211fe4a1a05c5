//! Persistent queue of writes not yet mirrored to the remote spreadsheet.
//!
//! Lives at `<data_dir>/.sync/outbox.json`. Every rewrite happens under an
//! exclusive `fs2` lock on `outbox.lock`, so processes sharing a data
//! directory never interleave their updates.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::Table;
use crate::error::{Result, StoreError};
use crate::storage::Mutation;
use crate::utils::fs::{ensure_dir, read_optional, write_atomic};

/// One queued mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMirror {
    pub id: String,
    pub table: Table,
    pub mutation: Mutation,
    pub queued_at: DateTime<Utc>,
    pub hostname: String,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OutboxState {
    #[serde(default)]
    pending: Vec<PendingMirror>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_replay: Option<DateTime<Utc>>,
}

/// Handle on the outbox file of one data directory.
#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    const FILENAME: &'static str = "outbox.json";
    const LOCK_FILENAME: &'static str = "outbox.lock";

    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(".sync"),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILENAME)
    }

    /// Queue `mutation` behind any earlier entry of the same table.
    pub fn enqueue(&self, table: Table, mutation: Mutation) -> Result<PendingMirror> {
        let entry = PendingMirror {
            id: Uuid::new_v4().to_string(),
            table,
            mutation,
            queued_at: Utc::now(),
            hostname: current_hostname(),
            attempts: 0,
        };
        self.update(|state| state.pending.push(entry.clone()))?;
        debug!(table = %table, id = %entry.id, op = entry.mutation.name(), "mirror queued");
        Ok(entry)
    }

    /// Entries of `table`, oldest first.
    pub fn pending_for(&self, table: Table) -> Result<Vec<PendingMirror>> {
        Ok(self
            .load()?
            .pending
            .into_iter()
            .filter(|entry| entry.table == table)
            .collect())
    }

    pub fn has_pending(&self, table: Table) -> Result<bool> {
        Ok(self.load()?.pending.iter().any(|entry| entry.table == table))
    }

    /// Drop a mirrored entry.
    pub fn complete(&self, id: &str) -> Result<()> {
        self.update(|state| {
            state.pending.retain(|entry| entry.id != id);
            state.last_replay = Some(Utc::now());
        })
    }

    /// Drop every entry of `table`, after the whole table was rewritten remotely.
    pub fn complete_table(&self, table: Table) -> Result<usize> {
        let mut removed = 0;
        self.update(|state| {
            let before = state.pending.len();
            state.pending.retain(|entry| entry.table != table);
            removed = before - state.pending.len();
            state.last_replay = Some(Utc::now());
        })?;
        Ok(removed)
    }

    pub fn record_attempt(&self, id: &str) -> Result<()> {
        self.update(|state| {
            if let Some(entry) = state.pending.iter_mut().find(|entry| entry.id == id) {
                entry.attempts += 1;
            }
        })
    }

    /// Number of queued entries per table.
    pub fn summary(&self) -> Result<BTreeMap<Table, usize>> {
        let mut counts = BTreeMap::new();
        for entry in self.load()?.pending {
            *counts.entry(entry.table).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn last_replay(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load()?.last_replay)
    }

    fn load(&self) -> Result<OutboxState> {
        let path = self.path();
        let raw = read_optional(&path).map_err(|err| unavailable(&path, err))?;
        match raw {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).map_err(|err| unavailable(&path, err))
            }
            _ => Ok(OutboxState::default()),
        }
    }

    fn update(&self, change: impl FnOnce(&mut OutboxState)) -> Result<()> {
        let _lock = OutboxLock::acquire(&self.dir)?;
        let mut state = self.load()?;
        change(&mut state);
        let path = self.path();
        let rendered = serde_json::to_vec_pretty(&state)?;
        write_atomic(&path, &rendered).map_err(|err| unavailable(&path, err))
    }
}

/// Exclusive advisory lock, released on drop.
struct OutboxLock {
    file: File,
}

impl OutboxLock {
    fn acquire(dir: &Path) -> Result<Self> {
        ensure_dir(dir).map_err(|err| unavailable(dir, err))?;
        let path = dir.join(Outbox::LOCK_FILENAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| unavailable(&path, format!("open lock file: {err}")))?;
        file.lock_exclusive()
            .map_err(|err| unavailable(&path, format!("acquire exclusive lock: {err}")))?;
        Ok(Self { file })
    }
}

impl Drop for OutboxLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release outbox lock: {}", e);
        }
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::StorageUnavailable(format!("{}: {err}", path.display()))
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
