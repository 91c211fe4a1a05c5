//! Backend selection and connectivity state.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::{Warning, WarningKind};
use crate::core::Table;
use crate::storage::{BackendKind, TableBackend};

/// What this process knows about the remote spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectivityState {
    /// No credentials document: local-only.
    NotConfigured,
    /// Credentials present, not probed yet.
    Unprobed,
    Healthy,
    /// Remote unusable for the rest of the process, or until `reset`.
    Demoted { reason: String },
}

impl ConnectivityState {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not configured",
            Self::Unprobed => "not probed",
            Self::Healthy => "healthy",
            Self::Demoted { .. } => "demoted",
        }
    }
}

/// Binding of a table to the backend that currently serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendHandle {
    pub table: Table,
    pub kind: BackendKind,
}

/// Chooses Remote when configured and healthy, else Local.
pub struct BackendSelector {
    remote: Option<Box<dyn TableBackend>>,
    /// Why credentials exist but no remote could be built.
    broken: Option<String>,
    state: Mutex<ConnectivityState>,
    handles: Mutex<HashMap<Table, BackendHandle>>,
}

impl BackendSelector {
    #[must_use]
    pub fn local_only() -> Self {
        Self::build(None, None, ConnectivityState::NotConfigured)
    }

    #[must_use]
    pub fn with_remote(remote: Box<dyn TableBackend>) -> Self {
        Self::build(Some(remote), None, ConnectivityState::Unprobed)
    }

    /// Credentials exist but cannot be used; writes are still queued.
    #[must_use]
    pub fn misconfigured(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::build(
            None,
            Some(reason.clone()),
            ConnectivityState::Demoted { reason },
        )
    }

    fn build(
        remote: Option<Box<dyn TableBackend>>,
        broken: Option<String>,
        state: ConnectivityState,
    ) -> Self {
        Self {
            remote,
            broken,
            state: Mutex::new(state),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// True when credentials exist, usable or not.
    #[must_use]
    pub const fn remote_configured(&self) -> bool {
        self.remote.is_some() || self.broken.is_some()
    }

    #[must_use]
    pub fn remote(&self) -> Option<&dyn TableBackend> {
        self.remote.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.state.lock().clone()
    }

    /// Backend for `table`, probing the remote on first use.
    pub fn select(&self, table: Table) -> (BackendHandle, Option<Warning>) {
        if let Some(handle) = self.handles.lock().get(&table) {
            return (*handle, None);
        }

        let warning = self.ensure_probed(Some(table));
        let kind = match *self.state.lock() {
            ConnectivityState::Healthy => BackendKind::Remote,
            _ => BackendKind::Local,
        };

        let handle = BackendHandle { table, kind };
        self.handles.lock().insert(table, handle);
        (handle, warning)
    }

    /// Probe the remote if this process has not done so yet.
    pub fn ensure_probed(&self, table: Option<Table>) -> Option<Warning> {
        let mut warning = None;
        let mut state = self.state.lock();
        if *state == ConnectivityState::Unprobed {
            *state = self.run_probe(table, &mut warning);
        }
        warning
    }

    fn run_probe(&self, table: Option<Table>, warning: &mut Option<Warning>) -> ConnectivityState {
        let Some(remote) = self.remote.as_deref() else {
            return ConnectivityState::NotConfigured;
        };
        match remote.probe() {
            Ok(()) => {
                info!("remote spreadsheet reachable");
                ConnectivityState::Healthy
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(error = %reason, "remote probe failed, using local files");
                *warning = Some(Warning::new(
                    WarningKind::RemoteUnavailable,
                    table,
                    format!("remote probe failed: {reason}"),
                ));
                ConnectivityState::Demoted { reason }
            }
        }
    }

    /// Fall back to Local after a failed remote operation.
    pub fn demote(&self, table: Table, reason: &str) -> Warning {
        warn!(table = %table, error = %reason, "remote unavailable, demoting to local");
        *self.state.lock() = ConnectivityState::Demoted {
            reason: reason.to_string(),
        };
        self.handles.lock().clear();
        Warning::new(WarningKind::RemoteUnavailable, Some(table), reason.to_string())
    }

    /// Forget every handle and probe again on next use.
    pub fn reset(&self) {
        let next = match (&self.remote, &self.broken) {
            (Some(_), _) => ConnectivityState::Unprobed,
            (None, Some(reason)) => ConnectivityState::Demoted {
                reason: reason.clone(),
            },
            (None, None) => ConnectivityState::NotConfigured,
        };
        *self.state.lock() = next;
        self.handles.lock().clear();
    }

    /// Cached handles, in catalog order.
    #[must_use]
    pub fn handles(&self) -> Vec<BackendHandle> {
        let handles = self.handles.lock();
        Table::ALL
            .into_iter()
            .filter_map(|table| handles.get(&table).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemorySheets, RemoteFault};
    use std::sync::Arc;

    #[test]
    fn local_only_never_probes() {
        let selector = BackendSelector::local_only();
        let (handle, warning) = selector.select(Table::Meteo);
        assert_eq!(handle.kind, BackendKind::Local);
        assert!(warning.is_none());
        assert!(!selector.remote_configured());
        assert_eq!(selector.state(), ConnectivityState::NotConfigured);
    }

    #[test]
    fn healthy_probe_selects_remote_once() {
        let sheets = Arc::new(MemorySheets::new());
        let selector = BackendSelector::with_remote(Box::new(Arc::clone(&sheets)));

        assert_eq!(selector.select(Table::Meteo).0.kind, BackendKind::Remote);
        assert_eq!(selector.select(Table::Gdd).0.kind, BackendKind::Remote);
        assert_eq!(sheets.probe_count(), 1);
        assert_eq!(selector.handles().len(), 2);
    }

    #[test]
    fn failed_probe_demotes_with_warning() {
        let sheets = Arc::new(MemorySheets::new());
        sheets.inject(RemoteFault::All);
        let selector = BackendSelector::with_remote(Box::new(Arc::clone(&sheets)));

        let (handle, warning) = selector.select(Table::Meteo);
        assert_eq!(handle.kind, BackendKind::Local);
        assert_eq!(warning.unwrap().kind, WarningKind::RemoteUnavailable);
        assert!(matches!(selector.state(), ConnectivityState::Demoted { .. }));

        sheets.clear_faults();
        assert_eq!(selector.select(Table::Meteo).0.kind, BackendKind::Local);
        selector.reset();
        assert_eq!(selector.select(Table::Meteo).0.kind, BackendKind::Remote);
    }

    #[test]
    fn demote_clears_handles() {
        let selector = BackendSelector::with_remote(Box::new(MemorySheets::new()));
        selector.select(Table::Meteo);
        let warning = selector.demote(Table::Meteo, "timeout");
        assert_eq!(warning.table, Some(Table::Meteo));
        assert_eq!(selector.select(Table::Meteo).0.kind, BackendKind::Local);
    }

    #[test]
    fn misconfigured_stays_demoted_after_reset() {
        let selector = BackendSelector::misconfigured("private key rejected");
        assert!(selector.remote_configured());
        selector.reset();
        assert!(matches!(selector.state(), ConnectivityState::Demoted { reason } if reason.contains("key")));
    }
}
