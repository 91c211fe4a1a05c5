//! Layered configuration.
//!
//! Defaults, then the global file (`<config_dir>/vinestore/config.toml`),
//! then the project file (`<data_dir>/config.toml`), then `VINESTORE_*`
//! environment variables. An explicit `--config` path replaces both files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Table;
use crate::error::{Result, StoreError};

const DEFAULT_DATA_DIR: &str = "data";
const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Per-table overrides, keyed by table name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

impl Config {
    /// Load every layer. `data_dir` (from the command line) wins over files
    /// and environment.
    pub fn load(explicit_path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        Self::load_with_env(explicit_path, data_dir, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(explicit_path: Option<&Path>, data_dir: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| env("VINESTORE_CONFIG").map(PathBuf::from));

        if let Some(path) = explicit {
            match Self::load_patch(&path)? {
                Some(patch) => config.merge_patch(patch),
                None => {
                    return Err(StoreError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            let project_root = data_dir
                .map(PathBuf::from)
                .or_else(|| env("VINESTORE_DATA_DIR").map(PathBuf::from))
                .unwrap_or_else(|| config.data_dir().to_path_buf());
            if let Some(project) = Self::load_patch(&project_root.join("config.toml"))? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides(&env)?;
        if let Some(dir) = data_dir {
            config.storage.data_dir = Some(dir.to_path_buf());
        }
        config.validate()?;

        Ok(config)
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let patch: ConfigPatch = toml::from_str(raw)?;
        let mut config = Self::default();
        config.merge_patch(patch);
        config.validate()?;
        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match dirs::config_dir() {
            Some(dir) => Self::load_patch(&dir.join("vinestore/config.toml")),
            None => Ok(None),
        }
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| StoreError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| StoreError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
        if let Some(patch) = patch.remote {
            self.remote.merge(patch);
        }
        if let Some(tables) = patch.tables {
            for (name, table) in tables {
                self.tables.insert(name, table);
            }
        }
    }

    fn apply_env_overrides<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env("VINESTORE_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env("VINESTORE_SECRETS") {
            self.remote.secrets_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env("VINESTORE_REMOTE_TIMEOUT") {
            self.remote.timeout = parse_duration("VINESTORE_REMOTE_TIMEOUT", &value)?;
        }
        if let Some(value) = env("VINESTORE_REMOTE_RETRIES") {
            self.remote.retries = value.parse::<u32>().map_err(|err| {
                StoreError::Config(format!("invalid VINESTORE_REMOTE_RETRIES value {value}: {err}"))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.remote.timeout.is_zero() {
            return Err(StoreError::Config("remote.timeout must be greater than zero".into()));
        }
        if self.remote.retries > MAX_RETRIES {
            return Err(StoreError::Config(format!(
                "remote.retries must be at most {MAX_RETRIES}"
            )));
        }
        for (name, table) in &self.tables {
            Table::from_name(name)
                .map_err(|_| StoreError::Config(format!("[tables.{name}] is not a known table")))?;
            if let Some(key) = &table.key {
                if key.iter().any(|column| column.trim().is_empty()) {
                    return Err(StoreError::Config(format!(
                        "[tables.{name}] key contains a blank column name"
                    )));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.storage
            .data_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DATA_DIR))
    }

    /// Location of the remote credentials document.
    #[must_use]
    pub fn secrets_path(&self) -> PathBuf {
        self.remote
            .secrets_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join(".secrets").join("secrets.toml"))
    }

    /// Natural key used by `upsert` on `table` when the caller names none.
    #[must_use]
    pub fn key_for(&self, table: Table) -> Vec<String> {
        self.tables
            .iter()
            .find(|(name, _)| Table::from_name(name).ok() == Some(table))
            .and_then(|(_, overrides)| overrides.key.clone())
            .unwrap_or_else(|| table.default_key().iter().map(|c| (*c).to_string()).collect())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.data_dir {
            self.data_dir = Some(value);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub secrets_path: Option<PathBuf>,
    /// Per-request timeout of the spreadsheet client.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after a transient failure (429, 5xx, transport error).
    pub retries: u32,
    /// Override of the API root, otherwise taken from the credentials.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            secrets_path: None,
            timeout: Duration::from_secs(30),
            retries: 3,
            api_base: None,
        }
    }
}

impl RemoteConfig {
    fn merge(&mut self, patch: RemotePatch) {
        if let Some(value) = patch.secrets_path {
            self.secrets_path = Some(value);
        }
        if let Some(value) = patch.timeout {
            self.timeout = value;
        }
        if let Some(value) = patch.retries {
            self.retries = value;
        }
        if let Some(value) = patch.api_base {
            self.api_base = Some(value);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub key: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub storage: Option<StoragePatch>,
    pub remote: Option<RemotePatch>,
    pub tables: Option<BTreeMap<String, TableConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RemotePatch {
    pub secrets_path: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub api_base: Option<String>,
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let deserializer = serde::de::value::StrDeserializer::<serde::de::value::Error>::new(value);
    humantime_serde::deserialize(deserializer)
        .map_err(|err| StoreError::Config(format!("invalid {key} value {value}: {err}")))
}
