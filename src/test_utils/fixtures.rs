use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::{Record, Table};
use crate::storage::{LocalBackend, TableBackend, TableSnapshot};

/// Isolated data directory for one test.
pub struct StoreFixture {
    pub temp_dir: TempDir,
    pub data_path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data_path = temp_dir.path().to_path_buf();
        println!("[FIXTURE] Created data directory: {:?}", data_path);
        Self {
            temp_dir,
            data_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.data_path
    }

    pub fn local(&self) -> LocalBackend {
        LocalBackend::new(&self.data_path)
    }

    /// Create a file below the data directory.
    pub fn create_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full_path = self.data_path.join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::fs::write(&full_path, content).expect("Failed to write file");
        println!(
            "[FIXTURE] Created file: {:?} ({} bytes)",
            full_path,
            content.len()
        );
        full_path
    }

    /// Write `records` as the local content of `table`.
    pub fn seed_table(&self, table: Table, records: Vec<Record>) {
        let columns = crate::core::reconcile_records(table, &Default::default(), &records).columns;
        let records = records
            .iter()
            .map(|record| record.conform(table, &columns).expect("Failed to conform record"))
            .collect();
        self.local()
            .write_all(&TableSnapshot::new(table, columns, records))
            .expect("Failed to seed table");
    }

    /// Write a secrets document pointing at `api_base` with a static token.
    pub fn create_secrets(&self, api_base: &str) -> PathBuf {
        self.create_file(
            ".secrets/secrets.toml",
            &format!(
                "[connections.gsheets]\n\
                 spreadsheet = \"https://docs.google.com/spreadsheets/d/sheet-test-id/edit\"\n\
                 access_token = \"test-token\"\n\
                 api_base = \"{api_base}\"\n"
            ),
        )
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A treatment log entry.
pub fn traitement(parcelle: &str, date: &str, produit: &str) -> Record {
    Record::new()
        .with("date", date)
        .with("parcelle", parcelle)
        .with("produit", produit)
}

/// A harvest summary row keyed by `(annee, type)`.
pub fn vendange(annee: i64, kind: &str, poids: f64) -> Record {
    Record::new()
        .with("annee", annee)
        .with("type", kind)
        .with("poids", poids)
}
