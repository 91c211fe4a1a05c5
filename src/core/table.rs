//! Table catalog.
//!
//! Every logical dataset the vineyard application persists, with the static
//! metadata the store needs about it: worksheet title, the column that proves
//! a worksheet holds real data, the default natural key used by upserts and
//! the columns whose cells carry a serialized JSON document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Traitements,
    Vendanges,
    Meteo,
    Alertes,
    Gdd,
    Config,
    Produits,
    Fertilisation,
}

impl Table {
    pub const ALL: [Self; 8] = [
        Self::Traitements,
        Self::Vendanges,
        Self::Meteo,
        Self::Alertes,
        Self::Gdd,
        Self::Config,
        Self::Produits,
        Self::Fertilisation,
    ];

    /// Column holding the serialized document of the `config` table.
    pub const DOCUMENT_COLUMN: &'static str = "json_content";

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Traitements => "traitements",
            Self::Vendanges => "vendanges",
            Self::Meteo => "meteo",
            Self::Alertes => "alertes",
            Self::Gdd => "gdd",
            Self::Config => "config",
            Self::Produits => "produits",
            Self::Fertilisation => "fertilisation",
        }
    }

    /// Worksheet title on the remote spreadsheet.
    #[must_use]
    pub const fn worksheet(self) -> &'static str {
        self.name()
    }

    /// Document key used by earlier releases of the dashboard.
    #[must_use]
    pub const fn legacy_key(self) -> Option<&'static str> {
        match self {
            Self::Meteo => Some("meteo_historique"),
            Self::Alertes => Some("historique_alertes"),
            Self::Gdd => Some("gdd_historique"),
            Self::Config => Some("config_vignoble"),
            _ => None,
        }
    }

    /// A worksheet without this column in its header is treated as vacant.
    #[must_use]
    pub const fn mandatory_column(self) -> Option<&'static str> {
        match self {
            Self::Traitements => Some("parcelle"),
            Self::Vendanges | Self::Alertes => Some("annee"),
            Self::Meteo | Self::Gdd => Some("date"),
            Self::Config => Some(Self::DOCUMENT_COLUMN),
            Self::Produits | Self::Fertilisation => None,
        }
    }

    /// Natural key used by `upsert` when the caller does not name one.
    #[must_use]
    pub const fn default_key(self) -> &'static [&'static str] {
        match self {
            Self::Vendanges => &["annee", "type"],
            Self::Meteo | Self::Gdd => &["date"],
            Self::Produits => &["nom"],
            _ => &[],
        }
    }

    /// Columns whose cells hold a compact JSON document instead of a scalar.
    #[must_use]
    pub const fn json_columns(self) -> &'static [&'static str] {
        match self {
            Self::Traitements => &["caracteristiques"],
            Self::Alertes => &[
                "risque_mildiou",
                "risque_oidium",
                "protection",
                "decision",
                "meteo",
                "previsions",
            ],
            _ => &[],
        }
    }

    #[must_use]
    pub fn is_json_column(self, column: &str) -> bool {
        self.json_columns().contains(&column)
    }

    /// Parse a table name, accepting legacy document keys.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|table| table.name() == wanted || table.legacy_key() == Some(wanted.as_str()))
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}
