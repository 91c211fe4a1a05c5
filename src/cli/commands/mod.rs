//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command

use std::io::Read;
use std::path::PathBuf;

use clap::Args;

use crate::app::AppContext;
use crate::cli::Commands;
use crate::core::{Record, Table, Value};
use crate::error::{Result, StoreError};

pub mod append;
pub mod completions;
pub mod document;
pub mod load;
pub mod replace;
pub mod status;
pub mod sync;
pub mod tables;
pub mod upsert;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Tables(args) => tables::run(ctx, args),
        Commands::Load(args) => load::run(ctx, args),
        Commands::Append(args) => append::run(ctx, args),
        Commands::Upsert(args) => upsert::run(ctx, args),
        Commands::Replace(args) => replace::run(ctx, args),
        Commands::Document(args) => document::run(ctx, args),
        Commands::Status(args) => status::run(ctx, args),
        Commands::Sync(args) => sync::run(ctx, args),
        Commands::Completions(args) => {
            completions::run(args);
            Ok(())
        }
    }
}

/// Where a command reads its JSON payload from.
#[derive(Args, Debug, Default, Clone)]
pub struct JsonInput {
    /// JSON payload; `-` reads standard input
    #[arg(value_name = "JSON")]
    pub json: Option<String>,

    /// Read the JSON payload from a file
    #[arg(long, short = 'f', conflicts_with = "json")]
    pub file: Option<PathBuf>,
}

impl JsonInput {
    /// Raw payload, or `None` when nothing was given.
    pub fn read(&self) -> Result<Option<String>> {
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path).map(Some).map_err(StoreError::from);
        }
        match self.json.as_deref() {
            Some("-") => {
                let mut raw = String::new();
                std::io::stdin().read_to_string(&mut raw)?;
                Ok(Some(raw))
            }
            Some(raw) => Ok(Some(raw.to_string())),
            None => Ok(None),
        }
    }

    pub fn parse(&self, table: Table) -> Result<Option<serde_json::Value>> {
        self.read()?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| {
                    StoreError::malformed(table.name(), "(input)", format!("invalid JSON: {err}"))
                })
            })
            .transpose()
    }
}

/// A single record given as a JSON object and/or `--set column=value` pairs.
#[derive(Args, Debug, Default, Clone)]
pub struct RecordInput {
    #[command(flatten)]
    pub input: JsonInput,

    /// Set a column (repeatable); numbers and booleans are detected
    #[arg(long = "set", short = 's', value_name = "COLUMN=VALUE")]
    pub set: Vec<String>,
}

impl RecordInput {
    pub fn record(&self, table: Table) -> Result<Record> {
        let mut record = match self.input.parse(table)? {
            Some(serde_json::Value::Object(object)) => Record::from_json_object(table, &object)?,
            Some(_) => {
                return Err(StoreError::malformed(
                    table.name(),
                    "(input)",
                    "expected a JSON object",
                ));
            }
            None => Record::new(),
        };
        for assignment in &self.set {
            let (column, value) = parse_assignment(table, assignment)?;
            record.set(column, value);
        }
        if record.is_empty() {
            return Err(StoreError::malformed(
                table.name(),
                "(input)",
                "no record given; pass a JSON object or --set COLUMN=VALUE",
            ));
        }
        record.validate(table)?;
        Ok(record)
    }
}

/// Parse `column=value`; the value is read as JSON when it is a scalar.
pub fn parse_assignment(table: Table, raw: &str) -> Result<(String, Value)> {
    let Some((column, value)) = raw.split_once('=') else {
        return Err(StoreError::malformed(
            table.name(),
            raw,
            "expected COLUMN=VALUE",
        ));
    };
    let column = column.trim();
    if column.is_empty() {
        return Err(StoreError::malformed(table.name(), raw, "empty column name"));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .ok()
        .and_then(|json| Value::from_json(&json))
        .unwrap_or_else(|| Value::text(value));
    Ok((column.to_string(), value))
}
