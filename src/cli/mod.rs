//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use output::OutputFormat;

pub mod commands;
pub mod output;

/// vinestore - vineyard record tables on local files and Google Sheets
#[derive(Parser, Debug)]
#[command(name = "vinestore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Machine-readable JSON output (shorthand for --output-format=json)
    #[arg(long, global = true)]
    pub robot: bool,

    /// Output format (human, json, jsonl, plain, tsv)
    #[arg(long, short = 'O', global = true, value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/vinestore/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the table files (default: ./data)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Credentials document (default: <data-dir>/.secrets/secrets.toml)
    #[arg(long, global = true)]
    pub secrets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_args(self.robot, self.output_format)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tables and their natural keys
    Tables(commands::tables::TablesArgs),

    /// Print the records of a table
    Load(commands::load::LoadArgs),

    /// Append a record to a table
    Append(commands::append::AppendArgs),

    /// Replace the record matching the key columns, or append it
    Upsert(commands::upsert::UpsertArgs),

    /// Overwrite a whole table
    Replace(commands::replace::ReplaceArgs),

    /// Read or write the configuration document
    Document(commands::document::DocumentArgs),

    /// Show backend connectivity and queued mirrors
    Status(commands::status::StatusArgs),

    /// Probe the remote again and replay queued mirrors
    Sync(commands::sync::SyncArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}
