use clap::{Args, Subcommand};
use serde::Serialize;

use super::JsonInput;
use crate::app::AppContext;
use crate::cli::output::{emit_json, emit_warnings, robot_ok, OutputFormat};
use crate::core::Table;
use crate::error::{Result, StoreError};
use crate::storage::BackendKind;

#[derive(Args, Debug)]
pub struct DocumentArgs {
    #[command(subcommand)]
    pub command: DocumentCommand,
}

#[derive(Subcommand, Debug)]
pub enum DocumentCommand {
    /// Print the stored document
    Get {
        /// Table holding the document
        #[arg(long, default_value = "config")]
        table: Table,
    },
    /// Store a JSON object as the document
    Set {
        /// Table holding the document
        #[arg(long, default_value = "config")]
        table: Table,

        #[command(flatten)]
        input: JsonInput,
    },
}

#[derive(Serialize)]
struct DocumentReport<'a> {
    table: Table,
    served_by: BackendKind,
    document: &'a Option<serde_json::Value>,
}

pub fn run(ctx: &AppContext, args: &DocumentArgs) -> Result<()> {
    let (table, outcome) = match &args.command {
        DocumentCommand::Get { table } => (*table, ctx.store.load_document(*table)?),
        DocumentCommand::Set { table, input } => {
            let document = input.parse(*table)?.ok_or_else(|| {
                StoreError::malformed(table.name(), Table::DOCUMENT_COLUMN, "no document given")
            })?;
            (*table, ctx.store.save_document(*table, &document)?.map(Some))
        }
    };

    if ctx.output_format == OutputFormat::Json {
        let report = DocumentReport {
            table,
            served_by: outcome.served_by,
            document: &outcome.value,
        };
        return emit_json(&robot_ok(report, outcome.warnings));
    }

    emit_warnings(&outcome.warnings);
    if matches!(args.command, DocumentCommand::Set { .. }) && ctx.quiet {
        return Ok(());
    }
    match &outcome.value {
        Some(document) => println!("{}", serde_json::to_string_pretty(document)?),
        None => println!("null"),
    }
    Ok(())
}
