use clap::Args;
use serde::Serialize;

use super::RecordInput;
use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, OutputFormat, emit_human, emit_json, emit_jsonl, emit_warnings, robot_ok,
};
use crate::core::{Record, Table};
use crate::error::Result;
use crate::storage::BackendKind;

#[derive(Args, Debug)]
pub struct AppendArgs {
    /// Table name (legacy names accepted)
    pub table: Table,

    #[command(flatten)]
    pub record: RecordInput,
}

#[derive(Serialize)]
struct AppendReport<'a> {
    table: Table,
    served_by: BackendKind,
    record: &'a Record,
}

pub fn run(ctx: &AppContext, args: &AppendArgs) -> Result<()> {
    let record = args.record.record(args.table)?;
    let outcome = ctx.store.append(args.table, record)?;

    match ctx.output_format {
        OutputFormat::Json => {
            let report = AppendReport {
                table: args.table,
                served_by: outcome.served_by,
                record: &outcome.value,
            };
            emit_json(&robot_ok(report, outcome.warnings))
        }
        OutputFormat::Jsonl | OutputFormat::Tsv => {
            emit_warnings(&outcome.warnings);
            emit_jsonl(std::slice::from_ref(&outcome.value))
        }
        OutputFormat::Human | OutputFormat::Plain => {
            emit_warnings(&outcome.warnings);
            if ctx.quiet {
                return Ok(());
            }
            let mut layout = HumanLayout::new();
            layout.title(&format!("Appended to {} ({})", args.table, outcome.served_by));
            record_lines(&mut layout, &outcome.value);
            emit_human(layout);
            Ok(())
        }
    }
}

/// One `column  value` line per cell.
pub(super) fn record_lines(layout: &mut HumanLayout, record: &Record) {
    for (column, value) in record.iter() {
        layout.kv(column, &value.cell_text());
    }
}
