use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, OutputFormat, emit_human, emit_json, emit_jsonl, emit_tsv, emit_warnings,
    record_grid, robot_ok, tsv_cells,
};
use crate::core::{Record, Table};
use crate::error::Result;
use crate::storage::BackendKind;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Table name (legacy names accepted)
    pub table: Table,

    /// Only print the last N records
    #[arg(long)]
    pub tail: Option<usize>,
}

#[derive(Serialize)]
struct LoadReport<'a> {
    table: Table,
    served_by: BackendKind,
    columns: &'a [String],
    count: usize,
    records: &'a [Record],
}

pub fn run(ctx: &AppContext, args: &LoadArgs) -> Result<()> {
    let outcome = ctx.store.load_table(args.table)?;
    let snapshot = &outcome.value;
    let start = args
        .tail
        .map_or(0, |tail| snapshot.records.len().saturating_sub(tail));
    let records = &snapshot.records[start..];
    let columns = snapshot.columns.as_slice();

    match ctx.output_format {
        OutputFormat::Json => {
            let report = LoadReport {
                table: args.table,
                served_by: outcome.served_by,
                columns,
                count: records.len(),
                records,
            };
            emit_json(&robot_ok(report, outcome.warnings))
        }
        OutputFormat::Jsonl => {
            emit_warnings(&outcome.warnings);
            emit_jsonl(records)
        }
        OutputFormat::Tsv => {
            emit_warnings(&outcome.warnings);
            let headers: Vec<&str> = columns.iter().map(String::as_str).collect();
            emit_tsv(&headers, records, |record| tsv_cells(columns, record));
            Ok(())
        }
        OutputFormat::Human | OutputFormat::Plain => {
            emit_warnings(&outcome.warnings);
            let mut layout = HumanLayout::new();
            layout.title(&format!(
                "{} ({} records, {})",
                args.table,
                records.len(),
                outcome.served_by
            ));
            if records.is_empty() {
                layout.push_line("(empty)");
            } else {
                for line in record_grid(columns, records) {
                    layout.push_line(line);
                }
            }
            emit_human(layout);
            Ok(())
        }
    }
}
