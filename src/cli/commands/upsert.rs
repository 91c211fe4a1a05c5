use clap::Args;
use serde::Serialize;

use super::RecordInput;
use super::append::record_lines;
use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, OutputFormat, emit_human, emit_json, emit_jsonl, emit_warnings, robot_ok,
};
use crate::core::Table;
use crate::error::Result;
use crate::storage::BackendKind;
use crate::store::UpsertResult;

#[derive(Args, Debug)]
pub struct UpsertArgs {
    /// Table name (legacy names accepted)
    pub table: Table,

    #[command(flatten)]
    pub record: RecordInput,

    /// Key columns, comma separated (default: the table's natural key)
    #[arg(long, short = 'k', value_delimiter = ',')]
    pub key: Vec<String>,
}

#[derive(Serialize)]
struct UpsertReport<'a> {
    table: Table,
    served_by: BackendKind,
    key: Vec<String>,
    #[serde(flatten)]
    result: &'a UpsertResult,
}

pub fn run(ctx: &AppContext, args: &UpsertArgs) -> Result<()> {
    let record = args.record.record(args.table)?;
    let key = if args.key.is_empty() {
        ctx.store.key_for(args.table)
    } else {
        args.key.clone()
    };
    let outcome = ctx.store.upsert(args.table, record, Some(&key))?;
    let result = &outcome.value;

    match ctx.output_format {
        OutputFormat::Json => {
            let report = UpsertReport {
                table: args.table,
                served_by: outcome.served_by,
                key,
                result,
            };
            emit_json(&robot_ok(report, outcome.warnings))
        }
        OutputFormat::Jsonl | OutputFormat::Tsv => {
            emit_warnings(&outcome.warnings);
            emit_jsonl(std::slice::from_ref(result))
        }
        OutputFormat::Human | OutputFormat::Plain => {
            emit_warnings(&outcome.warnings);
            if ctx.quiet {
                return Ok(());
            }
            let verb = if result.replaced { "Updated" } else { "Appended" };
            let mut layout = HumanLayout::new();
            layout.title(&format!(
                "{verb} {} row {} ({})",
                args.table,
                result.position + 1,
                outcome.served_by
            ));
            record_lines(&mut layout, &result.record);
            emit_human(layout);
            Ok(())
        }
    }
}
