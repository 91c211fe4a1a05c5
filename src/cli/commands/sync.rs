use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{
    emit_human, emit_json, emit_warnings, robot_ok, HumanLayout, OutputFormat,
};
use crate::core::Table;
use crate::error::Result;

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Tables to catch up (default: every table with queued mirrors)
    #[arg(value_name = "TABLE")]
    pub tables: Vec<Table>,
}

pub fn run(ctx: &AppContext, args: &SyncArgs) -> Result<()> {
    let outcome = ctx.store.sync(&args.tables)?;

    if ctx.output_format == OutputFormat::Json {
        let payload = serde_json::json!({
            "served_by": outcome.served_by,
            "replayed": outcome.value.replayed(),
            "pending": outcome.value.pending(),
            "tables": outcome.value.tables,
        });
        return emit_json(&robot_ok(payload, outcome.warnings));
    }

    emit_warnings(&outcome.warnings);
    let mut layout = HumanLayout::new();
    layout.title("Sync Report");
    if outcome.value.tables.is_empty() {
        layout.push_line("Nothing to replay");
    }
    for table in &outcome.value.tables {
        layout
            .section(table.table.name())
            .kv("Replayed", &table.replayed.to_string())
            .kv("Rows", &table.rows.to_string())
            .kv("Still pending", &table.pending.to_string())
            .kv("Served by", &table.served_by.to_string())
            .blank();
    }
    emit_human(layout);
    Ok(())
}
