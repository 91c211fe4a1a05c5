use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, OutputFormat, emit_human, emit_json, emit_jsonl, emit_tsv, robot_ok,
};
use crate::core::Table;
use crate::error::Result;

#[derive(Args, Debug, Default)]
pub struct TablesArgs {}

#[derive(Debug, Serialize)]
struct TableInfo {
    name: &'static str,
    worksheet: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    legacy_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mandatory_column: Option<&'static str>,
    key: Vec<String>,
    json_columns: &'static [&'static str],
}

pub fn run(ctx: &AppContext, _args: &TablesArgs) -> Result<()> {
    let tables: Vec<TableInfo> = Table::ALL
        .into_iter()
        .map(|table| TableInfo {
            name: table.name(),
            worksheet: table.worksheet(),
            legacy_name: table.legacy_key(),
            mandatory_column: table.mandatory_column(),
            key: ctx.store.key_for(table),
            json_columns: table.json_columns(),
        })
        .collect();

    match ctx.output_format {
        OutputFormat::Json => emit_json(&robot_ok(&tables, Vec::new())),
        OutputFormat::Jsonl => emit_jsonl(&tables),
        OutputFormat::Tsv => {
            emit_tsv(&["name", "worksheet", "key", "legacy_name"], &tables, |t| {
                vec![
                    t.name.to_string(),
                    t.worksheet.to_string(),
                    t.key.join(","),
                    t.legacy_name.unwrap_or_default().to_string(),
                ]
            });
            Ok(())
        }
        OutputFormat::Human | OutputFormat::Plain => {
            let mut layout = HumanLayout::new();
            layout.title("Tables");
            for table in &tables {
                let key = if table.key.is_empty() {
                    "-".to_string()
                } else {
                    table.key.join(", ")
                };
                let mut line = format!("{:<14} key: {key}", table.name);
                if let Some(legacy) = table.legacy_name {
                    line.push_str(&format!("  (alias: {legacy})"));
                }
                layout.bullet(&line);
            }
            emit_human(layout);
            Ok(())
        }
    }
}
