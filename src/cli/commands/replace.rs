use clap::Args;
use serde::Serialize;

use super::JsonInput;
use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, OutputFormat, emit_human, emit_json, emit_warnings, robot_ok,
};
use crate::core::{Record, Table};
use crate::error::{Result, StoreError};
use crate::storage::BackendKind;

#[derive(Args, Debug)]
pub struct ReplaceArgs {
    /// Table name (legacy names accepted)
    pub table: Table,

    #[command(flatten)]
    pub input: JsonInput,
}

#[derive(Serialize)]
struct ReplaceReport {
    table: Table,
    served_by: BackendKind,
    count: usize,
}

pub fn run(ctx: &AppContext, args: &ReplaceArgs) -> Result<()> {
    let records = parse_records(args.table, args.input.parse(args.table)?)?;
    let outcome = ctx.store.replace(args.table, records)?;

    match ctx.output_format {
        OutputFormat::Json => {
            let report = ReplaceReport {
                table: args.table,
                served_by: outcome.served_by,
                count: outcome.value.len(),
            };
            emit_json(&robot_ok(report, outcome.warnings))
        }
        _ => {
            emit_warnings(&outcome.warnings);
            if ctx.quiet {
                return Ok(());
            }
            let mut layout = HumanLayout::new();
            layout.push_line(format!(
                "Replaced {} with {} records ({})",
                args.table,
                outcome.value.len(),
                outcome.served_by
            ));
            emit_human(layout);
            Ok(())
        }
    }
}

fn parse_records(table: Table, payload: Option<serde_json::Value>) -> Result<Vec<Record>> {
    let Some(serde_json::Value::Array(items)) = payload else {
        return Err(StoreError::malformed(
            table.name(),
            "(input)",
            "expected a JSON array of objects",
        ));
    };
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::Object(object) => Record::from_json_object(table, object),
            _ => Err(StoreError::malformed(
                table.name(),
                "(input)",
                "array items must be JSON objects",
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_array_of_objects() {
        let records = parse_records(
            Table::Produits,
            Some(json!([{"nom": "Soufre"}, {"nom": "Cuivre", "dar": 21}])),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].number("dar"), Some(21.0));
    }

    #[test]
    fn rejects_non_arrays() {
        assert!(parse_records(Table::Produits, Some(json!({"nom": "Soufre"}))).is_err());
        assert!(parse_records(Table::Produits, None).is_err());
        assert!(parse_records(Table::Produits, Some(json!([1]))).is_err());
    }
}
