use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{emit_human, emit_json, robot_ok, HumanLayout, OutputFormat};
use crate::error::Result;
use crate::sync::ConnectivityState;

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

pub fn run(ctx: &AppContext, _args: &StatusArgs) -> Result<()> {
    let status = ctx.store.status()?;

    if ctx.output_format == OutputFormat::Json {
        let payload = serde_json::json!({
            "data_dir": ctx.store.data_dir(),
            "secrets_path": ctx.config.secrets_path(),
            "status": status,
        });
        return emit_json(&robot_ok(payload, Vec::new()));
    }

    let mut layout = HumanLayout::new();
    layout
        .title("Store Status")
        .kv("Data dir", &ctx.store.data_dir().display().to_string())
        .kv("Secrets", &ctx.config.secrets_path().display().to_string())
        .kv("Remote", status.connectivity.label());
    if let ConnectivityState::Demoted { reason } = &status.connectivity {
        layout.kv("Reason", reason);
    }
    if let Some(last) = status.last_replay {
        layout.kv("Last replay", &last.to_rfc3339());
    }

    layout.blank().section("Pending mirrors");
    if status.pending.is_empty() {
        layout.push_line("none");
    }
    for (table, count) in &status.pending {
        layout.kv(table.name(), &count.to_string());
    }

    if !status.handles.is_empty() {
        layout.blank().section("Backends");
        for handle in &status.handles {
            layout.kv(handle.table.name(), &handle.kind.to_string());
        }
    }

    emit_human(layout);
    Ok(())
}
