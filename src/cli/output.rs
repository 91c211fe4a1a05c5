use chrono::{DateTime, Utc};
use clap::ValueEnum;
use console::style;
use serde::Serialize;

use crate::core::Record;
use crate::error::{ErrorCode, Result, StoreError, StructuredError};
use crate::sync::Warning;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable formatted output with colors (default)
    #[default]
    Human,
    /// Pretty-printed JSON
    Json,
    /// Newline-delimited JSON (one object per line)
    Jsonl,
    /// Plain text without colors or formatting
    Plain,
    /// Tab-separated values (for shell scripting)
    Tsv,
}

impl OutputFormat {
    /// Determine format from CLI args (robot flag overrides explicit format)
    #[must_use]
    pub fn from_args(robot: bool, format: Option<Self>) -> Self {
        if robot {
            Self::Json
        } else {
            format.unwrap_or_default()
        }
    }

    #[must_use]
    pub const fn use_colors(&self) -> bool {
        matches!(self, Self::Human)
    }

    #[must_use]
    pub const fn is_machine_readable(&self) -> bool {
        matches!(self, Self::Json | Self::Jsonl | Self::Tsv)
    }
}

#[derive(Serialize)]
pub struct RobotResponse<T> {
    pub status: RobotStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Ok,
    #[serde(rename = "error")]
    StructuredError {
        code: ErrorCode,
        numeric_code: u16,
        message: String,
        suggestion: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        recoverable: bool,
        category: String,
    },
}

impl From<StructuredError> for RobotStatus {
    fn from(err: StructuredError) -> Self {
        Self::StructuredError {
            code: err.code,
            numeric_code: err.numeric_code,
            message: err.message,
            suggestion: err.suggestion,
            context: err.context,
            recoverable: err.recoverable,
            category: err.category,
        }
    }
}

pub fn robot_ok<T: Serialize>(data: T, warnings: Vec<Warning>) -> RobotResponse<T> {
    RobotResponse {
        status: RobotStatus::Ok,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data,
        warnings,
    }
}

/// Robot error response with code, suggestion and context.
pub fn robot_error(err: &StoreError) -> RobotResponse<serde_json::Value> {
    RobotResponse {
        status: err.to_structured().into(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data: serde_json::Value::Null,
        warnings: Vec::new(),
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

/// Emit a slice of items in JSONL format (one JSON object per line)
pub fn emit_jsonl<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}

/// Emit TSV output with headers
pub fn emit_tsv<T, F>(headers: &[&str], items: &[T], row_fn: F)
where
    F: Fn(&T) -> Vec<String>,
{
    println!("{}", headers.join("\t"));
    for item in items {
        println!("{}", row_fn(item).join("\t"));
    }
}

/// Warnings go to stderr so stdout stays parseable.
pub fn emit_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("{} {warning}", style("warning:").yellow().bold());
    }
}

pub struct HumanLayout {
    lines: Vec<String>,
    key_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            key_width: 18,
        }
    }

    pub fn title(&mut self, text: &str) -> &mut Self {
        self.lines.push(style(text).bold().to_string());
        self.lines.push(String::new());
        self
    }

    pub fn section(&mut self, text: &str) -> &mut Self {
        self.lines.push(style(text).bold().to_string());
        self.lines.push("-".repeat(text.len().max(3)));
        self
    }

    pub fn kv(&mut self, key: &str, value: &str) -> &mut Self {
        let key_style = style(format!("{key:width$}", width = self.key_width)).dim();
        self.lines.push(format!("{key_style} {value}"));
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        self.lines.push(format!("- {text}"));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    #[must_use]
    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

pub fn emit_human(layout: HumanLayout) {
    println!("{}", layout.build());
}

/// Column-aligned grid of `records` under `columns`.
#[must_use]
pub fn record_grid(columns: &[String], records: &[Record]) -> Vec<String> {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| record.value(column).cell_text().into_owned())
                .collect()
        })
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            rows.iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or_default()
        })
        .collect();

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut lines = vec![style(line(columns)).bold().to_string()];
    lines.extend(rows.iter().map(|row| line(row)));
    lines
}

/// Cells of `record` in column order, for TSV output.
#[must_use]
pub fn tsv_cells(columns: &[String], record: &Record) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            record
                .value(column)
                .cell_text()
                .replace(['\t', '\n'], " ")
        })
        .collect()
}
