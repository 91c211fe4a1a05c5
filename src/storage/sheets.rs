//! Google Sheets v4 backend: one worksheet per table, row 1 is the header.
//!
//! Every failure of this adapter (transport, timeout, status, credentials,
//! unexpected payload) is reported as [`StoreError::RemoteUnavailable`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Method;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{BackendKind, TableBackend, TableSnapshot};
use crate::auth::{SheetsCredentials, TokenSource};
use crate::config::RemoteConfig;
use crate::core::{ColumnSchema, Record, Table, Value};
use crate::error::{Result, StoreError};

/// Retry configuration for spreadsheet calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    fn delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let base = self.base_delay_ms as f64;
        let exp_delay = base * 2_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        #[allow(clippy::cast_precision_loss)]
        let capped = exp_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_delay = (capped + jitter).max(0.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(final_delay as u64)
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

struct Failure {
    message: String,
    retryable: bool,
    /// The server may have applied the request before it failed.
    delivered: bool,
}

impl Failure {
    fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            delivered: false,
        }
    }

    fn delivered(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            delivered: true,
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            delivered: true,
        }
    }
}

/// Remote spreadsheet adapter.
pub struct SheetsBackend {
    base_url: String,
    tokens: TokenSource,
    http_client: Client,
    retry_config: RetryConfig,
    timeout: Duration,
    /// Worksheet titles, fetched on first use.
    titles: Mutex<Option<HashSet<String>>>,
}

impl SheetsBackend {
    pub fn new(credentials: &SheetsCredentials, settings: &RemoteConfig) -> Result<Self> {
        let spreadsheet_id = credentials.spreadsheet_id()?;
        let api_base = settings
            .api_base
            .as_deref()
            .map_or_else(|| credentials.api_base(), |base| base.trim_end_matches('/'));
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StoreError::RemoteUnavailable(format!("HTTP client error: {e}")))?;

        Ok(Self {
            base_url: format!("{api_base}/v4/spreadsheets/{}", urlencoding::encode(&spreadsheet_id)),
            tokens: TokenSource::from_credentials(credentials)?,
            http_client,
            retry_config: RetryConfig {
                max_retries: settings.retries,
                ..RetryConfig::default()
            },
            timeout: settings.timeout,
            titles: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn values_url(&self, range: &str, suffix: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!("{}/values/{}{suffix}", self.base_url, urlencoding::encode(range));
        for (i, (name, value)) in query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn worksheet_titles(&self) -> Result<HashSet<String>> {
        if let Some(titles) = self.titles.lock().as_ref() {
            return Ok(titles.clone());
        }
        let url = format!("{}?fields={}", self.base_url, urlencoding::encode("sheets.properties.title"));
        let body = self.request(Method::GET, &url, None)?;
        let meta: SpreadsheetMeta = serde_json::from_str(&body)
            .map_err(|e| StoreError::RemoteUnavailable(format!("invalid spreadsheet metadata: {e}")))?;
        let titles: HashSet<String> = meta.sheets.into_iter().map(|s| s.properties.title).collect();
        debug!(worksheets = titles.len(), "spreadsheet metadata loaded");
        *self.titles.lock() = Some(titles.clone());
        Ok(titles)
    }

    fn ensure_worksheet(&self, table: Table) -> Result<()> {
        if self.worksheet_titles()?.contains(table.worksheet()) {
            return Ok(());
        }
        let url = format!("{}:batchUpdate", self.base_url);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": table.worksheet() } } }]
        });
        self.request(Method::POST, &url, Some(&body))?;
        info!(table = %table, "worksheet created");
        if let Some(titles) = self.titles.lock().as_mut() {
            titles.insert(table.worksheet().to_string());
        }
        Ok(())
    }

    fn put_rows(&self, range: &str, rows: Vec<Vec<serde_json::Value>>) -> Result<()> {
        let url = self.values_url(range, "", &[("valueInputOption", "RAW")]);
        self.request(Method::PUT, &url, Some(&json!({ "majorDimension": "ROWS", "values": rows })))?;
        Ok(())
    }

    /// Request with retry on 429, 5xx, 401 and transport errors.
    fn request(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> Result<String> {
        self.request_with(method, url, body, true)
    }

    /// A non-idempotent request is only retried when it never reached the
    /// server (connect errors, 401, 429).
    fn request_with(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        idempotent: bool,
    ) -> Result<String> {
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.retry_config.delay(attempt);
                if started.elapsed() + delay >= self.timeout {
                    debug!(attempt = attempt, "retry budget exhausted");
                    break;
                }
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying request"
                );
                std::thread::sleep(delay);
            }

            match self.do_request(method.clone(), url, body) {
                Ok(response) => return Ok(response),
                Err(failure) => {
                    warn!(
                        attempt = attempt,
                        method = %method,
                        error = %failure.message,
                        "Spreadsheet request failed"
                    );
                    let retryable = failure.retryable && (idempotent || !failure.delivered);
                    last_error = Some(failure.message);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(StoreError::RemoteUnavailable(
            last_error.unwrap_or_else(|| "request not attempted".to_string()),
        ))
    }

    fn do_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<String, Failure> {
        let token = self
            .tokens
            .bearer(&self.http_client)
            .map_err(|e| Failure::retryable(e.to_string()))?;
        let request_id = format!(
            "vs-{}",
            Uuid::new_v4().to_string().split('-').next().unwrap_or("0")
        );
        debug!(request_id = %request_id, method = %method, url = url, "spreadsheet request");

        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"))
            .header("X-Request-ID", &request_id);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .map_err(|e| {
                let message = format!("HTTP request failed: {e}");
                if e.is_connect() {
                    Failure::retryable(message)
                } else {
                    Failure::delivered(message)
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| Failure::delivered(format!("Failed to read response: {e}")))?;

        if status.is_success() {
            Ok(text)
        } else if status.as_u16() == 401 {
            self.tokens.invalidate();
            Err(Failure::retryable(format!("Unauthorized ({status}): {text}")))
        } else if status.as_u16() == 429 {
            Err(Failure::retryable(format!("Sheets API error ({status}): {text}")))
        } else if status.is_server_error() {
            Err(Failure::delivered(format!("Sheets API error ({status}): {text}")))
        } else {
            Err(Failure::fatal(format!("Sheets API error ({status}): {text}")))
        }
    }
}

impl TableBackend for SheetsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn probe(&self) -> Result<()> {
        self.titles.lock().take();
        self.worksheet_titles().map(|_| ())
    }

    fn read_all(&self, table: Table) -> Result<TableSnapshot> {
        if !self.worksheet_titles()?.contains(table.worksheet()) {
            debug!(table = %table, "worksheet missing, table is vacant");
            return Ok(TableSnapshot::empty(table));
        }
        let url = self.values_url(
            &sheet_range(table),
            "",
            &[
                ("valueRenderOption", "UNFORMATTED_VALUE"),
                ("dateTimeRenderOption", "FORMATTED_STRING"),
                ("majorDimension", "ROWS"),
            ],
        );
        let body = self.request(Method::GET, &url, None)?;
        let range: ValueRange = serde_json::from_str(&body)
            .map_err(|e| StoreError::RemoteUnavailable(format!("invalid values payload: {e}")))?;
        let snapshot = grid_to_snapshot(table, &range.values);
        debug!(
            table = %table,
            rows = snapshot.records.len(),
            columns = snapshot.columns.len(),
            "remote table read"
        );
        Ok(snapshot)
    }

    fn write_all(&self, snapshot: &TableSnapshot) -> Result<()> {
        let table = snapshot.table;
        self.ensure_worksheet(table)?;
        let clear_url = self.values_url(&sheet_range(table), ":clear", &[]);
        self.request(Method::POST, &clear_url, Some(&json!({})))?;

        let mut rows = vec![header_row(&snapshot.columns)];
        rows.extend(
            snapshot
                .records
                .iter()
                .map(|record| data_row(&snapshot.columns, record)),
        );
        self.put_rows(&format!("{}!A1", sheet_range(table)), rows)?;
        info!(table = %table, rows = snapshot.records.len(), "worksheet rewritten");
        Ok(())
    }

    fn overwrite_header(&self, table: Table, columns: &ColumnSchema) -> Result<()> {
        self.ensure_worksheet(table)?;
        self.put_rows(&format!("{}!A1", sheet_range(table)), vec![header_row(columns)])?;
        debug!(table = %table, columns = columns.len(), "header written");
        Ok(())
    }

    fn append_row(&self, table: Table, columns: &ColumnSchema, record: &Record) -> Result<()> {
        self.ensure_worksheet(table)?;
        let url = self.values_url(
            &format!("{}!A1", sheet_range(table)),
            ":append",
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
        );
        self.request_with(
            Method::POST,
            &url,
            Some(&json!({ "majorDimension": "ROWS", "values": [data_row(columns, record)] })),
            false,
        )?;
        debug!(table = %table, "row appended");
        Ok(())
    }

    fn update_row(
        &self,
        before: &TableSnapshot,
        index: usize,
        columns: &ColumnSchema,
        record: &Record,
    ) -> Result<()> {
        let row = before.row_number(index);
        self.put_rows(
            &format!("{}!A{row}", sheet_range(before.table)),
            vec![data_row(columns, record)],
        )?;
        debug!(table = %before.table, row = row, "row updated");
        Ok(())
    }
}

/// A1 range naming the whole worksheet.
fn sheet_range(table: Table) -> String {
    format!("'{}'", table.worksheet().replace('\'', "''"))
}

pub(crate) fn header_row(columns: &ColumnSchema) -> Vec<serde_json::Value> {
    columns.iter().map(|c| serde_json::Value::String(c.to_string())).collect()
}

/// Empty cells are written as `""`: a JSON null would leave the old cell in place.
pub(crate) fn data_row(columns: &ColumnSchema, record: &Record) -> Vec<serde_json::Value> {
    columns
        .iter()
        .map(|column| match record.value(column) {
            Value::Empty => serde_json::Value::String(String::new()),
            value => value.to_json(),
        })
        .collect()
}

/// Decode a value grid: blank header cells and repeated names are ignored,
/// short rows are back-filled, blank rows are skipped.
///
/// A header with ignored cells is flagged so the next write compacts it.
pub(crate) fn grid_to_snapshot(table: Table, grid: &[Vec<serde_json::Value>]) -> TableSnapshot {
    let Some((header, rows)) = grid.split_first() else {
        return TableSnapshot::empty(table);
    };

    let mut columns = ColumnSchema::new();
    let slots: Vec<Option<String>> = header
        .iter()
        .map(|cell| {
            let name = cell_to_value(cell).cell_text().trim().to_string();
            columns.push(&name).then_some(name)
        })
        .collect();

    let mut snapshot = TableSnapshot::new(table, columns, Vec::new());
    snapshot.compact_header = slots.iter().all(Option::is_some);
    for (offset, row) in rows.iter().enumerate() {
        let cells: Vec<(String, Value)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .map(|name| (name.clone(), row.get(i).map(cell_to_value).unwrap_or_default()))
            })
            .collect();
        if cells.iter().all(|(_, value)| value.is_empty()) {
            continue;
        }
        let record: Record = cells.into_iter().collect();
        snapshot.records.push(record);
        snapshot.row_numbers.push(offset + 2);
    }
    snapshot
}

pub(crate) fn cell_to_value(cell: &serde_json::Value) -> Value {
    Value::from_json(cell).unwrap_or_else(|| Value::Text(cell.to_string()))
}
