//! Spreadsheet client against a mock Sheets API.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use vinestore::auth::SheetsCredentials;
use vinestore::config::RemoteConfig;
use vinestore::core::{ColumnSchema, Record, Table};
use vinestore::storage::{BackendKind, RetryConfig, SheetsBackend, TableBackend, TableSnapshot};
use vinestore::sync::WarningKind;
use vinestore::test_utils::fixtures::traitement;
use vinestore::test_utils::{StoreFixture, init_test_tracing};
use vinestore::TableStore;

const SHEET_PATH: &str = "/v4/spreadsheets/sheet-test-id";

fn settings() -> RemoteConfig {
    RemoteConfig {
        timeout: Duration::from_secs(5),
        retries: 0,
        ..RemoteConfig::default()
    }
}

fn backend(server: &MockServer) -> SheetsBackend {
    init_test_tracing();
    let credentials = SheetsCredentials::parse(&format!(
        "[connections.gsheets]\n\
         spreadsheet = \"sheet-test-id\"\n\
         access_token = \"test-token\"\n\
         api_base = \"{}\"\n",
        server.base_url()
    ))
    .unwrap();
    SheetsBackend::new(&credentials, &settings()).unwrap()
}

fn mock_titles<'a>(server: &'a MockServer, titles: &[&str]) -> httpmock::Mock<'a> {
    let sheets: Vec<_> = titles
        .iter()
        .map(|title| json!({"properties": {"title": title}}))
        .collect();
    server.mock(|when, then| {
        when.method(GET)
            .path(SHEET_PATH)
            .query_param("fields", "sheets.properties.title")
            .header("Authorization", "Bearer test-token");
        then.status(200).json_body(json!({ "sheets": sheets }));
    })
}

#[test]
fn read_decodes_the_value_grid() {
    let server = MockServer::start();
    let titles = mock_titles(&server, &["traitements"]);
    let values = server.mock(|when, then| {
        when.method(GET)
            .path_prefix(format!("{SHEET_PATH}/values/"))
            .query_param("valueRenderOption", "UNFORMATTED_VALUE")
            .query_param("dateTimeRenderOption", "FORMATTED_STRING")
            .query_param("majorDimension", "ROWS");
        then.status(200).json_body(json!({
            "range": "traitements!A1:C4",
            "values": [
                ["date", "parcelle", "dose"],
                ["2024-05-01", "A1", 2.5],
                [],
                ["2024-05-03", "B2"]
            ]
        }));
    });

    let snapshot = backend(&server).read_all(Table::Traitements).unwrap();
    titles.assert();
    values.assert();
    assert_eq!(snapshot.columns.as_slice(), ["date", "parcelle", "dose"]);
    assert_eq!(snapshot.records.len(), 2);
    assert_eq!(snapshot.records[0].number("dose"), Some(2.5));
    assert!(snapshot.records[1].value("dose").is_empty());
    assert_eq!(snapshot.row_number(1), 4);
}

#[test]
fn missing_worksheet_reads_as_vacant() {
    let server = MockServer::start();
    mock_titles(&server, &["meteo"]);

    let snapshot = backend(&server).read_all(Table::Traitements).unwrap();
    assert!(snapshot.is_vacant());
    assert!(snapshot.records.is_empty());
}

#[test]
fn write_all_creates_clears_and_rewrites() {
    let server = MockServer::start();
    mock_titles(&server, &[]);
    let add_sheet = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{SHEET_PATH}:batchUpdate"))
            .body_includes("addSheet")
            .body_includes("\"produits\"");
        then.status(200).json_body(json!({}));
    });
    let clear = server.mock(|when, then| {
        when.method(POST).path_suffix(":clear");
        then.status(200).json_body(json!({}));
    });
    let put = server.mock(|when, then| {
        when.method(PUT)
            .path_prefix(format!("{SHEET_PATH}/values/"))
            .query_param("valueInputOption", "RAW")
            .body_includes("[\"nom\",\"dar\"]")
            .body_includes("[\"Soufre\",5]")
            .body_includes("[\"Cuivre\",\"\"]");
        then.status(200).json_body(json!({}));
    });

    let snapshot = TableSnapshot::new(
        Table::Produits,
        ColumnSchema::from_columns(["nom", "dar"]),
        vec![
            Record::new().with("nom", "Soufre").with("dar", 5),
            Record::new().with("nom", "Cuivre"),
        ],
    );
    backend(&server).write_all(&snapshot).unwrap();
    add_sheet.assert();
    clear.assert();
    put.assert();
}

#[test]
fn append_inserts_one_raw_row() {
    let server = MockServer::start();
    mock_titles(&server, &["traitements"]);
    let append = server.mock(|when, then| {
        when.method(POST)
            .path_suffix(":append")
            .query_param("valueInputOption", "RAW")
            .query_param("insertDataOption", "INSERT_ROWS")
            .header("Authorization", "Bearer test-token")
            .body_includes("[\"2024-05-01\",\"A1\",\"Soufre\"]");
        then.status(200).json_body(json!({"updates": {"updatedRows": 1}}));
    });

    let columns = ColumnSchema::from_columns(["date", "parcelle", "produit"]);
    backend(&server)
        .append_row(
            Table::Traitements,
            &columns,
            &traitement("A1", "2024-05-01", "Soufre"),
        )
        .unwrap();
    append.assert();
}

#[test]
fn client_errors_are_not_retried() {
    let server = MockServer::start();
    let forbidden = server.mock(|when, then| {
        when.method(GET).path(SHEET_PATH);
        then.status(403)
            .json_body(json!({"error": {"code": 403, "message": "The caller does not have permission"}}));
    });

    let backend = backend(&server).with_retry_config(fast_retries());
    let err = backend.probe().unwrap_err();
    forbidden.assert();
    assert!(err.is_remote());
    assert!(err.to_string().contains("403"));
}

fn fast_retries() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
    }
}

#[test]
fn append_is_not_resent_after_a_server_error() {
    let server = MockServer::start();
    mock_titles(&server, &["traitements"]);
    let append = server.mock(|when, then| {
        when.method(POST).path_suffix(":append");
        then.status(500).json_body(json!({"error": {"code": 500, "message": "backend error"}}));
    });

    let columns = ColumnSchema::from_columns(["date", "parcelle", "produit"]);
    let err = backend(&server)
        .with_retry_config(fast_retries())
        .append_row(
            Table::Traitements,
            &columns,
            &traitement("A1", "2024-05-01", "Soufre"),
        )
        .unwrap_err();
    append.assert();
    assert!(err.is_remote());
}

#[test]
fn reads_are_retried_after_a_server_error() {
    let server = MockServer::start();
    mock_titles(&server, &["traitements"]);
    let values = server.mock(|when, then| {
        when.method(GET).path_prefix(format!("{SHEET_PATH}/values/"));
        then.status(503).json_body(json!({"error": {"code": 503, "message": "unavailable"}}));
    });

    let err = backend(&server)
        .with_retry_config(fast_retries())
        .read_all(Table::Traitements)
        .unwrap_err();
    values.assert_calls(4);
    assert!(err.is_remote());
}

#[test]
fn store_reads_through_the_http_backend() {
    let server = MockServer::start();
    mock_titles(&server, &["gdd"]);
    let values = server.mock(|when, then| {
        when.method(GET).path_prefix(format!("{SHEET_PATH}/values/"));
        then.status(200).json_body(json!({
            "values": [["date", "gdd"], ["2024-05-01", 3], ["2024-05-02", 5.5]]
        }));
    });
    let fixture = StoreFixture::new();
    let secrets = fixture.create_secrets(&server.base_url());
    let store = TableStore::builder(fixture.path())
        .secrets(secrets)
        .remote_config(settings())
        .build()
        .unwrap();

    let outcome = store.load(Table::Gdd).unwrap();
    values.assert();
    assert_eq!(outcome.served_by, BackendKind::Remote);
    assert_eq!(outcome.value.len(), 2);
    assert_eq!(outcome.value[1].number("gdd"), Some(5.5));
    assert_eq!(fixture.local().read_all(Table::Gdd).unwrap().records.len(), 2);
}

#[test]
fn unreachable_api_falls_back_to_local_files() {
    let server = MockServer::start();
    let fixture = StoreFixture::new();
    fixture.seed_table(Table::Gdd, vec![Record::new().with("date", "2024-05-01").with("gdd", 3)]);
    let secrets = fixture.create_secrets(&server.base_url());
    let store = TableStore::builder(fixture.path())
        .secrets(secrets)
        .remote_config(settings())
        .build()
        .unwrap();

    let outcome = store.load(Table::Gdd).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Local);
    assert_eq!(outcome.value.len(), 1);
    let kinds: Vec<_> = outcome.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(kinds, [WarningKind::RemoteUnavailable, WarningKind::ServedLocal]);
}
