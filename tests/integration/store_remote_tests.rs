//! Remote mirroring, fallback and catch-up, against the in-memory spreadsheet.

use std::sync::Arc;
use std::thread;

use vinestore::core::{Record, Table, Value};
use vinestore::storage::{BackendKind, TableBackend};
use vinestore::sync::{ConnectivityState, WarningKind};
use vinestore::test_utils::fixtures::{traitement, vendange};
use vinestore::test_utils::{MemorySheets, RemoteFault, StoreFixture, init_test_tracing};
use vinestore::TableStore;

fn remote_store(fixture: &StoreFixture, sheets: &Arc<MemorySheets>) -> TableStore {
    init_test_tracing();
    TableStore::builder(fixture.path())
        .remote(Box::new(Arc::clone(sheets)))
        .build()
        .unwrap()
}

fn kinds<T>(outcome: &vinestore::sync::Outcome<T>) -> Vec<WarningKind> {
    outcome.warnings.iter().map(|w| w.kind).collect()
}

#[test]
fn healthy_remote_receives_every_write() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    let store = remote_store(&fixture, &sheets);

    let outcome = store
        .append(Table::Traitements, traitement("A1", "2024-05-01", "Soufre"))
        .unwrap();
    assert_eq!(outcome.served_by, BackendKind::Remote);
    assert!(outcome.warnings.is_empty());

    store
        .append(Table::Traitements, traitement("B2", "2024-05-02", "Cuivre"))
        .unwrap();
    let remote = sheets.records(Table::Traitements);
    assert_eq!(remote.len(), 2);
    assert_eq!(remote[1].text("parcelle"), Some("B2"));
    assert_eq!(fixture.local().read_all(Table::Traitements).unwrap().records.len(), 2);
}

#[test]
fn failed_startup_probe_then_catch_up() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    sheets.inject(RemoteFault::All);
    let store = remote_store(&fixture, &sheets);

    let outcome = store.append(Table::Vendanges, vendange(2024, "CAMPAGNE", 900.0)).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Local);
    assert_eq!(
        kinds(&outcome),
        [WarningKind::RemoteUnavailable, WarningKind::MirrorDeferred]
    );

    // The remote recovers, but this process keeps its decision until a sync.
    sheets.clear_faults();
    let outcome = store.load(Table::Vendanges).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Local);
    assert_eq!(kinds(&outcome), [WarningKind::ServedLocal]);
    assert!(sheets.records(Table::Vendanges).is_empty());

    let report = store.sync(&[]).unwrap();
    assert_eq!(report.value.replayed(), 1);
    assert_eq!(report.value.pending(), 0);
    assert_eq!(sheets.records(Table::Vendanges).len(), 1);
    assert_eq!(store.status().unwrap().connectivity, ConnectivityState::Healthy);
}

#[test]
fn failed_mirror_is_replayed_on_next_contact() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(Table::Traitements, &["date", "parcelle", "produit"], vec![]);
    sheets.inject(RemoteFault::Operation("append_row".into()));
    let store = remote_store(&fixture, &sheets);

    let outcome = store
        .append(Table::Traitements, traitement("A1", "2024-05-01", "Soufre"))
        .unwrap();
    assert_eq!(outcome.served_by, BackendKind::Local);
    assert!(kinds(&outcome).contains(&WarningKind::MirrorDeferred));
    assert_eq!(store.status().unwrap().pending[&Table::Traitements], 1);

    sheets.clear_faults();
    store.reset_connectivity();
    let outcome = store.load(Table::Traitements).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Remote);
    assert_eq!(outcome.value.len(), 1);
    assert_eq!(sheets.records(Table::Traitements).len(), 1);
    assert!(store.status().unwrap().pending.is_empty());
}

#[test]
fn concurrent_sessions_both_land_on_the_remote() {
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(Table::Traitements, &["date", "parcelle", "produit"], vec![]);
    let first_dir = StoreFixture::new();
    let second_dir = StoreFixture::new();
    let first = remote_store(&first_dir, &sheets);
    let second = remote_store(&second_dir, &sheets);

    thread::scope(|scope| {
        for (store, parcelle) in [(&first, "A1"), (&second, "B2")] {
            scope.spawn(move || {
                for day in 1..=5 {
                    store
                        .append(
                            Table::Traitements,
                            traitement(parcelle, &format!("2024-05-0{day}"), "Soufre"),
                        )
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(sheets.records(Table::Traitements).len(), 10);
    let seen = first.load(Table::Traitements).unwrap().value;
    assert_eq!(seen.len(), 10);
    assert_eq!(seen.iter().filter(|r| r.text("parcelle") == Some("B2")).count(), 5);
}

#[test]
fn column_added_by_another_session_is_seen_on_load() {
    let sheets = Arc::new(MemorySheets::new());
    let first_dir = StoreFixture::new();
    let second_dir = StoreFixture::new();
    let first = remote_store(&first_dir, &sheets);
    let second = remote_store(&second_dir, &sheets);

    first
        .append(Table::Traitements, traitement("A1", "2024-05-01", "Soufre"))
        .unwrap();
    second
        .append(
            Table::Traitements,
            traitement("B2", "2024-05-02", "Cuivre").with("dose", 2.5),
        )
        .unwrap();

    let snapshot = first.load_table(Table::Traitements).unwrap().value;
    assert_eq!(snapshot.columns.as_slice(), ["date", "parcelle", "produit", "dose"]);
    assert!(snapshot.records[0].value("dose").is_empty());
    assert_eq!(snapshot.records[1].number("dose"), Some(2.5));
    assert_eq!(
        sheets.header(Table::Traitements),
        ["date", "parcelle", "produit", "dose"]
    );
}

#[test]
fn upsert_rewrites_exactly_the_physical_row() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(
        Table::Produits,
        &["nom", "dar"],
        vec![
            vec!["Soufre".into(), 5.into()],
            vec![],
            vec!["Cuivre".into(), 21.into()],
        ],
    );
    let store = remote_store(&fixture, &sheets);
    assert_eq!(store.load(Table::Produits).unwrap().value.len(), 2);

    let result = store
        .upsert(
            Table::Produits,
            Record::new().with("nom", "Cuivre").with("dar", 28),
            None,
        )
        .unwrap();
    assert_eq!(result.served_by, BackendKind::Remote);
    assert!(result.value.replaced);
    assert_eq!(result.value.position, 1);

    let rows = sheets.rows(Table::Produits);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], [Value::from("Soufre"), Value::from(5)]);
    assert!(rows[1].is_empty());
    assert_eq!(rows[2], [Value::from("Cuivre"), Value::from(28)]);
}

#[test]
fn vacant_worksheet_receives_the_local_table() {
    let fixture = StoreFixture::new();
    fixture.seed_table(
        Table::Meteo,
        vec![
            Record::new().with("date", "2024-05-01").with("tmax", 21),
            Record::new().with("date", "2024-05-02").with("tmax", 24),
        ],
    );
    let sheets = Arc::new(MemorySheets::new());
    let store = remote_store(&fixture, &sheets);

    let outcome = store.load(Table::Meteo).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Remote);
    assert_eq!(outcome.value.len(), 2);
    assert_eq!(sheets.header(Table::Meteo), ["date", "tmax"]);
    assert_eq!(sheets.records(Table::Meteo).len(), 2);
}

#[test]
fn remote_rows_replace_a_stale_local_copy() {
    let fixture = StoreFixture::new();
    fixture.seed_table(Table::Gdd, vec![Record::new().with("date", "2024-05-01").with("gdd", 3)]);
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(
        Table::Gdd,
        &["date", "gdd"],
        vec![
            vec!["2024-05-01".into(), 3.into()],
            vec!["2024-05-02".into(), 5.into()],
        ],
    );
    let store = remote_store(&fixture, &sheets);

    assert_eq!(store.load(Table::Gdd).unwrap().value.len(), 2);
    assert_eq!(fixture.local().read_all(Table::Gdd).unwrap().records.len(), 2);
}

#[test]
fn documents_round_trip_through_the_remote() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    let store = remote_store(&fixture, &sheets);
    let document = serde_json::json!({"parcelles": [{"nom": "A1", "surface": 0.8}]});

    store.save_document(Table::Config, &document).unwrap();
    assert_eq!(sheets.header(Table::Config), ["json_content"]);

    let other_dir = StoreFixture::new();
    let other = remote_store(&other_dir, &sheets);
    let loaded = other.load_document(Table::Config).unwrap();
    assert_eq!(loaded.served_by, BackendKind::Remote);
    assert_eq!(loaded.value, Some(document));
}

#[test]
fn blank_header_cells_do_not_shift_written_values() {
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(
        Table::Meteo,
        &["date", "", "tmax"],
        vec![vec!["2024-05-01".into(), "note".into(), 21.into()]],
    );
    let store = remote_store(&fixture, &sheets);

    let outcome = store
        .append(
            Table::Meteo,
            Record::new().with("date", "2024-05-02").with("tmax", 30.0),
        )
        .unwrap();
    assert_eq!(outcome.served_by, BackendKind::Remote);
    assert_eq!(sheets.header(Table::Meteo), ["date", "tmax"]);

    let loaded = store.load(Table::Meteo).unwrap();
    assert_eq!(loaded.served_by, BackendKind::Remote);
    assert_eq!(loaded.value[0].number("tmax"), Some(21.0));
    assert_eq!(loaded.value[1].number("tmax"), Some(30.0));
}

#[test]
fn threads_sharing_one_store_never_lose_a_row() {
    const WRITERS: usize = 8;
    let fixture = StoreFixture::new();
    let sheets = Arc::new(MemorySheets::new());
    sheets.seed(Table::Traitements, &["date", "parcelle", "produit"], vec![]);
    let store = remote_store(&fixture, &sheets);

    thread::scope(|scope| {
        for i in 0..WRITERS {
            let store = &store;
            scope.spawn(move || {
                store
                    .append(
                        Table::Traitements,
                        traitement(&format!("P{i}"), "2024-05-01", "Soufre"),
                    )
                    .unwrap();
            });
        }
    });

    let local = fixture.local().read_all(Table::Traitements).unwrap();
    assert_eq!(local.records.len(), WRITERS);
    assert_eq!(sheets.records(Table::Traitements).len(), WRITERS);
    assert!(store.status().unwrap().pending.is_empty());
}
