//! Local-only behavior of the table store.

use vinestore::core::{Record, Table};
use vinestore::storage::BackendKind;
use vinestore::test_utils::fixtures::{traitement, vendange};
use vinestore::test_utils::{StoreFixture, init_test_tracing};
use vinestore::{StoreError, TableStore};

fn store(fixture: &StoreFixture) -> TableStore {
    init_test_tracing();
    TableStore::builder(fixture.path()).build().unwrap()
}

#[test]
fn replace_then_load_returns_union_schema() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    let records = vec![
        Record::new().with("nom", "Soufre").with("dar", 5),
        Record::new().with("nom", "Cuivre").with("bio", true),
    ];

    store.replace(Table::Produits, records).unwrap();
    let loaded = store.load_table(Table::Produits).unwrap().value;

    assert_eq!(loaded.columns.as_slice(), ["nom", "dar", "bio"]);
    assert_eq!(loaded.records.len(), 2);
    assert!(loaded.records[0].value("bio").is_empty());
    assert!(loaded.records[1].value("dar").is_empty());
    assert!(loaded.records[1].flag("bio"));
}

#[test]
fn append_never_overwrites_prior_rows() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    for i in 1..=5 {
        store
            .append(
                Table::Traitements,
                traitement("A1", &format!("2024-05-0{i}"), "Soufre"),
            )
            .unwrap();
    }
    let dates: Vec<String> = store
        .load(Table::Traitements)
        .unwrap()
        .value
        .iter()
        .map(|r| r.text("date").unwrap().to_string())
        .collect();
    assert_eq!(
        dates,
        ["2024-05-01", "2024-05-02", "2024-05-03", "2024-05-04", "2024-05-05"]
    );
}

#[test]
fn new_column_is_backfilled() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    store.append(Table::Meteo, Record::new().with("date", "2024-05-01").with("tmax", 21)).unwrap();
    store
        .append(
            Table::Meteo,
            Record::new().with("date", "2024-05-02").with("pluie", 4.5),
        )
        .unwrap();

    let loaded = store.load_table(Table::Meteo).unwrap().value;
    assert_eq!(loaded.columns.as_slice(), ["date", "tmax", "pluie"]);
    assert!(loaded.records[0].value("pluie").is_empty());
    assert_eq!(loaded.records[1].number("pluie"), Some(4.5));
}

#[test]
fn upsert_matches_numeric_keys_across_types() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    store.append(Table::Vendanges, vendange(2024, "CAMPAGNE", 900.0)).unwrap();

    let key = vec!["annee".to_string()];
    let result = store
        .upsert(
            Table::Vendanges,
            Record::new().with("annee", "2024.0").with("type", "CAMPAGNE").with("poids", 950),
            Some(&key),
        )
        .unwrap()
        .value;
    assert!(result.replaced);
    assert_eq!(store.load(Table::Vendanges).unwrap().value.len(), 1);
}

#[test]
fn upsert_with_empty_key_value_writes_nothing() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    store.append(Table::Gdd, Record::new().with("date", "2024-05-01").with("gdd", 3)).unwrap();

    let err = store
        .upsert(Table::Gdd, Record::new().with("gdd", 4), None)
        .unwrap_err();
    assert!(matches!(err, StoreError::SchemaConflict { .. }));
    assert_eq!(store.load(Table::Gdd).unwrap().value.len(), 1);
}

#[test]
fn legacy_files_are_read() {
    let fixture = StoreFixture::new();
    fixture.create_file(
        "meteo_historique.json",
        r#"[{"date": "2024-05-01", "tmax": 22.5, "pluie": NaN}]"#,
    );
    let store = store(&fixture);

    let outcome = store.load_table(Table::Meteo).unwrap();
    assert_eq!(outcome.served_by, BackendKind::Local);
    assert_eq!(outcome.value.columns.as_slice(), ["date", "tmax", "pluie"]);
    assert!(outcome.value.records[0].value("pluie").is_empty());
}

#[test]
fn corrupt_table_file_is_storage_unavailable() {
    let fixture = StoreFixture::new();
    fixture.create_file("gdd.json", "{ not json");
    let err = store(&fixture).load(Table::Gdd).unwrap_err();
    assert!(matches!(err, StoreError::StorageUnavailable(_)));
}

#[test]
fn json_columns_keep_nested_documents() {
    let fixture = StoreFixture::new();
    let store = store(&fixture);
    let object = serde_json::json!({
        "annee": 2024,
        "date": "2024-06-10",
        "risque_mildiou": {"niveau": "fort", "score": 7}
    });
    let record = Record::from_json_object(Table::Alertes, object.as_object().unwrap()).unwrap();
    store.append(Table::Alertes, record).unwrap();

    let loaded = store.load(Table::Alertes).unwrap().value;
    assert_eq!(loaded[0].json("risque_mildiou").unwrap()["score"], 7);
}

#[test]
fn sessions_sharing_a_directory_see_each_other() {
    let fixture = StoreFixture::new();
    let first = store(&fixture);
    let second = store(&fixture);

    first.append(Table::Fertilisation, Record::new().with("parcelle", "A1")).unwrap();
    second.append(Table::Fertilisation, Record::new().with("parcelle", "B2")).unwrap();

    assert_eq!(first.load(Table::Fertilisation).unwrap().value.len(), 2);
}
