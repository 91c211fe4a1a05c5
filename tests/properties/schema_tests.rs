use proptest::prelude::*;

use vinestore::core::{ColumnSchema, Record, Table, reconcile};
use vinestore::storage::{Mutation, TableSnapshot};

fn arb_columns() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z_]{0,8}", 0..8)
}

fn arb_record() -> impl Strategy<Value = Record> {
    prop::collection::vec(("[a-z][a-z_]{0,6}", -1000i64..1000), 1..5).prop_map(|cells| {
        cells
            .into_iter()
            .fold(Record::new(), |record, (column, value)| record.with(column, value))
    })
}

proptest! {
    #[test]
    fn reconcile_keeps_existing_order(existing in arb_columns(), incoming in arb_columns()) {
        let existing = ColumnSchema::from_columns(&existing);
        let merged = reconcile(Table::Meteo, &existing, incoming.iter().map(String::as_str));

        prop_assert!(merged.columns.extends(&existing));
        prop_assert_eq!(&merged.columns.as_slice()[..existing.len()], existing.as_slice());
        for column in &incoming {
            prop_assert!(merged.columns.contains(column));
        }
        prop_assert_eq!(merged.schema_changed, !merged.added.is_empty());
        prop_assert_eq!(merged.columns.len(), existing.len() + merged.added.len());
    }

    #[test]
    fn reconcile_is_idempotent(existing in arb_columns(), incoming in arb_columns()) {
        let existing = ColumnSchema::from_columns(&existing);
        let once = reconcile(Table::Gdd, &existing, incoming.iter().map(String::as_str));
        let twice = reconcile(Table::Gdd, &once.columns, incoming.iter().map(String::as_str));
        prop_assert!(!twice.schema_changed);
        prop_assert_eq!(twice.columns, once.columns);
    }

    #[test]
    fn conform_lays_out_every_schema_column(record in arb_record(), extra in arb_columns()) {
        let schema = reconcile(
            Table::Produits,
            &ColumnSchema::from_columns(&extra),
            record.columns(),
        )
        .columns;
        let conformed = record.conform(Table::Produits, &schema).unwrap();

        prop_assert_eq!(conformed.columns().collect::<Vec<_>>(), schema.iter().collect::<Vec<_>>());
        prop_assert_eq!(&conformed, &record);
    }

    #[test]
    fn appends_never_rewrite_prior_rows(records in prop::collection::vec(arb_record(), 1..12)) {
        let mut snapshot = TableSnapshot::empty(Table::Fertilisation);
        for record in records {
            let before = snapshot.records.clone();
            let applied = snapshot.apply(&Mutation::Append { record }).unwrap();
            prop_assert_eq!(applied.after.records.len(), before.len() + 1);
            prop_assert_eq!(&applied.after.records[..before.len()], before.as_slice());
            prop_assert!(applied.after.columns.extends(&snapshot.columns));
            snapshot = applied.after;
        }
    }
}
