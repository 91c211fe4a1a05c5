use proptest::prelude::*;

use vinestore::core::{Record, Table, Value};

proptest! {
    #[test]
    fn numeric_text_matches_numbers(n in -100_000i64..100_000) {
        let number = Value::from(n);
        prop_assert_eq!(Value::from(format!("{n}")).key_text(), number.key_text());
        prop_assert_eq!(Value::from(format!("{n}.0")).key_text(), number.key_text());
        prop_assert_eq!(Value::from(format!("  {n} ")).key_text(), number.key_text());
    }

    #[test]
    fn text_keys_are_trimmed_but_case_sensitive(word in "[A-Za-z][a-z]{1,10}") {
        prop_assert_eq!(Value::from(format!(" {word}\t")).key_text(), word.clone());
        let upper = word.to_uppercase();
        if upper != word {
            prop_assert_ne!(Value::from(upper).key_text(), word);
        }
    }

    #[test]
    fn midnight_timestamps_match_dates(year in 2000i32..2100, month in 1u32..=12, day in 1u32..=28) {
        let date = format!("{year:04}-{month:02}-{day:02}");
        prop_assert_eq!(
            Value::from(format!("{date}T00:00:00")).key_text(),
            Value::from(date.as_str()).key_text()
        );
    }

    #[test]
    fn upsert_key_ignores_cell_types(annee in 1990i64..2100, kind in "[A-Z]{3,10}") {
        let stored = Record::new().with("annee", annee).with("type", kind.as_str());
        let incoming = Record::new().with("annee", format!("{annee}")).with("type", format!(" {kind}"));
        let key_columns = ["annee".to_string(), "type".to_string()];

        let key = incoming.key_of(Table::Vendanges, &key_columns).unwrap();
        prop_assert!(stored.matches_key(&key_columns, &key));
    }
}
