//! Property-based tests for row streaming

use proptest::prelude::*;
use qenv_io::{ReaderState, ResultView};
use qenv_test_utils::{sample_rows, ChunkedReader, EnvelopeBuilder, SampleRow};
use serde_json::{Map, Value};

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        "\\PC{0,12}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn every_row_is_yielded_once_in_order(count in 0usize..60, chunk in 1usize..64) {
        let body = EnvelopeBuilder::standard(sample_rows(count)).build_bytes();
        let mut view: ResultView<SampleRow, _> =
            ResultView::from_reader(ChunkedReader::new(body, chunk));

        let rows: Vec<SampleRow> = view
            .rows()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        prop_assert_eq!(rows.len(), count);
        for (i, row) in rows.iter().enumerate() {
            prop_assert_eq!(row.id, i as u64);
        }
        prop_assert_eq!(view.state(), ReaderState::TrailingParsed);
        prop_assert_eq!(view.metrics().unwrap().result_count, count as u64);
    }

    #[test]
    fn materialized_rows_replay_identically(count in 0usize..30, draws in 1usize..4) {
        let body = EnvelopeBuilder::standard(sample_rows(count)).build_bytes();
        let mut view: ResultView<SampleRow, _> = ResultView::from_reader(&body[..]);

        let cached = view.materialize().unwrap().to_vec();
        prop_assert_eq!(cached.len(), count);
        for _ in 0..draws {
            let replay: Vec<SampleRow> = view.rows().unwrap().map(Result::unwrap).collect();
            prop_assert_eq!(&replay, &cached);
        }
    }

    #[test]
    fn abandoning_the_draw_still_reaches_metrics(count in 1usize..40, taken in 0usize..40) {
        let body = EnvelopeBuilder::standard(sample_rows(count)).build_bytes();
        let mut view: ResultView<SampleRow, _> = ResultView::from_reader(&body[..]);

        let seen = view.rows().unwrap().take(taken).count();
        prop_assert_eq!(seen, taken.min(count));
        prop_assert_eq!(view.state(), ReaderState::TrailingParsed);
        prop_assert_eq!(view.metrics().unwrap().result_count, count as u64);
    }

    #[test]
    fn rows_decode_like_serde_json(rows in prop::collection::vec(json_value(), 0..8), chunk in 1usize..16) {
        let body = EnvelopeBuilder::new()
            .status("success")
            .results(rows.clone())
            .build_bytes();
        let mut view: ResultView<Value, _> =
            ResultView::from_reader(ChunkedReader::new(body, chunk));

        let decoded: Vec<Value> = view
            .rows()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        prop_assert_eq!(decoded, rows);
    }
}
