use lamina_core::{Error, Partition, Value};
use lamina_tests::{store, Sale};

fn group(region: &str) -> Vec<Value> { vec![Value::from(region)] }

#[tokio::test]
async fn count_and_sum_follow_the_record_stream() {
    let store = store();
    let none = Partition::new();

    store.save(&Sale::new("s1", "eu", 10)).await.unwrap();
    store.save(&Sale::new("s2", "eu", 30)).await.unwrap();
    store.save(&Sale::new("s3", "us", 5)).await.unwrap();

    assert_eq!(store.aggregate_counter::<Sale>("Sale_count", &none, &group("eu")).await.unwrap(), 2);
    assert_eq!(store.aggregate_counter::<Sale>("Sale_sum", &none, &group("eu")).await.unwrap(), 40);
    assert_eq!(store.aggregate_counter::<Sale>("Sale_count", &none, &group("us")).await.unwrap(), 1);

    // Value change adjusts the sum without touching the count.
    store.save(&Sale::new("s2", "eu", 50)).await.unwrap();
    assert_eq!(store.aggregate_counter::<Sale>("Sale_count", &none, &group("eu")).await.unwrap(), 2);
    assert_eq!(store.aggregate_counter::<Sale>("Sale_sum", &none, &group("eu")).await.unwrap(), 60);

    // Region change moves the contribution between groups.
    store.save(&Sale::new("s3", "eu", 5)).await.unwrap();
    assert_eq!(store.aggregate_counter::<Sale>("Sale_count", &none, &group("us")).await.unwrap(), 0);
    assert_eq!(store.aggregate_counter::<Sale>("Sale_count", &none, &group("eu")).await.unwrap(), 3);

    store.delete::<Sale>(&[Value::from("s1")], &none).await.unwrap();
    assert_eq!(store.aggregate_counter::<Sale>("Sale_sum", &none, &group("eu")).await.unwrap(), 55);
}

#[tokio::test]
async fn average_divides_at_read_time() {
    let store = store();
    let none = Partition::new();
    store.save(&Sale::new("s1", "eu", 10)).await.unwrap();
    store.save(&Sale::new("s2", "eu", 20)).await.unwrap();

    assert_eq!(store.aggregate_average::<Sale>("Sale_avg", &none, &group("eu")).await.unwrap(), Some(15.0));
    assert_eq!(store.aggregate_average::<Sale>("Sale_avg", &none, &group("nowhere")).await.unwrap(), None);
}

#[tokio::test]
async fn max_survives_deletes_through_the_backing_index() {
    let store = store();
    let none = Partition::new();
    for (id, amount) in [("s1", 10), ("s2", 40), ("s3", 25)] {
        store.save(&Sale::new(id, "eu", amount)).await.unwrap();
    }
    assert_eq!(store.aggregate_extremum::<Sale>("Sale_max", &none, &group("eu")).await.unwrap(), Some(40));

    store.delete::<Sale>(&[Value::from("s2")], &none).await.unwrap();
    assert_eq!(store.aggregate_extremum::<Sale>("Sale_max", &none, &group("eu")).await.unwrap(), Some(25));

    store.delete::<Sale>(&[Value::from("s1")], &none).await.unwrap();
    store.delete::<Sale>(&[Value::from("s3")], &none).await.unwrap();
    assert_eq!(store.aggregate_extremum::<Sale>("Sale_max", &none, &group("eu")).await.unwrap(), None);
}

#[tokio::test]
async fn distinct_estimate_lands_in_a_sane_band() {
    let store = store();
    let none = Partition::new();
    // 60 distinct amounts, each seen twice.
    for i in 0..120i64 {
        store.save(&Sale::new(&format!("s{i}"), "eu", i % 60)).await.unwrap();
    }
    let estimate = store.distinct_estimate::<Sale>("Sale_distinct", &none, &group("eu")).await.unwrap();
    assert!(estimate > 25.0 && estimate < 160.0, "estimate {estimate} out of band for 60 distinct values");
}

#[tokio::test]
async fn percentile_estimate_tracks_the_distribution() {
    let store = store();
    let none = Partition::new();
    for i in 0..100i64 {
        store.save(&Sale::new(&format!("s{i}"), "eu", i)).await.unwrap();
    }
    let median = store.percentile_estimate::<Sale>("Sale_p", &none, &group("eu"), 0.5).await.unwrap().unwrap();
    assert!((35.0..=65.0).contains(&median), "median estimate {median} too far from 50");

    let p90 = store.percentile_estimate::<Sale>("Sale_p", &none, &group("eu"), 0.9).await.unwrap().unwrap();
    assert!(p90 > median);
}

#[tokio::test]
async fn unsupported_aggregate_delete_names_the_index() {
    // A separate type whose Min index has no backing value index.
    use lamina_core::schema::index::IndexKind;
    use lamina_core::{DirSegment, FieldExtractor, FieldKind, IndexDescriptor, Persistable, TypeDescriptor};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Reading {
        id: String,
        value: i64,
    }

    impl Persistable for Reading {
        fn type_name() -> &'static str { "Reading" }

        fn vtable() -> &'static [FieldExtractor<Self>] {
            const VTABLE: &[FieldExtractor<Reading>] = &[
                FieldExtractor { name: "id", get: |r| Value::String(r.id.clone()) },
                FieldExtractor { name: "value", get: |r| Value::Int(r.value) },
            ];
            VTABLE
        }

        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::new("Reading")
                .field("id", FieldKind::String)
                .field("value", FieldKind::Int)
                .primary_key(["id"])
                .directory([DirSegment::Static("readings".into())])
                .index(IndexDescriptor::new("Reading_min", IndexKind::Min, ["value"]))
        }
    }

    let store = store();
    store.save(&Reading { id: "r1".into(), value: 5 }).await.unwrap();
    let err = store.delete::<Reading>(&[Value::from("r1")], &Partition::new()).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedAggregationDelete { index, .. } if index == "Reading_min"));
}
