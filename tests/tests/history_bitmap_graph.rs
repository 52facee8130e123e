use lamina_core::index::graph::Permutation;
use lamina_core::{Partition, Value};
use lamina_tests::{store, Account, Follow, Ticket};

#[tokio::test]
async fn history_appends_and_reads_point_in_time() {
    let store = store();
    let none = Partition::new();
    let id = [Value::from("acc1")];

    store.save(&Account { id: "acc1".into(), balance: 100 }).await.unwrap();
    store.save(&Account { id: "acc1".into(), balance: 250 }).await.unwrap();
    store.delete::<Account>(&id, &none).await.unwrap();

    let series = store.history_series::<Account>("Account_history", &none, &id).await.unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series[0].stored, Some(vec![Value::Int(100)]));
    assert_eq!(series[1].stored, Some(vec![Value::Int(250)]));
    assert_eq!(series[2].stored, None, "the delete appends a tombstone entry");
    assert!(series[0].version < series[1].version && series[1].version < series[2].version);

    // Point-in-time: at the middle commit the balance was 250.
    let middle = store
        .history_at_version::<Account>("Account_history", &none, &id, series[1].version)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(middle.stored, Some(vec![Value::Int(250)]));

    let before_any = series[0].version - 1;
    assert!(store.history_at_version::<Account>("Account_history", &none, &id, before_any).await.unwrap().is_none());
}

#[tokio::test]
async fn bitmap_membership_and_cardinality() {
    let store = store();
    let none = Partition::new();
    let pool = [Value::from("daily")];

    for (id, number) in [("t1", 1i64), ("t2", 17), ("t3", 70_001), ("t4", 2)] {
        store.save(&Ticket { id: id.into(), pool: "daily".into(), number }).await.unwrap();
    }

    assert!(store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 17).await.unwrap());
    assert!(store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 70_001).await.unwrap());
    assert!(!store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 3).await.unwrap());
    assert_eq!(store.bitmap_cardinality::<Ticket>("Ticket_numbers", &none, &pool).await.unwrap(), 4);

    store.delete::<Ticket>(&[Value::from("t2")], &none).await.unwrap();
    assert!(!store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 17).await.unwrap());
    assert_eq!(store.bitmap_cardinality::<Ticket>("Ticket_numbers", &none, &pool).await.unwrap(), 3);

    // Renumbering moves the bit.
    store.save(&Ticket { id: "t1".into(), pool: "daily".into(), number: 8 }).await.unwrap();
    assert!(!store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 1).await.unwrap());
    assert!(store.bitmap_contains::<Ticket>("Ticket_numbers", &none, &pool, 8).await.unwrap());
}

#[tokio::test]
async fn graph_traversal_by_any_bound_prefix() {
    let store = store();
    let none = Partition::new();

    let edge = |id: &str, from: &str, label: &str, to: &str| Follow {
        id: id.into(),
        from: from.into(),
        label: label.into(),
        to: to.into(),
        since: 2021,
    };
    store.save(&edge("e1", "alice", "follows", "bob")).await.unwrap();
    store.save(&edge("e2", "alice", "follows", "carol")).await.unwrap();
    store.save(&edge("e3", "dan", "follows", "bob")).await.unwrap();
    store.save(&edge("e4", "bob", "blocks", "mallory")).await.unwrap();

    // Forward: everyone alice follows.
    let out = store
        .graph_traverse::<Follow>("Follow_edges", &none, Permutation::Spo, &[Value::from("alice")])
        .await
        .unwrap();
    assert_eq!(out.iter().map(|e| e.to.clone()).collect::<Vec<_>>(), vec![Value::from("bob"), Value::from("carol")]);

    // Reverse: everyone pointing at bob.
    let inbound = store
        .graph_traverse::<Follow>("Follow_edges", &none, Permutation::Osp, &[Value::from("bob")])
        .await
        .unwrap();
    assert_eq!(inbound.iter().map(|e| e.from.clone()).collect::<Vec<_>>(), vec![Value::from("alice"), Value::from("dan")]);

    // Label-bound: hexastore serves predicate-led lookups.
    let blocks = store
        .graph_traverse::<Follow>("Follow_edges", &none, Permutation::Pso, &[Value::from("blocks")])
        .await
        .unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].to, Value::from("mallory"));

    // Deleting the record removes the edge from every permutation.
    store.delete::<Follow>(&[Value::from("e4")], &none).await.unwrap();
    assert!(store
        .graph_traverse::<Follow>("Follow_edges", &none, Permutation::Pso, &[Value::from("blocks")])
        .await
        .unwrap()
        .is_empty());
}
