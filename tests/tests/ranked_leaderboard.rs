use lamina_core::{Partition, Value};
use lamina_tests::{store, Play, Score};

fn score(id: &str, points: i64) -> Score { Score { id: id.into(), points } }

#[tokio::test]
async fn top_k_rank_and_percentile() {
    let store = store();
    let none = Partition::new();

    // Insert out of order; the structure is maintained per save.
    for (id, points) in [("C", 30), ("A", 10), ("E", 50), ("B", 20), ("D", 40)] {
        store.save(&score(id, points)).await.unwrap();
    }

    let top = store.ranked_top_k::<Score>("Score_rank", &none, 3).await.unwrap();
    assert_eq!(
        top,
        vec![
            (Value::Int(50), vec![Value::from("E")]),
            (Value::Int(40), vec![Value::from("D")]),
            (Value::Int(30), vec![Value::from("C")]),
        ]
    );

    assert_eq!(store.ranked_rank::<Score>("Score_rank", &none, Value::Int(50), &[Value::from("E")]).await.unwrap(), Some(0));
    assert_eq!(store.ranked_rank::<Score>("Score_rank", &none, Value::Int(10), &[Value::from("A")]).await.unwrap(), Some(4));
    assert_eq!(
        store.ranked_by_rank::<Score>("Score_rank", &none, 2).await.unwrap(),
        Some((Value::Int(30), vec![Value::from("C")]))
    );
    assert_eq!(
        store.ranked_percentile::<Score>("Score_rank", &none, 0.5).await.unwrap(),
        Some((Value::Int(30), vec![Value::from("C")]))
    );
    assert_eq!(store.ranked_count::<Score>("Score_rank", &none).await.unwrap(), 5);
}

#[tokio::test]
async fn score_updates_move_the_entry() {
    let store = store();
    let none = Partition::new();

    store.save(&score("A", 10)).await.unwrap();
    store.save(&score("B", 20)).await.unwrap();
    store.save(&score("A", 99)).await.unwrap();

    let top = store.ranked_top_k::<Score>("Score_rank", &none, 2).await.unwrap();
    assert_eq!(top[0], (Value::Int(99), vec![Value::from("A")]));
    assert_eq!(store.ranked_count::<Score>("Score_rank", &none).await.unwrap(), 2);

    // Old position is gone.
    assert_eq!(store.ranked_rank::<Score>("Score_rank", &none, Value::Int(10), &[Value::from("A")]).await.unwrap(), None);
}

#[tokio::test]
async fn deletes_shrink_the_list() {
    let store = store();
    let none = Partition::new();
    for (id, points) in [("A", 10), ("B", 20), ("C", 30)] {
        store.save(&score(id, points)).await.unwrap();
    }
    store.delete::<Score>(&[Value::from("B")], &none).await.unwrap();

    assert_eq!(store.ranked_count::<Score>("Score_rank", &none).await.unwrap(), 2);
    assert_eq!(store.ranked_rank::<Score>("Score_rank", &none, Value::Int(10), &[Value::from("A")]).await.unwrap(), Some(1));
}

#[tokio::test]
async fn absent_rank_queries_return_none() {
    let store = store();
    let none = Partition::new();
    assert_eq!(store.ranked_by_rank::<Score>("Score_rank", &none, 0).await.unwrap(), None);
    store.save(&score("A", 10)).await.unwrap();
    assert_eq!(store.ranked_by_rank::<Score>("Score_rank", &none, 1).await.unwrap(), None);
    assert_eq!(store.ranked_rank::<Score>("Score_rank", &none, Value::Int(11), &[Value::from("A")]).await.unwrap(), None);
}

#[tokio::test]
async fn leaderboard_windows_partition_by_day() {
    let store = store();
    let none = Partition::new();

    let day = |d: i64, offset: f64| (d * 86_400) as f64 + offset;
    for (id, at, points) in [
        ("p1", day(0, 10.0), 100),
        ("p2", day(0, 20.0), 300),
        ("p3", day(0, 30.0), 200),
        ("p4", day(1, 10.0), 50),
    ] {
        store.save(&Play { id: id.into(), at, points }).await.unwrap();
    }

    let day0 = store.leaderboard_top_k::<Play>("Play_daily", &none, 0, 10).await.unwrap();
    assert_eq!(
        day0.iter().map(|(points, _)| points.clone()).collect::<Vec<_>>(),
        vec![Value::Int(300), Value::Int(200), Value::Int(100)]
    );

    let day1 = store.leaderboard_top_k::<Play>("Play_daily", &none, 1, 10).await.unwrap();
    assert_eq!(day1.len(), 1);

    // Re-dating a play moves it across windows.
    store.save(&Play { id: "p4".into(), at: day(0, 40.0), points: 50 }).await.unwrap();
    assert!(store.leaderboard_top_k::<Play>("Play_daily", &none, 1, 10).await.unwrap().is_empty());
    assert_eq!(store.leaderboard_top_k::<Play>("Play_daily", &none, 0, 10).await.unwrap().len(), 4);
}
