use lamina_core::{Partition, Predicate, TextOp, Value};
use lamina_tests::{store, Article, Embedding, Place};

#[tokio::test]
async fn text_queries_plan_a_full_text_scan() {
    let store = store();
    for (id, body) in [
        ("a1", "the quick brown fox jumps"),
        ("a2", "a lazy brown dog sleeps"),
        ("a3", "quick dogs chase lazy foxes"),
    ] {
        store.save(&Article { id: id.into(), body: body.into() }).await.unwrap();
    }

    let explained = store
        .query::<Article>()
        .filter(Predicate::matches("body", TextOp::All, "brown quick"))
        .explain()
        .await
        .unwrap();
    assert!(explained.starts_with("FullTextScan[Article_body]"), "unexpected plan:\n{explained}");

    let found = store
        .query::<Article>()
        .filter(Predicate::matches("body", TextOp::All, "brown quick"))
        .fetch()
        .await
        .unwrap();
    assert_eq!(found.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["a1"]);

    let phrase = store
        .query::<Article>()
        .filter(Predicate::matches("body", TextOp::Phrase, "lazy brown dog"))
        .fetch()
        .await
        .unwrap();
    assert_eq!(phrase.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["a2"]);
}

#[tokio::test]
async fn bm25_ranks_relevance() {
    let store = store();
    for (id, body) in [
        ("a1", "rust rust rust engines"),
        ("a2", "rust database engines and more engines"),
        ("a3", "nothing relevant here"),
    ] {
        store.save(&Article { id: id.into(), body: body.into() }).await.unwrap();
    }

    let ranked = store.text_search::<Article>("Article_body", &Partition::new(), "rust", 10).await.unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].1, vec![Value::from("a1")]);

    // Updating a document re-ranks it.
    store.save(&Article { id: "a3".into(), body: "rust rust rust rust rust".into() }).await.unwrap();
    let ranked = store.text_search::<Article>("Article_body", &Partition::new(), "rust", 10).await.unwrap();
    assert_eq!(ranked[0].1, vec![Value::from("a3")]);
}

#[tokio::test]
async fn vector_nearest_neighbors_flat_and_graph() {
    let store = store();
    let points: Vec<(String, [f32; 3])> = (0..5)
        .flat_map(|x| (0..5).map(move |y| (format!("p{x}_{y}"), [x as f32, y as f32, 0.0])))
        .collect();
    for (id, v) in &points {
        store.save(&Embedding::new(id, v)).await.unwrap();
    }

    for index in ["Embedding_flat", "Embedding_graph"] {
        let found = store
            .query::<Embedding>()
            .filter(Predicate::NearestTo { field: "vector".into(), target: vec![2.1, 3.2, 0.0], k: 1 })
            .using_index(index)
            .fetch()
            .await
            .unwrap();
        assert_eq!(found.len(), 1, "{index} returned {found:?}");
        assert_eq!(found[0].id, "p2_3", "{index} missed the nearest point");
    }
}

#[tokio::test]
async fn vector_delete_removes_results() {
    let store = store();
    store.save(&Embedding::new("a", &[0.0, 0.0, 0.0])).await.unwrap();
    store.save(&Embedding::new("b", &[5.0, 5.0, 5.0])).await.unwrap();
    store.delete::<Embedding>(&[Value::from("a")], &Partition::new()).await.unwrap();

    let found = store
        .query::<Embedding>()
        .filter(Predicate::NearestTo { field: "vector".into(), target: vec![0.0, 0.0, 0.0], k: 2 })
        .using_index("Embedding_flat")
        .fetch()
        .await
        .unwrap();
    assert_eq!(found.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
}

#[tokio::test]
async fn bounding_box_queries_post_filter_exactly() {
    let store = store();
    for (id, lat, lng) in [
        ("paris", 48.8566, 2.3522),
        ("london", 51.5074, -0.1278),
        ("madrid", 40.4168, -3.7038),
        ("sydney", -33.8688, 151.2093),
    ] {
        store.save(&Place { id: id.into(), lat, lng }).await.unwrap();
    }

    let predicate = Predicate::WithinBox { lat_field: "lat".into(), lng_field: "lng".into(), min: (45.0, -5.0), max: (55.0, 5.0) };
    let explained = store.query::<Place>().filter(predicate.clone()).explain().await.unwrap();
    assert!(explained.contains("SpatialScan[Place_geo]"), "unexpected plan:\n{explained}");
    // The exact box check survives as a filter above the cell cover.
    assert!(explained.starts_with("Filter"), "unexpected plan:\n{explained}");

    let mut found: Vec<String> =
        store.query::<Place>().filter(predicate).fetch().await.unwrap().into_iter().map(|p| p.id).collect();
    found.sort();
    assert_eq!(found, vec!["london", "paris"]);
}
