use lamina_core::{Error, Partition, Predicate, Value};
use lamina_tests::{store, Order};

fn order(id: &str, tenant: &str, amount: i64) -> Order { Order { id: id.into(), tenant_id: tenant.into(), amount } }

#[tokio::test]
async fn save_resolves_partition_from_the_record() {
    let store = store();
    store.save(&order("o1", "t1", 100)).await.unwrap();

    let fetched: Order = store
        .fetch(&[Value::from("o1")], &Partition::new().bind("tenantId", "t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.amount, 100);
}

#[tokio::test]
async fn fetch_without_binding_fails_with_partition_required() {
    let store = store();
    store.save(&order("o1", "t1", 100)).await.unwrap();

    let err = store.fetch::<Order>(&[Value::from("o1")], &Partition::new()).await.unwrap_err();
    match err {
        Error::PartitionRequired { fields } => assert_eq!(fields, vec!["tenantId".to_string()]),
        other => panic!("expected PartitionRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_binding_fails_with_missing_fields() {
    let store = store();
    let err = store
        .fetch::<Order>(&[Value::from("o1")], &Partition::new().bind("other", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingPartitionFields { missing, .. } if missing == vec!["tenantId".to_string()]));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let store = store();
    store.save(&order("o1", "t1", 100)).await.unwrap();
    store.save(&order("o2", "t2", 200)).await.unwrap();
    // Same id in two tenants is fine: distinct subspaces.
    store.save(&order("o1", "t2", 999)).await.unwrap();

    let t1: Option<Order> = store.fetch(&[Value::from("o2")], &Partition::new().bind("tenantId", "t1")).await.unwrap();
    assert!(t1.is_none());

    let t2_o1: Order = store.fetch(&[Value::from("o1")], &Partition::new().bind("tenantId", "t2")).await.unwrap().unwrap();
    assert_eq!(t2_o1.amount, 999);

    // Queries see only the bound tenant.
    let t2 = store
        .query::<Order>()
        .partition("tenantId", "t2")
        .filter(Predicate::gt("amount", 0))
        .fetch()
        .await
        .unwrap();
    let mut ids: Vec<&str> = t2.iter().map(|o| o.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["o1", "o2"]);
}

#[tokio::test]
async fn queries_without_binding_fail() {
    let store = store();
    store.save(&order("o1", "t1", 100)).await.unwrap();
    let err = store.query::<Order>().filter(Predicate::gt("amount", 0)).fetch().await.unwrap_err();
    assert!(matches!(err, Error::PartitionRequired { .. }));
}
