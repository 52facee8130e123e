//! Index/record consistency under mixed workloads: after any committed
//! sequence of saves and deletes, recomputed index keys must exactly match
//! the materialized entries, failed commits must leave no trace, and
//! replaying a no-op save must write nothing.

use lamina_core::{Partition, Value};
use lamina_kv::memory::MemoryKv;
use lamina_tests::{store, store_over, User};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn user(id: &str, email: &str, category: &str) -> User {
    User {
        id: id.into(),
        email: email.into(),
        name: format!("user {id}"),
        category: category.into(),
        tag: "t".into(),
        status: "s".into(),
        customer_id: "c".into(),
        created_at: 1,
    }
}

#[tokio::test]
async fn verify_is_clean_after_mixed_workload() {
    let store = store();
    let none = Partition::new();
    let mut rng = StdRng::seed_from_u64(7);
    let mut live: Vec<String> = Vec::new();

    for step in 0..80 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let id = format!("u{step}");
            store.save(&user(&id, &format!("{id}@x"), ["A", "B", "C"][step % 3])).await.unwrap();
            live.push(id);
        } else if rng.gen_bool(0.5) {
            // Replace with shuffled attributes.
            let id = live[rng.gen_range(0..live.len())].clone();
            store.save(&user(&id, &format!("{id}@x"), ["A", "B", "C"][rng.gen_range(0..3)])).await.unwrap();
        } else {
            let id = live.swap_remove(rng.gen_range(0..live.len()));
            assert!(store.delete::<User>(&[Value::from(id.as_str())], &none).await.unwrap());
        }
    }

    for index in ["User_email", "User_category", "User_tag", "User_created"] {
        let verification = store.verify_index::<User>(index, &none).await.unwrap();
        assert!(verification.is_clean(), "{index} drifted: {verification:?}");
        assert_eq!(verification.records_checked, live.len());
    }
}

#[tokio::test]
async fn failed_save_leaves_no_record_or_index_entries() {
    let kv = MemoryKv::new();
    let store = store_over(kv.clone());
    let none = Partition::new();

    store.save(&user("u1", "a@x", "A")).await.unwrap();
    let keys_before = kv.key_count();

    // Duplicate email: the whole transaction aborts.
    store.save(&user("u2", "a@x", "B")).await.unwrap_err();

    assert_eq!(kv.key_count(), keys_before, "aborted save must not change the keyspace");
    assert!(store.fetch::<User>(&[Value::from("u2")], &none).await.unwrap().is_none());
    let verification = store.verify_index::<User>("User_category", &none).await.unwrap();
    assert!(verification.is_clean());
}

#[tokio::test]
async fn replaying_an_identical_save_writes_nothing_new() {
    let kv = MemoryKv::new();
    let store = store_over(kv.clone());

    let u = user("u1", "a@x", "A");
    store.save(&u).await.unwrap();
    let keys_before = kv.key_count();
    let version_before = kv.current_version();

    store.save(&u).await.unwrap();
    assert_eq!(kv.key_count(), keys_before, "idempotent replay must not add keys");
    assert!(kv.current_version() > version_before, "the replay still commits");

    let verification = store.verify_index::<User>("User_email", &Partition::new()).await.unwrap();
    assert!(verification.is_clean());
}

#[tokio::test]
async fn delete_removes_every_index_entry() {
    let kv = MemoryKv::new();
    let store = store_over(kv.clone());
    let none = Partition::new();

    store.save(&user("u1", "a@x", "A")).await.unwrap();
    store.save(&user("u2", "b@x", "B")).await.unwrap();
    store.delete::<User>(&[Value::from("u1")], &none).await.unwrap();

    for index in ["User_email", "User_category", "User_tag", "User_created"] {
        let verification = store.verify_index::<User>(index, &none).await.unwrap();
        assert!(verification.is_clean(), "{index} drifted after delete: {verification:?}");
        assert_eq!(verification.records_checked, 1);
    }
}
