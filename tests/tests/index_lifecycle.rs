//! Online index lifecycle: add with write-only build, readability flips, and
//! drops.

use lamina_core::schema::index::IndexState;
use lamina_core::{IndexDescriptor, Partition, Predicate};
use lamina_tests::{store, User};

fn user(id: &str, name: &str) -> User {
    let mut u = User::sample(id, &format!("{id}@x"));
    u.name = name.into();
    u
}

#[tokio::test]
async fn added_index_backfills_existing_records() {
    let store = store();
    let none = Partition::new();

    for i in 0..25 {
        store.save(&user(&format!("u{i}"), if i % 2 == 0 { "even" } else { "odd" })).await.unwrap();
    }

    store.add_index::<User>(IndexDescriptor::ordered("User_name", ["name"]), &none).await.unwrap();

    // The new index is readable and fully built.
    let explained = store.query::<User>().filter(Predicate::eq("name", "even")).explain().await.unwrap();
    assert!(explained.starts_with("IndexSeek[User_name]"), "unexpected plan:\n{explained}");
    let found = store.query::<User>().filter(Predicate::eq("name", "even")).fetch().await.unwrap();
    assert_eq!(found.len(), 13);

    let verification = store.verify_index::<User>("User_name", &none).await.unwrap();
    assert!(verification.is_clean(), "{verification:?}");
    assert_eq!(verification.records_checked, 25);
}

#[tokio::test]
async fn added_index_tracks_writes_after_the_build() {
    let store = store();
    let none = Partition::new();
    store.save(&user("u1", "first")).await.unwrap();
    store.add_index::<User>(IndexDescriptor::ordered("User_name", ["name"]), &none).await.unwrap();

    store.save(&user("u2", "second")).await.unwrap();
    let found = store.query::<User>().filter(Predicate::eq("name", "second")).fetch().await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn write_only_index_is_maintained_but_not_planned() {
    let store = store();
    let none = Partition::new();
    store.save(&user("u1", "n1")).await.unwrap();

    store.set_index_state::<User>("User_category", &none, IndexState::WriteOnly).await.unwrap();

    // Planner avoids it...
    let explained = store.query::<User>().filter(Predicate::eq("category", "general")).explain().await.unwrap();
    assert!(!explained.contains("IndexSeek[User_category]"), "write-only index was planned:\n{explained}");
    assert!(explained.contains("FullScan"), "unexpected plan:\n{explained}");

    // ...but writes keep flowing into it, so flipping it back needs no build.
    store.save(&user("u2", "n2")).await.unwrap();
    store.set_index_state::<User>("User_category", &none, IndexState::Readable).await.unwrap();
    let verification = store.verify_index::<User>("User_category", &none).await.unwrap();
    assert!(verification.is_clean(), "{verification:?}");

    let explained = store.query::<User>().filter(Predicate::eq("category", "general")).explain().await.unwrap();
    assert!(explained.starts_with("IndexSeek[User_category]"), "unexpected plan:\n{explained}");
}

#[tokio::test]
async fn disabled_index_receives_no_writes() {
    let store = store();
    let none = Partition::new();
    store.set_index_state::<User>("User_category", &none, IndexState::Disabled).await.unwrap();
    store.save(&user("u1", "n1")).await.unwrap();

    // Nothing was materialized for the disabled index.
    let verification = store.verify_index::<User>("User_category", &none).await.unwrap();
    assert_eq!(verification.missing_entries.len(), 1);
}

#[tokio::test]
async fn dropped_index_disappears_from_plans_and_keyspace() {
    let store = store();
    let none = Partition::new();
    store.save(&user("u1", "n1")).await.unwrap();

    store.drop_index::<User>("User_category", &none).await.unwrap();

    let explained = store.query::<User>().filter(Predicate::eq("category", "general")).explain().await.unwrap();
    assert!(!explained.contains("User_category"), "dropped index still planned:\n{explained}");

    // Saves keep working without the dropped index.
    store.save(&user("u2", "n2")).await.unwrap();
}
