use lamina_core::{Predicate, Value};
use lamina_tests::{store, User};

fn user(id: &str, email: &str, category: &str, tag: &str, status: &str, customer: &str, created_at: i64) -> User {
    User {
        id: id.into(),
        email: email.into(),
        name: format!("user {id}"),
        category: category.into(),
        tag: tag.into(),
        status: status.into(),
        customer_id: customer.into(),
        created_at,
    }
}

async fn seeded() -> lamina_core::RecordStore {
    let store = store();
    for (id, email, category, tag, status, customer, created) in [
        ("u1", "alice@example.com", "A", "X", "pending", "c1", 30),
        ("u2", "bob@example.com", "A", "Y", "done", "c2", 10),
        ("u3", "carol@example.com", "B", "X", "pending", "c1", 20),
        ("u4", "dan@example.com", "B", "Y", "pending", "c3", 40),
    ] {
        store.save(&user(id, email, category, tag, status, customer, created)).await.unwrap();
    }
    store
}

fn ids(users: &[User]) -> Vec<&str> { users.iter().map(|u| u.id.as_str()).collect() }

#[tokio::test]
async fn point_lookup_plans_an_index_seek() {
    let store = seeded().await;

    let explained = store
        .query::<User>()
        .filter(Predicate::eq("email", "alice@example.com"))
        .explain()
        .await
        .unwrap();
    assert!(explained.starts_with("IndexSeek[User_email] seeks=1"), "unexpected plan:\n{explained}");

    let found = store.query::<User>().filter(Predicate::eq("email", "alice@example.com")).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u1"]);
}

#[tokio::test]
async fn or_across_indexes_plans_a_deduplicating_union() {
    let store = seeded().await;

    let predicate = Predicate::eq("category", "A").or(Predicate::eq("tag", "X"));
    let explained = store.query::<User>().filter(predicate.clone()).explain().await.unwrap();
    assert!(explained.starts_with("Union deduplicate=true"), "unexpected plan:\n{explained}");

    // u1 matches both disjuncts and must come back exactly once.
    let fetched = store.query::<User>().filter(predicate.clone()).fetch().await.unwrap();
    let mut found = ids(&fetched);
    found.sort();
    assert_eq!(found, vec!["u1", "u2", "u3"]);

    // An ORDER BY on top forces an explicit sort over the unordered union.
    let explained = store.query::<User>().filter(predicate.clone()).order_by("created_at", false).explain().await.unwrap();
    assert!(explained.starts_with("Sort by created_at"), "unexpected plan:\n{explained}");
    let ordered = store.query::<User>().filter(predicate).order_by("created_at", false).fetch().await.unwrap();
    assert_eq!(ids(&ordered), vec!["u2", "u3", "u1"]);
}

#[tokio::test]
async fn and_over_selective_indexes_plans_an_intersection() {
    let store = seeded().await;

    let predicate = Predicate::eq("customerId", "c1").and(Predicate::eq("status", "pending"));
    let explained = store.query::<User>().filter(predicate.clone()).explain().await.unwrap();
    assert!(explained.starts_with("Intersection"), "unexpected plan:\n{explained}");

    let fetched = store.query::<User>().filter(predicate).fetch().await.unwrap();
    let mut found = ids(&fetched);
    found.sort();
    assert_eq!(found, vec!["u1", "u3"]);
}

#[tokio::test]
async fn unindexed_predicate_falls_back_to_filtered_scan() {
    let store = seeded().await;

    let explained = store.query::<User>().filter(Predicate::eq("name", "user u2")).explain().await.unwrap();
    assert!(explained.contains("FullScan"), "unexpected plan:\n{explained}");

    let found = store.query::<User>().filter(Predicate::eq("name", "user u2")).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u2"]);
}

#[tokio::test]
async fn range_and_in_queries_use_the_matching_index() {
    let store = seeded().await;

    let found = store
        .query::<User>()
        .filter(Predicate::gt_eq("created_at", 20).and(Predicate::lt("created_at", 40)))
        .fetch()
        .await
        .unwrap();
    assert_eq!(ids(&found), vec!["u3", "u1"]);

    let explained = store.query::<User>().filter(Predicate::is_in("category", ["A", "B"])).explain().await.unwrap();
    assert!(explained.starts_with("IndexSeek[User_category] seeks=2"), "unexpected plan:\n{explained}");
}

#[tokio::test]
async fn index_order_elides_the_sort() {
    let store = seeded().await;

    let explained = store.query::<User>().order_by("created_at", false).explain().await.unwrap();
    assert!(explained.starts_with("IndexScan[User_created]"), "unexpected plan:\n{explained}");
    assert!(explained.contains("ordered=true"), "unexpected plan:\n{explained}");

    let found = store.query::<User>().order_by("created_at", false).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u2", "u3", "u1", "u4"]);

    let found = store.query::<User>().order_by("created_at", true).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u4", "u1", "u3", "u2"]);
}

#[tokio::test]
async fn limit_and_offset_apply_after_order() {
    let store = seeded().await;
    let found = store.query::<User>().order_by("created_at", false).offset(1).limit(2).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u3", "u1"]);
}

#[tokio::test]
async fn hints_override_plan_selection() {
    let store = seeded().await;

    let explained = store
        .query::<User>()
        .filter(Predicate::eq("email", "alice@example.com"))
        .forcing_scan()
        .explain()
        .await
        .unwrap();
    assert!(explained.contains("FullScan"), "unexpected plan:\n{explained}");

    let explained = store
        .query::<User>()
        .filter(Predicate::eq("email", "alice@example.com"))
        .using_index("User_category")
        .explain()
        .await
        .unwrap();
    assert!(explained.contains("IndexScan[User_category]"), "unexpected plan:\n{explained}");

    // Hinted plans still return correct results.
    let found = store
        .query::<User>()
        .filter(Predicate::eq("email", "alice@example.com"))
        .forcing_scan()
        .fetch()
        .await
        .unwrap();
    assert_eq!(ids(&found), vec!["u1"]);
}

#[tokio::test]
async fn covering_index_answers_id_queries_without_records() {
    let store = seeded().await;
    let ids = store
        .query::<User>()
        .filter(Predicate::eq("email", "bob@example.com"))
        .fetch_ids()
        .await
        .unwrap();
    assert_eq!(ids, vec![vec![Value::from("u2")]]);
}

#[tokio::test]
async fn string_prefix_queries_scan_a_bounded_range() {
    let store = seeded().await;
    let found = store.query::<User>().filter(Predicate::starts_with("email", "alice")).fetch().await.unwrap();
    assert_eq!(ids(&found), vec!["u1"]);

    // The range is a narrowing heuristic; the exact prefix check stays as a
    // filter above the scan.
    let explained = store.query::<User>().filter(Predicate::starts_with("email", "alice")).explain().await.unwrap();
    assert!(explained.starts_with("Filter"), "unexpected plan:\n{explained}");
    assert!(explained.contains("IndexScan[User_email]"), "unexpected plan:\n{explained}");
}
