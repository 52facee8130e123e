use lamina_core::{Error, Partition, Value};
use lamina_tests::{store, User};

#[tokio::test]
async fn insert_then_duplicate_email_is_rejected() {
    let store = store();

    store.save(&User::sample("u1", "a@x")).await.unwrap();

    let err = store.save(&User::sample("u2", "a@x")).await.unwrap_err();
    match err {
        Error::UniquenessViolation { index, field, value, existing_id } => {
            assert_eq!(index, "User_email");
            assert_eq!(field, "email");
            assert_eq!(value, Value::from("a@x"));
            assert_eq!(existing_id, Value::from("u1"));
        }
        other => panic!("expected uniqueness violation, got {other:?}"),
    }

    // The failed save left nothing behind.
    let u2: Option<User> = store.fetch(&[Value::from("u2")], &Partition::new()).await.unwrap();
    assert!(u2.is_none());
}

#[tokio::test]
async fn rewriting_the_same_record_keeps_its_unique_value() {
    let store = store();
    let mut user = User::sample("u1", "a@x");
    store.save(&user).await.unwrap();

    // Same key, same email: a key-preserving replace, not a duplicate.
    user.name = "renamed".into();
    store.save(&user).await.unwrap();

    let fetched: User = store.fetch(&[Value::from("u1")], &Partition::new()).await.unwrap().unwrap();
    assert_eq!(fetched.name, "renamed");
}

#[tokio::test]
async fn changing_the_email_frees_the_old_value() {
    let store = store();
    let mut user = User::sample("u1", "a@x");
    store.save(&user).await.unwrap();

    user.email = "b@x".into();
    store.save(&user).await.unwrap();

    // The old value is reusable now.
    store.save(&User::sample("u2", "a@x")).await.unwrap();
}

#[tokio::test]
async fn delete_frees_the_unique_value() {
    let store = store();
    store.save(&User::sample("u1", "a@x")).await.unwrap();
    assert!(store.delete::<User>(&[Value::from("u1")], &Partition::new()).await.unwrap());
    store.save(&User::sample("u2", "a@x")).await.unwrap();
}

#[tokio::test]
async fn concurrent_duplicate_saves_admit_exactly_one() {
    let store = store();

    let u1 = User::sample("u1", "dup@x");
    let u2 = User::sample("u2", "dup@x");
    let (a, b) = tokio::join!(store.save(&u1), store.save(&u2));
    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one of the racing saves must win (a={a:?}, b={b:?})");
}
