use lamina_core::transaction::hooks::{CommitHook, PostCommitAction, TransactionListener};
use lamina_core::transaction::Transaction;
use lamina_core::{Database, Error, Partition, Result, Value};
use lamina_kv::memory::MemoryKv;
use lamina_tests::{store_over, User};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Veto {
    armed: AtomicBool,
    after_commits: AtomicUsize,
}

impl CommitHook for Veto {
    fn name(&self) -> &str { "veto" }

    fn priority(&self) -> i32 { 10 }

    fn before_commit(&self, _txn: &Transaction) -> Result<()> {
        if self.armed.load(Ordering::SeqCst) {
            Err(Error::ValidationFailed { check: "veto".into(), message: "armed".into() })
        } else {
            Ok(())
        }
    }

    fn after_commit(&self, _version: i64) { self.after_commits.fetch_add(1, Ordering::SeqCst); }
}

#[tokio::test]
async fn commit_hooks_validate_and_observe() {
    let kv = MemoryKv::new();
    let store = store_over(kv.clone());
    let hook = Arc::new(Veto { armed: AtomicBool::new(false), after_commits: AtomicUsize::new(0) });
    store.database().register_hook(hook.clone());

    store.save(&User::sample("u1", "a@x")).await.unwrap();
    assert!(hook.after_commits.load(Ordering::SeqCst) >= 1);

    hook.armed.store(true, Ordering::SeqCst);
    let before = kv.key_count();
    let err = store.save(&User::sample("u2", "b@x")).await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed { .. }));
    assert_eq!(kv.key_count(), before, "vetoed commit must not write");
}

struct Notify {
    ran: AtomicUsize,
    fail: bool,
}

#[async_trait::async_trait]
impl PostCommitAction for Notify {
    fn name(&self) -> &str { "notify" }

    async fn run(&self) -> Result<()> {
        self.ran.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn post_commit_failures_are_reported_not_thrown() {
    let db = Database::new(Arc::new(MemoryKv::new()));
    let ok = Arc::new(Notify { ran: AtomicUsize::new(0), fail: false });
    let bad = Arc::new(Notify { ran: AtomicUsize::new(0), fail: true });

    let (ok_in, bad_in) = (ok.clone(), bad.clone());
    let ((), report) = db
        .run_with_report(move |txn| {
            let (ok, bad) = (ok_in.clone(), bad_in.clone());
            async move {
                txn.set(b"k", b"v")?;
                txn.add_post_commit(ok);
                txn.add_post_commit(bad);
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(report.post_commit.len(), 2);
    assert!(report.post_commit[0].is_ok());
    assert!(report.post_commit[1].is_err());
    assert_eq!(ok.ran.load(Ordering::SeqCst), 1);
    assert_eq!(bad.ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn post_commit_actions_do_not_run_on_abort() {
    let db = Database::new(Arc::new(MemoryKv::new()));
    let action = Arc::new(Notify { ran: AtomicUsize::new(0), fail: false });

    let action_in = action.clone();
    let result: lamina_core::Result<()> = db
        .run(move |txn| {
            let action = action_in.clone();
            async move {
                txn.add_post_commit(action);
                Err(Error::InvalidQuery("abort".into()))
            }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(action.ran.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct Counting {
    attempts: AtomicUsize,
    commits: AtomicUsize,
    aborts: AtomicUsize,
}

impl TransactionListener for Counting {
    fn on_attempt(&self, _attempt: usize) { self.attempts.fetch_add(1, Ordering::SeqCst); }

    fn on_commit(&self, _version: i64, _attempts: usize) { self.commits.fetch_add(1, Ordering::SeqCst); }

    fn on_abort(&self, _error: &Error, _attempt: usize) { self.aborts.fetch_add(1, Ordering::SeqCst); }
}

#[tokio::test]
async fn listeners_observe_the_transaction_lifecycle() {
    let db = Database::new(Arc::new(MemoryKv::new()));
    let listener = Arc::new(Counting::default());
    db.register_listener(listener.clone());

    db.run(|txn| async move {
        txn.set(b"k", b"v")?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(listener.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(listener.commits.load(Ordering::SeqCst), 1);

    let _: Result<()> = db.run(|_txn| async move { Err(Error::InvalidQuery("no".into())) }).await;
    assert_eq!(listener.aborts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversize_records_chunk_transparently() {
    let kv = MemoryKv::new();
    let store = store_over(kv.clone());

    let mut user = User::sample("big", "big@x");
    // Large enough to exceed the single-value limit even after compression.
    let mut state = 1u64;
    user.name = (0..300_000)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            char::from(b'a' + ((state >> 33) % 26) as u8)
        })
        .collect();
    store.save(&user).await.unwrap();

    let restored: User = store.fetch(&[Value::from("big")], &Partition::new()).await.unwrap().unwrap();
    assert_eq!(restored, user);

    // Replacing with a small record cleans the chunks up.
    let small = User::sample("big", "big@x");
    store.save(&small).await.unwrap();
    let restored: User = store.fetch(&[Value::from("big")], &Partition::new()).await.unwrap().unwrap();
    assert_eq!(restored, small);
}

#[tokio::test]
async fn concurrent_saves_of_distinct_records_all_commit() {
    let store = store_over(MemoryKv::new());
    let results = futures_join_all(&store).await;
    for result in results {
        result.unwrap();
    }

    let all = store.query::<User>().fetch().await.unwrap();
    assert_eq!(all.len(), 8);
}

async fn futures_join_all(store: &lamina_core::RecordStore) -> Vec<lamina_core::Result<()>> {
    let saves = (0..8).map(|i| {
        let store = store.clone();
        async move { store.save(&User::sample(&format!("u{i}"), &format!("u{i}@x"))).await }
    });
    futures::future::join_all(saves).await
}
